#![allow(dead_code)]

use axum::http::HeaderMap;
use serde::Serialize;
use utoipa::openapi::server::ServerBuilder;
use utoipa::{OpenApi, ToSchema};

use crate::auth::{OAuthExchangeRequest, VerifyEmailRequest};
use crate::chat::{ChatMessageView, ChatRequest};
use crate::comments::{AddCommentRequest, CommentView};
use crate::issues::{CreateIssueRequest, IssueView, UpdateStatusRequest};
use crate::notifications::NotificationView;
use crate::users::{UpdateUserRequest, UserProfile};
use crate::verifications::{SubmitVerificationRequest, VerificationView};
use crate::votes::UpvoteRequest;
use crate::{ErrorResponse, HealthStatus};

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct UpvoteResult {
    pub message: String,
    pub upvoted: bool,
    pub upvote_count: i64,
}

#[derive(Serialize, ToSchema)]
pub struct ChatReply {
    pub response: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: i64,
    pub user: UserProfile,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        healthz_doc,
        metrics_doc,
        openapi_doc,
        auth_oauth_doc,
        auth_me_doc,
        auth_register_doc,
        auth_login_doc,
        auth_verify_email_doc,
        users_get_doc,
        users_update_doc,
        issues_list_doc,
        issues_create_doc,
        issues_get_doc,
        issues_status_doc,
        comments_list_doc,
        comments_create_doc,
        upvote_doc,
        verifications_create_doc,
        verifications_list_doc,
        chat_send_doc,
        chat_history_doc,
        notifications_list_doc,
        notifications_read_doc
    ),
    components(
        schemas(
            HealthStatus,
            ErrorResponse,
            MessageResponse,
            UpvoteResult,
            ChatReply,
            AccessToken,
            OAuthExchangeRequest,
            VerifyEmailRequest,
            UserProfile,
            UpdateUserRequest,
            IssueView,
            CreateIssueRequest,
            UpdateStatusRequest,
            CommentView,
            AddCommentRequest,
            UpvoteRequest,
            SubmitVerificationRequest,
            VerificationView,
            ChatRequest,
            ChatMessageView,
            NotificationView
        )
    ),
    tags(
        (name = "civic-api", description = "Civic issue reporting API")
    )
)]
pub struct CivicApiDoc;

pub fn document(server_url: Option<&str>) -> utoipa::openapi::OpenApi {
    let mut doc = CivicApiDoc::openapi();
    if let Some(url) = server_url {
        doc.servers = Some(vec![ServerBuilder::new().url(url).build()]);
    }
    doc
}

pub fn infer_server_url(headers: &HeaderMap) -> Option<String> {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))
        .and_then(|value| value.to_str().ok())?;
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    Some(format!("{proto}://{host}"))
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, body = HealthStatus), (status = 503, body = HealthStatus))
)]
fn healthz_doc() {}

#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, content_type = "text/plain", body = String))
)]
fn metrics_doc() {}

#[utoipa::path(
    get,
    path = "/api/openapi.json",
    responses((status = 200, body = serde_json::Value))
)]
fn openapi_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/oauth",
    request_body = OAuthExchangeRequest,
    params(("x-oauth-bridge-secret" = String, Header, description = "Shared bridge secret")),
    responses(
        (status = 200, body = AccessToken),
        (status = 400, body = ErrorResponse),
        (status = 401, body = ErrorResponse),
        (status = 429, body = ErrorResponse)
    )
)]
fn auth_oauth_doc() {}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses((status = 200, body = UserProfile), (status = 401, body = ErrorResponse))
)]
fn auth_me_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    responses((status = 400, body = ErrorResponse), (status = 429, body = ErrorResponse))
)]
fn auth_register_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = serde_json::Value,
    responses(
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
        (status = 429, body = ErrorResponse)
    )
)]
fn auth_login_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
        (status = 429, body = ErrorResponse)
    )
)]
fn auth_verify_email_doc() {}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}",
    params(("user_id" = String, Path, description = "User identifier")),
    responses((status = 200, body = UserProfile), (status = 404, body = ErrorResponse))
)]
fn users_get_doc() {}

#[utoipa::path(
    put,
    path = "/api/users/{user_id}",
    params(("user_id" = String, Path, description = "User identifier")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, body = serde_json::Value),
        (status = 400, body = ErrorResponse),
        (status = 401, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    )
)]
fn users_update_doc() {}

#[utoipa::path(
    get,
    path = "/api/issues",
    params(
        ("area" = Option<String>, Query, description = "Case-insensitive area substring"),
        ("category" = Option<String>, Query, description = "Exact category"),
        ("status" = Option<String>, Query, description = "Exact status"),
        ("limit" = Option<i64>, Query, description = "Maximum issues, 1 to 200")
    ),
    responses((status = 200, body = [IssueView]), (status = 400, body = ErrorResponse))
)]
fn issues_list_doc() {}

#[utoipa::path(
    post,
    path = "/api/issues",
    request_body = CreateIssueRequest,
    responses(
        (status = 201, body = serde_json::Value),
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    )
)]
fn issues_create_doc() {}

#[utoipa::path(
    get,
    path = "/api/issues/{issue_id}",
    params(("issue_id" = String, Path, description = "Issue identifier")),
    responses((status = 200, body = IssueView), (status = 404, body = ErrorResponse))
)]
fn issues_get_doc() {}

#[utoipa::path(
    put,
    path = "/api/issues/{issue_id}/status",
    params(("issue_id" = String, Path, description = "Issue identifier")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, body = serde_json::Value),
        (status = 400, body = ErrorResponse),
        (status = 403, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    )
)]
fn issues_status_doc() {}

#[utoipa::path(
    get,
    path = "/api/issues/{issue_id}/comments",
    params(("issue_id" = String, Path, description = "Issue identifier")),
    responses((status = 200, body = [CommentView]), (status = 404, body = ErrorResponse))
)]
fn comments_list_doc() {}

#[utoipa::path(
    post,
    path = "/api/issues/{issue_id}/comments",
    params(("issue_id" = String, Path, description = "Issue identifier")),
    request_body = AddCommentRequest,
    responses(
        (status = 200, body = serde_json::Value),
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    )
)]
fn comments_create_doc() {}

#[utoipa::path(
    post,
    path = "/api/issues/{issue_id}/upvote",
    params(("issue_id" = String, Path, description = "Issue identifier")),
    request_body = UpvoteRequest,
    responses(
        (status = 200, body = UpvoteResult),
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    )
)]
fn upvote_doc() {}

#[utoipa::path(
    post,
    path = "/api/verifications",
    request_body = SubmitVerificationRequest,
    responses(
        (status = 201, body = serde_json::Value),
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    )
)]
fn verifications_create_doc() {}

#[utoipa::path(
    get,
    path = "/api/verifications/{issue_id}",
    params(("issue_id" = String, Path, description = "Issue identifier")),
    responses((status = 200, body = [VerificationView]))
)]
fn verifications_list_doc() {}

#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, body = ChatReply),
        (status = 400, body = ErrorResponse),
        (status = 429, body = ErrorResponse)
    )
)]
fn chat_send_doc() {}

#[utoipa::path(
    get,
    path = "/api/chat/{user_id}",
    params(("user_id" = String, Path, description = "User identifier")),
    responses((status = 200, body = [ChatMessageView]), (status = 403, body = ErrorResponse))
)]
fn chat_history_doc() {}

#[utoipa::path(
    get,
    path = "/api/notifications/{user_id}",
    params(("user_id" = String, Path, description = "User identifier")),
    responses((status = 200, body = [NotificationView]), (status = 403, body = ErrorResponse))
)]
fn notifications_list_doc() {}

#[utoipa::path(
    put,
    path = "/api/notifications/{notification_id}/read",
    params(("notification_id" = String, Path, description = "Notification identifier")),
    responses(
        (status = 200, body = MessageResponse),
        (status = 403, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    )
)]
fn notifications_read_doc() {}
