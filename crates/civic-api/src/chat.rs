use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use civic_core::metrics;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::net::SocketAddr;

use crate::assistant;
use crate::auth::{authorize_owner, bearer_claims, client_ip, enforce_rate_limit};
use crate::{non_blank, unix, ApiError, ApiResult, AppState};

const DEFAULT_AREA: &str = "General";
const HISTORY_LIMIT: i64 = 50;

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ChatRequest {
    pub user_id: Option<String>,
    pub message: Option<String>,
    pub area: Option<String>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub response: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ChatMessageView {
    pub message_id: String,
    pub user_id: Option<String>,
    pub area: String,
    pub message: String,
    pub message_type: String,
    pub created_at: i64,
}

impl ChatMessageView {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            message_id: row.try_get("message_id")?,
            user_id: row.try_get("user_id")?,
            area: row.try_get("area")?,
            message: row.try_get("message")?,
            message_type: row.try_get("message_type")?,
            created_at: unix(row.try_get("created_at")?),
        })
    }
}

/// Anonymous chat is allowed; a bearer token pins the sender.
fn chat_sender(
    state: &AppState,
    headers: &HeaderMap,
    claimed: Option<String>,
) -> ApiResult<Option<String>> {
    let claimed = non_blank(claimed);
    match bearer_claims(state, headers)? {
        Some(claims) if claimed.as_deref().is_some_and(|id| id != claims.sub) => Err(
            ApiError::new(StatusCode::UNAUTHORIZED, "USER_MISMATCH", "Unauthorized"),
        ),
        Some(claims) => Ok(Some(claims.sub)),
        None => Ok(claimed),
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let key = format!("chat:{}", client_ip(connect_info.as_ref()));
    enforce_rate_limit(&state, &key, state.rate_limits.chat_per_minute).await?;

    let message =
        non_blank(payload.message).ok_or_else(|| ApiError::bad_request("Message is required"))?;
    let user_id = chat_sender(&state, &headers, payload.user_id)?;
    let area = non_blank(payload.area).unwrap_or_else(|| DEFAULT_AREA.to_string());
    let reply = assistant::respond(&message);

    let mut tx = state.pool.begin().await?;
    for (text, message_type) in [(message.as_str(), "text"), (reply.text, "assistant")] {
        sqlx::query(
            "INSERT INTO civic.chat_messages (message_id, user_id, area, message, message_type) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id.as_deref())
        .bind(&area)
        .bind(text)
        .bind(message_type)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    metrics::inc_chat_message(crate::SERVICE_NAME, reply.topic);
    tracing::debug!(topic = reply.topic, anonymous = user_id.is_none(), "chat answered");

    Ok(Json(ChatResponse {
        response: reply.text,
        message: "Message processed successfully",
    }))
}

pub async fn chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<ChatMessageView>>> {
    authorize_owner(&state, &headers, &user_id, StatusCode::FORBIDDEN)?;

    let rows = sqlx::query(
        "SELECT message_id, user_id, area, message, message_type, created_at \
         FROM ( \
           SELECT message_id, seq, user_id, area, message, message_type, created_at \
           FROM civic.chat_messages \
           WHERE user_id = $1 \
           ORDER BY created_at DESC, seq DESC \
           LIMIT $2 \
         ) recent \
         ORDER BY created_at ASC, seq ASC",
    )
    .bind(&user_id)
    .bind(HISTORY_LIMIT)
    .fetch_all(&state.pool)
    .await?;

    let messages = rows
        .iter()
        .map(ChatMessageView::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router;
    use crate::test_support::{authed_json_request, bearer, json_request, send, test_state};
    use axum::body::Body;
    use axum::http::Request;
    use civic_core::auth::AuthMode;
    use serde_json::json;

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let app = router(test_state(AuthMode::Off));
        let (status, payload) =
            send(app, json_request("POST", "/api/chat", json!({ "message": "  " }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["message"], "Message is required");
    }

    #[tokio::test]
    async fn token_must_match_claimed_sender() {
        let app = router(test_state(AuthMode::Off));
        let (status, payload) = send(
            app,
            authed_json_request(
                "POST",
                "/api/chat",
                json!({ "user_id": "user-1", "message": "hi" }),
                "user-2",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(payload["code"], "USER_MISMATCH");
    }

    #[tokio::test]
    async fn chat_sender_prefers_token() {
        let state = test_state(AuthMode::Required);
        let mut headers = HeaderMap::new();
        assert_eq!(chat_sender(&state, &headers, None).unwrap(), None);
        assert_eq!(
            chat_sender(&state, &headers, Some("user-3".into())).unwrap(),
            Some("user-3".into())
        );

        headers.insert("authorization", bearer("user-4").parse().unwrap());
        assert_eq!(
            chat_sender(&state, &headers, None).unwrap(),
            Some("user-4".into())
        );
    }

    #[tokio::test]
    async fn chat_is_rate_limited_per_client() {
        let mut state = test_state(AuthMode::Off);
        state.rate_limits.chat_per_minute = 1;
        let app = router(state);

        let (first, _) =
            send(app.clone(), json_request("POST", "/api/chat", json!({}))).await;
        let (second, payload) = send(app, json_request("POST", "/api/chat", json!({}))).await;

        assert_eq!(first, StatusCode::BAD_REQUEST);
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(payload["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn history_is_owner_only() {
        let app = router(test_state(AuthMode::Off));
        let request = Request::builder()
            .uri("/api/chat/user-1")
            .header("authorization", bearer("user-2"))
            .body(Body::empty())
            .expect("request");
        let (status, _) = send(app, request).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
