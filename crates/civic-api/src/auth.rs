use axum::extract::{ConnectInfo, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use civic_core::auth::{self, AccessTokenClaims, AuthMode, TokenSubject};
use civic_core::metrics;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::net::SocketAddr;
use std::time::Duration;

use crate::users::{UserProfile, USER_COLUMNS};
use crate::{non_blank, ApiError, ApiResult, AppState};

const AUTHENTICATE_BEARER_CHALLENGE: &str = r#"Bearer realm="civic-api""#;
const BRIDGE_SECRET_HEADER: &str = "x-oauth-bridge-secret";
const EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;

#[derive(Deserialize, utoipa::ToSchema)]
pub struct OAuthExchangeRequest {
    pub provider: Option<String>,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

#[derive(Serialize)]
pub struct OAuthExchangeResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: i64,
    pub user: UserProfile,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    #[serde(rename = "verificationToken", alias = "verification_token")]
    pub verification_token: Option<String>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct VerifyEmailRequest {
    pub email: Option<String>,
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Exchanges an identity asserted by the OAuth bridge for an API token.
pub async fn oauth_exchange(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<OAuthExchangeRequest>,
) -> ApiResult<Json<OAuthExchangeResponse>> {
    let key = format!("auth:{}", client_ip(connect_info.as_ref()));
    enforce_rate_limit(&state, &key, state.rate_limits.auth_per_minute).await?;

    let presented = headers
        .get(BRIDGE_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !secrets_match(presented, &state.oauth_bridge_secret) {
        metrics::inc_auth_failure(crate::SERVICE_NAME);
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "AUTH_FAILED",
            "invalid bridge secret",
        ));
    }

    let (Some(provider), Some(subject), Some(email), Some(name)) = (
        non_blank(payload.provider),
        non_blank(payload.subject),
        non_blank(payload.email).map(|email| email.to_lowercase()),
        non_blank(payload.name),
    ) else {
        return Err(ApiError::bad_request(
            "provider, subject, email and name are required",
        ));
    };

    let (verification_token, verification_expires) = if payload.email_verified {
        (None, None)
    } else {
        (
            Some(auth::generate_verification_token()),
            Some(chrono::Utc::now() + chrono::Duration::hours(EMAIL_VERIFICATION_TTL_HOURS)),
        )
    };

    let row = sqlx::query(&format!(
        "INSERT INTO civic.users \
         (user_id, oauth_provider, oauth_subject, name, email, picture_url, \
          email_verified, is_verified, email_verification_token, email_verification_expires) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8, $9) \
         ON CONFLICT (email) DO UPDATE SET \
           oauth_provider = EXCLUDED.oauth_provider, \
           oauth_subject = EXCLUDED.oauth_subject, \
           name = EXCLUDED.name, \
           picture_url = COALESCE(EXCLUDED.picture_url, civic.users.picture_url), \
           email_verified = civic.users.email_verified OR EXCLUDED.email_verified, \
           is_verified = civic.users.is_verified OR EXCLUDED.is_verified, \
           email_verification_token = CASE WHEN civic.users.email_verified OR EXCLUDED.email_verified \
             THEN NULL ELSE EXCLUDED.email_verification_token END, \
           email_verification_expires = CASE WHEN civic.users.email_verified OR EXCLUDED.email_verified \
             THEN NULL ELSE EXCLUDED.email_verification_expires END, \
           updated_at = NOW() \
         RETURNING {USER_COLUMNS}"
    ))
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&provider)
    .bind(&subject)
    .bind(&name)
    .bind(&email)
    .bind(non_blank(payload.picture))
    .bind(payload.email_verified)
    .bind(verification_token)
    .bind(verification_expires)
    .fetch_one(&state.pool)
    .await?;
    let user = UserProfile::from_row(&row)?;

    let (access_token, claims) = auth::issue_token(
        &TokenSubject {
            user_id: &user.user_id,
            email: &user.email,
            name: &user.name,
        },
        &state.jwt_config,
    )
    .map_err(|err| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "AUTH_ERROR",
            err.to_string(),
        )
    })?;
    metrics::inc_auth_success(crate::SERVICE_NAME);
    tracing::info!(user_id = %user.user_id, provider = %provider, "oauth identity exchanged");

    Ok(Json(OAuthExchangeResponse {
        access_token,
        token_type: "Bearer",
        expires_at: claims.exp as i64,
        user,
    }))
}

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<UserProfile>> {
    let claims = bearer_claims(&state, &headers)?
        .ok_or_else(|| auth_required_error("missing token"))?;
    let user = crate::users::fetch_profile(&state.pool, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user))
}

pub async fn register(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> ApiResult<Json<MessageResponse>> {
    let key = format!("auth:{}", client_ip(connect_info.as_ref()));
    enforce_rate_limit(&state, &key, state.rate_limits.auth_per_minute).await?;

    Err(oauth_only_error("Use Google OAuth for registration."))
}

/// Legacy email login. A supplied verification token is still honoured, but
/// sessions are only issued through the OAuth exchange.
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let key = format!("auth:{}", client_ip(connect_info.as_ref()));
    enforce_rate_limit(&state, &key, state.rate_limits.auth_per_minute).await?;

    let email = non_blank(payload.email)
        .map(|email| email.to_lowercase())
        .ok_or_else(|| ApiError::bad_request("Email is required"))?;
    let pending = load_pending_verification(&state, &email).await?;

    if let Some(token) = non_blank(payload.verification_token) {
        pending.check(&token)?;
        mark_email_verified(&state, &pending.user_id).await?;
    }

    Err(oauth_only_error("Use Google OAuth for authentication."))
}

pub async fn verify_email(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(payload): Json<VerifyEmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let key = format!("auth:{}", client_ip(connect_info.as_ref()));
    enforce_rate_limit(&state, &key, state.rate_limits.auth_per_minute).await?;

    let (Some(email), Some(token)) = (
        non_blank(payload.email).map(|email| email.to_lowercase()),
        non_blank(payload.token),
    ) else {
        return Err(ApiError::bad_request("Email and token are required"));
    };

    let pending = load_pending_verification(&state, &email).await?;
    pending.check(&token)?;
    mark_email_verified(&state, &pending.user_id).await?;
    tracing::info!(user_id = %pending.user_id, "email verified");

    Ok(Json(MessageResponse {
        message: "Email verified successfully",
    }))
}

struct PendingVerification {
    user_id: String,
    token: Option<String>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PendingVerification {
    fn check(&self, presented: &str) -> ApiResult<()> {
        if self.token.as_deref() != Some(presented) {
            return Err(ApiError::bad_request("Invalid verification token"));
        }
        match self.expires_at {
            Some(expires_at) if chrono::Utc::now() <= expires_at => Ok(()),
            _ => Err(ApiError::bad_request("Verification token expired")),
        }
    }
}

async fn load_pending_verification(state: &AppState, email: &str) -> ApiResult<PendingVerification> {
    let row = sqlx::query(
        "SELECT user_id, email_verification_token, email_verification_expires \
         FROM civic.users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(PendingVerification {
        user_id: row.try_get("user_id")?,
        token: row.try_get("email_verification_token")?,
        expires_at: row.try_get("email_verification_expires")?,
    })
}

async fn mark_email_verified(state: &AppState, user_id: &str) -> ApiResult<()> {
    sqlx::query(
        "UPDATE civic.users \
         SET email_verified = TRUE, is_verified = TRUE, \
             email_verification_token = NULL, email_verification_expires = NULL, \
             updated_at = NOW() \
         WHERE user_id = $1",
    )
    .bind(user_id)
    .execute(&state.pool)
    .await?;
    Ok(())
}

/// Parses the bearer token when one is present.
pub(crate) fn bearer_claims(
    state: &AppState,
    headers: &HeaderMap,
) -> ApiResult<Option<AccessTokenClaims>> {
    let Some(header) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let token = header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| auth_required_error("invalid token"))?;
    let claims = auth::verify_token(token, &state.jwt_config).map_err(|err| {
        metrics::inc_auth_failure(crate::SERVICE_NAME);
        auth_required_error(err.to_string())
    })?;
    Ok(Some(claims))
}

/// Determines which user a write acts as. A bearer token wins; a `user_id`
/// in the body must agree with it. Without a token the body value is used
/// unless the service runs with `AuthMode::Required`.
pub(crate) fn resolve_actor(
    state: &AppState,
    headers: &HeaderMap,
    claimed: Option<&str>,
    missing_message: &'static str,
) -> ApiResult<String> {
    let claimed = claimed.map(str::trim).filter(|value| !value.is_empty());
    match bearer_claims(state, headers)? {
        Some(claims) => {
            if claimed.is_some_and(|user_id| user_id != claims.sub) {
                return Err(ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "USER_MISMATCH",
                    "Unauthorized",
                ));
            }
            Ok(claims.sub)
        }
        None if state.auth_mode == AuthMode::Required => Err(auth_required_error("missing token")),
        None => claimed
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request(missing_message)),
    }
}

/// Rejects callers whose token names a different user than `owner_id`.
pub(crate) fn authorize_owner(
    state: &AppState,
    headers: &HeaderMap,
    owner_id: &str,
    mismatch_status: StatusCode,
) -> ApiResult<()> {
    match bearer_claims(state, headers)? {
        Some(claims) if claims.sub == owner_id => Ok(()),
        Some(_) => Err(ApiError::new(mismatch_status, "FORBIDDEN", "Unauthorized")),
        None if state.auth_mode == AuthMode::Required => Err(auth_required_error("missing token")),
        None => Ok(()),
    }
}

pub(crate) async fn enforce_rate_limit(state: &AppState, key: &str, limit: u64) -> ApiResult<()> {
    let outcome = state
        .rate_limiter
        .check(key, limit, Duration::from_secs(60))
        .await;
    if !outcome.allowed {
        let retry_after = outcome
            .retry_after
            .map(|dur| dur.as_secs().max(1))
            .unwrap_or(60);
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "rate limited",
        )
        .with_header("retry-after", retry_after.to_string()));
    }
    Ok(())
}

/// Rate-limit key for the caller. Forwarding headers are client-controlled and
/// never used here.
pub(crate) fn client_ip(connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn auth_required_error(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", message).with_header(
        "www-authenticate",
        AUTHENTICATE_BEARER_CHALLENGE.to_string(),
    )
}

fn oauth_only_error(message: &'static str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "OAUTH_ONLY", message)
}

fn secrets_match(presented: &str, expected: &str) -> bool {
    if presented.len() != expected.len() || expected.is_empty() {
        return false;
    }
    presented
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router;
    use crate::test_support::{bearer, json_request, send, test_state, BRIDGE_SECRET};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;

    #[test]
    fn secrets_match_requires_exact_value() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abd", "abc"));
        assert!(!secrets_match("ab", "abc"));
        assert!(!secrets_match("", ""));
    }

    #[test]
    fn client_ip_ignores_forwarded_header() {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(client_ip(Some(&ConnectInfo(addr))), "127.0.0.1");
        assert_eq!(client_ip(None), "unknown");
    }

    #[test]
    fn pending_verification_checks_token_and_expiry() {
        let pending = PendingVerification {
            user_id: "u1".into(),
            token: Some("abc".into()),
            expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        };
        assert!(pending.check("abc").is_ok());
        assert_eq!(
            pending.check("nope").unwrap_err().message,
            "Invalid verification token"
        );

        let expired = PendingVerification {
            expires_at: Some(chrono::Utc::now() - chrono::Duration::minutes(1)),
            ..pending
        };
        assert_eq!(
            expired.check("abc").unwrap_err().message,
            "Verification token expired"
        );
    }

    #[tokio::test]
    async fn resolve_actor_uses_token_subject() {
        let state = test_state(AuthMode::Off);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer("user-1").parse().unwrap());

        assert_eq!(
            resolve_actor(&state, &headers, None, "missing").unwrap(),
            "user-1"
        );
        assert_eq!(
            resolve_actor(&state, &headers, Some("user-1"), "missing").unwrap(),
            "user-1"
        );
        let err = resolve_actor(&state, &headers, Some("user-2"), "missing").unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn resolve_actor_without_token_depends_on_mode() {
        let open = test_state(AuthMode::Off);
        let headers = HeaderMap::new();
        assert_eq!(
            resolve_actor(&open, &headers, Some(" user-9 "), "missing").unwrap(),
            "user-9"
        );
        let err = resolve_actor(&open, &headers, None, "User ID is required").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "User ID is required");

        let locked = test_state(AuthMode::Required);
        let err = resolve_actor(&locked, &headers, Some("user-9"), "missing").unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn authorize_owner_rejects_other_users() {
        let state = test_state(AuthMode::Off);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer("owner").parse().unwrap());

        assert!(authorize_owner(&state, &headers, "owner", StatusCode::FORBIDDEN).is_ok());
        let err = authorize_owner(&state, &headers, "someone", StatusCode::FORBIDDEN).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert!(authorize_owner(&state, &HeaderMap::new(), "someone", StatusCode::FORBIDDEN).is_ok());
    }

    #[tokio::test]
    async fn register_points_to_oauth() {
        let app = router(test_state(AuthMode::Off));
        let (status, payload) =
            send(app, json_request("POST", "/api/auth/register", json!({}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["code"], "OAUTH_ONLY");
        assert_eq!(payload["message"], "Use Google OAuth for registration.");
    }

    #[tokio::test]
    async fn me_requires_bearer_token() {
        let app = router(test_state(AuthMode::Off));
        let response = tower::ServiceExt::oneshot(
            app,
            Request::builder()
                .uri("/api/auth/me")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("www-authenticate").unwrap(),
            AUTHENTICATE_BEARER_CHALLENGE
        );
    }

    #[tokio::test]
    async fn me_rejects_garbage_token() {
        let app = router(test_state(AuthMode::Off));
        let request = Request::builder()
            .uri("/api/auth/me")
            .header("authorization", "Bearer not-a-jwt")
            .body(Body::empty())
            .expect("request");
        let (status, payload) = send(app, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(payload["code"], "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn oauth_exchange_requires_bridge_secret() {
        let app = router(test_state(AuthMode::Off));
        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/oauth")
            .header("content-type", "application/json")
            .header(BRIDGE_SECRET_HEADER, "wrong")
            .body(Body::from(
                json!({
                    "provider": "google",
                    "subject": "1234",
                    "email": "priya@example.com",
                    "name": "Priya K"
                })
                .to_string(),
            ))
            .expect("request");
        let (status, payload) = send(app, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(payload["code"], "AUTH_FAILED");
    }

    #[tokio::test]
    async fn oauth_exchange_requires_identity_fields() {
        let app = router(test_state(AuthMode::Off));
        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/oauth")
            .header("content-type", "application/json")
            .header(BRIDGE_SECRET_HEADER, BRIDGE_SECRET)
            .body(Body::from(
                json!({ "provider": "google", "email": "priya@example.com" }).to_string(),
            ))
            .expect("request");
        let (status, _) = send(app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn verify_email_requires_email_and_token() {
        let app = router(test_state(AuthMode::Off));
        let (status, payload) = send(
            app,
            json_request("POST", "/api/auth/verify-email", json!({ "email": "a@b.c" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["message"], "Email and token are required");
    }

    #[tokio::test]
    async fn login_requires_email() {
        let app = router(test_state(AuthMode::Off));
        let (status, payload) =
            send(app, json_request("POST", "/api/auth/login", json!({}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["message"], "Email is required");
    }

    #[tokio::test]
    async fn auth_endpoints_are_rate_limited() {
        let mut state = test_state(AuthMode::Off);
        state.rate_limits.auth_per_minute = 1;
        let app = router(state);

        let (first, _) = send(
            app.clone(),
            json_request("POST", "/api/auth/login", json!({})),
        )
        .await;
        let response = tower::ServiceExt::oneshot(
            app,
            json_request("POST", "/api/auth/login", json!({})),
        )
        .await
        .expect("response");

        assert_eq!(first, StatusCode::BAD_REQUEST);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get("retry-after").is_some());
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_reset_the_limit() {
        let mut state = test_state(AuthMode::Off);
        state.rate_limits.auth_per_minute = 1;
        let app = router(state);

        let mut statuses = Vec::new();
        for octet in 0..5 {
            let request = Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header("content-type", "application/json")
                .header("x-forwarded-for", format!("10.0.0.{octet}"))
                .body(Body::from(json!({}).to_string()))
                .expect("request");
            let (status, _) = send(app.clone(), request).await;
            statuses.push(status);
        }

        assert_eq!(statuses[0], StatusCode::BAD_REQUEST);
        assert!(statuses[1..]
            .iter()
            .all(|status| *status == StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn register_shares_the_auth_limit() {
        let mut state = test_state(AuthMode::Off);
        state.rate_limits.auth_per_minute = 1;
        let app = router(state);

        let (first, payload) =
            send(app.clone(), json_request("POST", "/api/auth/register", json!({}))).await;
        let (second, _) =
            send(app, json_request("POST", "/api/auth/register", json!({}))).await;

        assert_eq!(first, StatusCode::BAD_REQUEST);
        assert_eq!(payload["code"], "OAUTH_ONLY");
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    }
}
