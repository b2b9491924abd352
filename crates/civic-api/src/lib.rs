use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use civic_core::auth::{AuthMode, JwtConfig, DEFAULT_TOKEN_TTL_SECONDS};
use civic_core::rate_limit::RateLimiter;
use civic_core::{config, db, http, logging, metrics, server};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Pool, Postgres};
use std::net::SocketAddr;
use std::sync::Arc;

mod assistant;
mod auth;
mod chat;
mod comments;
mod issues;
mod notifications;
mod openapi;
mod users;
mod verifications;
mod votes;

#[cfg(test)]
mod test_support;

pub(crate) const SERVICE_NAME: &str = "civic-api";

#[derive(Clone)]
pub(crate) struct AppState {
    pool: Pool<Postgres>,
    jwt_config: JwtConfig,
    auth_mode: AuthMode,
    oauth_bridge_secret: Arc<str>,
    rate_limiter: Arc<RateLimiter>,
    rate_limits: RateLimits,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub auth_per_minute: u64,
    pub chat_per_minute: u64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub(crate) struct ErrorResponse {
    #[schema(value_type = String)]
    code: &'static str,
    message: String,
    #[schema(value_type = Option<Object>)]
    details: Option<Value>,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
    headers: Vec<(&'static str, String)>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            headers: Vec::new(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn with_header(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                tracing::warn!(error = %db_err, "unique constraint violation");
                return ApiError::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
            }
            if db_err.is_foreign_key_violation() {
                return ApiError::not_found("referenced issue or user not found");
            }
        }
        tracing::error!(error = %err, "database error");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let payload = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
        (self.status, headers, Json(payload)).into_response()
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct HealthStatus {
    status: String,
}

pub struct ApiConfig {
    pub addr: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub auth_mode: AuthMode,
    pub oauth_bridge_secret: String,
    pub rate_limits: RateLimits,
}

pub fn load_config() -> Result<ApiConfig> {
    let addr = config::socket_addr_from_env("API_ADDR", "0.0.0.0:5001")?;
    let database_url = config::required_env("DATABASE_URL")?;
    let database_max_connections = config::parse_env_or("DATABASE_MAX_CONNECTIONS", 10u32)?;
    let jwt = JwtConfig {
        issuer: config::parse_env_or("JWT_ISSUER", "civic-api".to_string())?,
        audience: config::parse_env_or("JWT_AUDIENCE", "civic-web".to_string())?,
        secret: config::required_env("JWT_SECRET")?,
        ttl_seconds: config::parse_env_or("JWT_TTL_SECONDS", DEFAULT_TOKEN_TTL_SECONDS)?,
    };
    let auth_mode = config::parse_env_or("AUTH_MODE", AuthMode::Off)?;
    let oauth_bridge_secret = config::required_env("OAUTH_BRIDGE_SECRET")?;
    let rate_limits = RateLimits {
        auth_per_minute: config::parse_env_or("RATE_LIMIT_AUTH_PER_MINUTE", 20u64)?,
        chat_per_minute: config::parse_env_or("RATE_LIMIT_CHAT_PER_MINUTE", 60u64)?,
    };
    Ok(ApiConfig {
        addr,
        database_url,
        database_max_connections,
        jwt,
        auth_mode,
        oauth_bridge_secret,
        rate_limits,
    })
}

pub async fn run(config: ApiConfig) -> Result<()> {
    logging::init(SERVICE_NAME);
    metrics::init(SERVICE_NAME);

    let pool = db::connect(&config.database_url, config.database_max_connections).await?;
    tracing::info!(auth_mode = ?config.auth_mode, "auth mode");

    let state = AppState {
        pool,
        jwt_config: config.jwt,
        auth_mode: config.auth_mode,
        oauth_bridge_secret: Arc::from(config.oauth_bridge_secret),
        rate_limiter: Arc::new(RateLimiter::new()),
        rate_limits: config.rate_limits,
    };

    let router = http::apply_standard_layers(router(state), SERVICE_NAME);
    server::serve(config.addr, router).await
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/openapi.json", get(openapi_json))
        .route("/api/auth/oauth", post(auth::oauth_exchange))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/verify-email", post(auth::verify_email))
        .route(
            "/api/users/:id",
            get(users::get_user).put(users::update_user),
        )
        .route(
            "/api/issues",
            get(issues::list_issues).post(issues::create_issue),
        )
        .route("/api/issues/:id", get(issues::get_issue))
        .route("/api/issues/:id/status", put(issues::update_issue_status))
        .route(
            "/api/issues/:id/comments",
            get(comments::list_comments).post(comments::add_comment),
        )
        .route("/api/issues/:id/upvote", post(votes::toggle_upvote))
        .route("/api/verifications", post(verifications::submit_verification))
        .route("/api/verifications/:id", get(verifications::list_verifications))
        .route("/api/chat", post(chat::send_message))
        .route("/api/chat/:id", get(chat::chat_history))
        .route("/api/notifications/:id", get(notifications::list_notifications))
        .route("/api/notifications/:id/read", put(notifications::mark_read))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match db::check_ready(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(HealthStatus { status: "ok".into() })),
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus {
                    status: "unavailable".into(),
                }),
            )
        }
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    metrics::metrics_response(SERVICE_NAME)
}

async fn openapi_json(headers: HeaderMap) -> impl IntoResponse {
    let server_url = openapi::infer_server_url(&headers);
    Json(openapi::document(server_url.as_deref()))
}

pub(crate) fn unix(ts: chrono::DateTime<chrono::Utc>) -> i64 {
    ts.timestamp()
}

/// Trims `value` and drops it when nothing is left.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn validate_coordinates(latitude: Option<f64>, longitude: Option<f64>) -> ApiResult<()> {
    let lat_ok = latitude.map_or(true, |lat| (-90.0..=90.0).contains(&lat));
    let lon_ok = longitude.map_or(true, |lon| (-180.0..=180.0).contains(&lon));
    if lat_ok && lon_ok {
        return Ok(());
    }
    Err(ApiError::new(
        StatusCode::BAD_REQUEST,
        "INVALID_COORDINATES",
        "coordinates out of range",
    )
    .with_details(serde_json::json!({ "latitude": latitude, "longitude": longitude })))
}
