use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use crate::auth::authorize_owner;
use crate::{unix, validate_coordinates, ApiError, ApiResult, AppState};

pub(crate) const USER_COLUMNS: &str = "user_id, name, email, picture_url, area, latitude, longitude, \
     reputation_score, is_verified, email_verified, created_at";

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub picture_url: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub reputation_score: i32,
    pub is_verified: bool,
    pub email_verified: bool,
    pub created_at: i64,
}

impl UserProfile {
    pub(crate) fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            picture_url: row.try_get("picture_url")?,
            area: row.try_get("area")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            reputation_score: row.try_get("reputation_score")?,
            is_verified: row.try_get("is_verified")?,
            email_verified: row.try_get("email_verified")?,
            created_at: unix(row.try_get("created_at")?),
        })
    }
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Serialize)]
pub struct UpdateUserResponse {
    pub message: &'static str,
    pub user: UserProfile,
}

pub(crate) async fn fetch_profile(
    pool: &Pool<Postgres>,
    user_id: &str,
) -> Result<Option<UserProfile>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM civic.users WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(UserProfile::from_row).transpose()
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserProfile>> {
    let user = fetch_profile(&state.pool, &user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user))
}

pub async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<Json<UpdateUserResponse>> {
    authorize_owner(&state, &headers, &user_id, StatusCode::UNAUTHORIZED)?;

    let name = match payload.name {
        Some(name) if name.trim().is_empty() => {
            return Err(ApiError::bad_request("name must not be blank"));
        }
        Some(name) => Some(name.trim().to_string()),
        None => None,
    };
    let area = payload.area.map(|area| area.trim().to_string());
    validate_coordinates(payload.latitude, payload.longitude)?;

    let row = sqlx::query(&format!(
        "UPDATE civic.users \
         SET name = COALESCE($1, name), \
             area = COALESCE($2, area), \
             latitude = COALESCE($3, latitude), \
             longitude = COALESCE($4, longitude), \
             updated_at = NOW() \
         WHERE user_id = $5 \
         RETURNING {USER_COLUMNS}"
    ))
    .bind(name)
    .bind(area)
    .bind(payload.latitude)
    .bind(payload.longitude)
    .bind(&user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(UpdateUserResponse {
        message: "Profile updated successfully",
        user: UserProfile::from_row(&row)?,
    }))
}
