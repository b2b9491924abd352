use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use civic_core::metrics;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::str::FromStr;

use crate::auth::resolve_actor;
use crate::comments::insert_comment;
use crate::issues::ensure_issue_exists;
use crate::{non_blank, unix, ApiError, ApiResult, AppState};

const MISSING_FIELDS: &str = "Missing required fields";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VerificationType {
    Confirmed,
    Disputed,
    AdditionalInfo,
}

impl VerificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationType::Confirmed => "confirmed",
            VerificationType::Disputed => "disputed",
            VerificationType::AdditionalInfo => "additional_info",
        }
    }

    /// Text of the comment appended to the issue thread.
    pub fn comment_text(self, has_media: bool, comments: &str) -> String {
        match (self, has_media) {
            (VerificationType::Confirmed, true) => "✓ Confirmed (with photo/video)".to_string(),
            (VerificationType::Confirmed, false) => "✓ Confirmed by community member".to_string(),
            (VerificationType::Disputed, true) => "✗ Disputed (with evidence)".to_string(),
            (VerificationType::Disputed, false) => "✗ Disputed by community member".to_string(),
            (VerificationType::AdditionalInfo, _) => {
                format!("ℹ️ Additional information: {comments}")
            }
        }
    }
}

impl FromStr for VerificationType {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "confirmed" => Ok(VerificationType::Confirmed),
            "disputed" => Ok(VerificationType::Disputed),
            "additional_info" => Ok(VerificationType::AdditionalInfo),
            _ => Err(ApiError::bad_request("Invalid verification type")),
        }
    }
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SubmitVerificationRequest {
    pub issue_id: Option<String>,
    pub user_id: Option<String>,
    pub verification_type: Option<String>,
    #[serde(default)]
    pub has_media: Option<bool>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VerificationView {
    pub verification_id: String,
    pub issue_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub verification_type: String,
    pub has_media: bool,
    pub comments: String,
    pub created_at: i64,
}

impl VerificationView {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            verification_id: row.try_get("verification_id")?,
            issue_id: row.try_get("issue_id")?,
            user_id: row.try_get("user_id")?,
            user_name: row.try_get("user_name")?,
            verification_type: row.try_get("verification_type")?,
            has_media: row.try_get("has_media")?,
            comments: row.try_get("comments")?,
            created_at: unix(row.try_get("created_at")?),
        })
    }
}

#[derive(Serialize)]
pub struct SubmitVerificationResponse {
    pub message: &'static str,
    pub verification: VerificationView,
}

pub async fn submit_verification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SubmitVerificationRequest>,
) -> ApiResult<(StatusCode, Json<SubmitVerificationResponse>)> {
    let (Some(issue_id), Some(kind)) = (
        non_blank(payload.issue_id),
        non_blank(payload.verification_type),
    ) else {
        return Err(ApiError::bad_request(MISSING_FIELDS));
    };
    let user_id = resolve_actor(&state, &headers, payload.user_id.as_deref(), MISSING_FIELDS)?;
    let kind = kind.parse::<VerificationType>()?;
    let has_media = payload.has_media.unwrap_or(false);
    let comments = payload.comments.unwrap_or_default();

    let mut tx = state.pool.begin().await?;
    ensure_issue_exists(&mut *tx, &issue_id).await?;

    let verification_id = sqlx::query_scalar::<_, String>(
        "INSERT INTO civic.issue_verifications \
         (verification_id, issue_id, user_id, verification_type, has_media, comments) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (issue_id, user_id) DO UPDATE SET \
           verification_type = EXCLUDED.verification_type, \
           has_media = EXCLUDED.has_media, \
           comments = EXCLUDED.comments, \
           created_at = NOW() \
         RETURNING verification_id",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&issue_id)
    .bind(&user_id)
    .bind(kind.as_str())
    .bind(has_media)
    .bind(&comments)
    .fetch_one(&mut *tx)
    .await?;

    let text = kind.comment_text(has_media, &comments);
    insert_comment(&mut *tx, &issue_id, Some(&user_id), &text, false).await?;

    let row = sqlx::query(
        "SELECT v.verification_id, v.issue_id, v.user_id, u.name AS user_name, \
                v.verification_type, v.has_media, v.comments, v.created_at \
         FROM civic.issue_verifications v \
         LEFT JOIN civic.users u ON v.user_id = u.user_id \
         WHERE v.verification_id = $1",
    )
    .bind(&verification_id)
    .fetch_one(&mut *tx)
    .await?;
    let verification = VerificationView::from_row(&row)?;
    tx.commit().await?;

    metrics::inc_verification_submitted(crate::SERVICE_NAME, kind.as_str());
    tracing::info!(
        issue_id = %issue_id,
        verification_type = kind.as_str(),
        "verification submitted"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubmitVerificationResponse {
            message: "Verification submitted successfully",
            verification,
        }),
    ))
}

pub async fn list_verifications(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
) -> ApiResult<Json<Vec<VerificationView>>> {
    let rows = sqlx::query(
        "SELECT v.verification_id, v.issue_id, v.user_id, u.name AS user_name, \
                v.verification_type, v.has_media, v.comments, v.created_at \
         FROM civic.issue_verifications v \
         LEFT JOIN civic.users u ON v.user_id = u.user_id \
         WHERE v.issue_id = $1 \
         ORDER BY v.created_at DESC, v.verification_id DESC",
    )
    .bind(&issue_id)
    .fetch_all(&state.pool)
    .await?;

    let verifications = rows
        .iter()
        .map(VerificationView::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(verifications))
}
