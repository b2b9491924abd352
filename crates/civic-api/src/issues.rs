use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use civic_core::metrics;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Executor, Pool, Postgres, QueryBuilder, Row};
use std::fmt;
use std::str::FromStr;

use crate::auth::resolve_actor;
use crate::comments::{self, CommentView};
use crate::notifications::{self, NotificationKind};
use crate::{non_blank, unix, validate_coordinates, ApiError, ApiResult, AppState};

const DEFAULT_TITLE: &str = "Issue Report";
const REPORT_ACK_COMMENT: &str =
    "Report logged! Notifying nearby users. We'll follow up in 48 hours.";
const FOLLOW_UP_DELAY_HOURS: i64 = 48;
const NEARBY_VERIFIERS: i64 = 4;
const MISSING_FIELDS: &str = "Missing required fields";

const ISSUE_SELECT: &str = "SELECT i.issue_id, i.user_id, u.name AS user_name, i.category, i.title, \
            i.description, i.area, i.latitude, i.longitude, i.status, i.created_at, i.updated_at, \
            (SELECT COUNT(*) FROM civic.votes v \
              WHERE v.issue_id = i.issue_id AND v.vote_type = 'upvote') AS upvote_count, \
            (SELECT COUNT(*) FROM civic.issue_verifications iv \
              WHERE iv.issue_id = i.issue_id AND iv.verification_type = 'confirmed') AS confirmed_count, \
            (SELECT COUNT(*) FROM civic.issue_verifications iv \
              WHERE iv.issue_id = i.issue_id AND iv.verification_type = 'disputed') AS disputed_count \
     FROM civic.issues i \
     JOIN civic.users u ON i.user_id = u.user_id \
     WHERE 1=1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IssueStatus {
    Pending,
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl IssueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueStatus::Pending => "pending",
            IssueStatus::Open => "open",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Closed => "closed",
        }
    }
}

impl FromStr for IssueStatus {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(IssueStatus::Pending),
            "open" => Ok(IssueStatus::Open),
            "in_progress" => Ok(IssueStatus::InProgress),
            "resolved" => Ok(IssueStatus::Resolved),
            "closed" => Ok(IssueStatus::Closed),
            _ => Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_STATUS",
                "Invalid issue status",
            )),
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct IssueView {
    pub issue_id: String,
    pub user_id: String,
    pub user_name: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub area: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: String,
    pub upvote_count: i64,
    pub confirmed_count: i64,
    pub disputed_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub comments: Vec<CommentView>,
}

impl IssueView {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            issue_id: row.try_get("issue_id")?,
            user_id: row.try_get("user_id")?,
            user_name: row.try_get("user_name")?,
            category: row.try_get("category")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            area: row.try_get("area")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            status: row.try_get("status")?,
            upvote_count: row.try_get("upvote_count")?,
            confirmed_count: row.try_get("confirmed_count")?,
            disputed_count: row.try_get("disputed_count")?,
            created_at: unix(row.try_get("created_at")?),
            updated_at: unix(row.try_get("updated_at")?),
            comments: Vec::new(),
        })
    }
}

#[derive(Deserialize)]
pub struct IssueFilter {
    pub area: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct CreateIssueRequest {
    pub user_id: Option<String>,
    pub category: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Serialize)]
pub struct CreateIssueResponse {
    pub message: &'static str,
    pub issue: IssueView,
    pub notified_users: usize,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct UpdateStatusRequest {
    pub user_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct UpdateStatusResponse {
    pub message: &'static str,
    pub issue_id: String,
    pub status: String,
}

/// Escapes LIKE metacharacters so user input matches literally.
pub(crate) fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub(crate) fn normalize_category(value: &str) -> String {
    value.trim().to_lowercase()
}

pub(crate) async fn ensure_issue_exists<'e, E>(executor: E, issue_id: &str) -> ApiResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let found = sqlx::query_scalar::<_, String>(
        "SELECT issue_id FROM civic.issues WHERE issue_id = $1",
    )
    .bind(issue_id)
    .fetch_optional(executor)
    .await?;
    found
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("Issue not found"))
}

/// Row-locks the issue for the rest of the transaction so per-issue writes
/// that depend on absent rows serialize.
pub(crate) async fn lock_issue<'e, E>(executor: E, issue_id: &str) -> ApiResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let found = sqlx::query_scalar::<_, String>(
        "SELECT issue_id FROM civic.issues WHERE issue_id = $1 FOR UPDATE",
    )
    .bind(issue_id)
    .fetch_optional(executor)
    .await?;
    found
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("Issue not found"))
}

async fn fetch_issue(pool: &Pool<Postgres>, issue_id: &str) -> ApiResult<IssueView> {
    let row = sqlx::query(&format!("{ISSUE_SELECT} AND i.issue_id = $1"))
        .bind(issue_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Issue not found"))?;
    let mut issue = IssueView::from_row(&row)?;
    let mut grouped = comments::load_for_issues(pool, std::slice::from_ref(&issue.issue_id)).await?;
    issue.comments = grouped.remove(&issue.issue_id).unwrap_or_default();
    Ok(issue)
}

pub async fn list_issues(
    State(state): State<AppState>,
    Query(filter): Query<IssueFilter>,
) -> ApiResult<Json<Vec<IssueView>>> {
    let status = non_blank(filter.status)
        .map(|value| value.parse::<IssueStatus>())
        .transpose()?;
    let limit = filter.limit.unwrap_or(100).clamp(1, 200);

    let mut builder = QueryBuilder::<Postgres>::new(ISSUE_SELECT);
    if let Some(area) = non_blank(filter.area) {
        builder
            .push(" AND i.area ILIKE ")
            .push_bind(format!("%{}%", escape_like(&area)));
    }
    if let Some(category) = non_blank(filter.category) {
        builder
            .push(" AND i.category = ")
            .push_bind(normalize_category(&category));
    }
    if let Some(status) = status {
        builder.push(" AND i.status = ").push_bind(status.as_str());
    }
    builder
        .push(" ORDER BY i.created_at DESC, i.issue_id DESC LIMIT ")
        .push_bind(limit);

    let rows = builder.build().fetch_all(&state.pool).await?;
    let mut issues = rows
        .iter()
        .map(IssueView::from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let ids: Vec<String> = issues.iter().map(|issue| issue.issue_id.clone()).collect();
    let mut grouped = comments::load_for_issues(&state.pool, &ids).await?;
    for issue in &mut issues {
        issue.comments = grouped.remove(&issue.issue_id).unwrap_or_default();
    }

    Ok(Json(issues))
}

pub async fn get_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
) -> ApiResult<Json<IssueView>> {
    Ok(Json(fetch_issue(&state.pool, &issue_id).await?))
}

pub async fn create_issue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateIssueRequest>,
) -> ApiResult<(StatusCode, Json<CreateIssueResponse>)> {
    let (Some(category), Some(description), Some(area)) = (
        non_blank(payload.category).map(|value| normalize_category(&value)),
        non_blank(payload.description),
        non_blank(payload.area),
    ) else {
        return Err(ApiError::bad_request(MISSING_FIELDS));
    };
    let user_id = resolve_actor(&state, &headers, payload.user_id.as_deref(), MISSING_FIELDS)?;
    validate_coordinates(payload.latitude, payload.longitude)?;
    let title = non_blank(payload.title).unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let mut tx = state.pool.begin().await?;

    let reporter_name = sqlx::query_scalar::<_, String>(
        "SELECT name FROM civic.users WHERE user_id = $1",
    )
    .bind(&user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    let issue_id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO civic.issues \
         (issue_id, user_id, category, title, description, area, latitude, longitude) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(&issue_id)
    .bind(&user_id)
    .bind(&category)
    .bind(&title)
    .bind(&description)
    .bind(&area)
    .bind(payload.latitude)
    .bind(payload.longitude)
    .execute(&mut *tx)
    .await?;

    comments::insert_comment(&mut *tx, &issue_id, None, REPORT_ACK_COMMENT, true).await?;

    notifications::insert_notification(
        &mut *tx,
        &notifications::NewNotification {
            user_id: &user_id,
            kind: NotificationKind::FollowUp,
            message: &format!(
                "You reported a {category} issue in {area}. Has it been fixed yet?"
            ),
            related_issue_id: Some(&issue_id),
            related_user_id: None,
            deliver_after: Some(chrono::Utc::now() + chrono::Duration::hours(FOLLOW_UP_DELAY_HOURS)),
        },
    )
    .await?;

    let neighbours = sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM civic.users \
         WHERE user_id <> $1 AND area IS NOT NULL AND area <> '' \
           AND (area ILIKE $2 OR $3 ILIKE '%' || area || '%') \
         ORDER BY reputation_score DESC, created_at ASC \
         LIMIT $4",
    )
    .bind(&user_id)
    .bind(format!("%{}%", escape_like(&area)))
    .bind(&area)
    .bind(NEARBY_VERIFIERS)
    .fetch_all(&mut *tx)
    .await?;

    let request_message =
        format!("{reporter_name} reported a {category} issue in {area}. Can you verify?");
    for neighbour in &neighbours {
        notifications::insert_notification(
            &mut *tx,
            &notifications::NewNotification {
                user_id: neighbour,
                kind: NotificationKind::VerificationRequest,
                message: &request_message,
                related_issue_id: Some(&issue_id),
                related_user_id: Some(&user_id),
                deliver_after: None,
            },
        )
        .await?;
    }

    tx.commit().await?;

    metrics::inc_issue_reported(crate::SERVICE_NAME, &category);
    tracing::info!(
        issue_id = %issue_id,
        category = %category,
        notified = neighbours.len(),
        "issue reported"
    );

    let issue = fetch_issue(&state.pool, &issue_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateIssueResponse {
            message: "Issue created successfully",
            issue,
            notified_users: neighbours.len(),
        }),
    ))
}

pub async fn update_issue_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(issue_id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> ApiResult<Json<UpdateStatusResponse>> {
    let status = non_blank(payload.status)
        .ok_or_else(|| ApiError::bad_request(MISSING_FIELDS))?
        .parse::<IssueStatus>()?;
    let user_id = resolve_actor(&state, &headers, payload.user_id.as_deref(), MISSING_FIELDS)?;

    let owner = sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM civic.issues WHERE issue_id = $1",
    )
    .bind(&issue_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Issue not found"))?;

    if owner != user_id {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "Only the reporter can change the issue status",
        ));
    }

    sqlx::query("UPDATE civic.issues SET status = $1, updated_at = NOW() WHERE issue_id = $2")
        .bind(status.as_str())
        .bind(&issue_id)
        .execute(&state.pool)
        .await?;
    tracing::info!(issue_id = %issue_id, status = %status, "issue status updated");

    Ok(Json(UpdateStatusResponse {
        message: "Issue status updated",
        issue_id,
        status: status.to_string(),
    }))
}
