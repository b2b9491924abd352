use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{Executor, Postgres, Row};

use crate::auth::authorize_owner;
use crate::{unix, ApiError, ApiResult, AppState};

const LIST_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    FollowUp,
    VerificationRequest,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::FollowUp => "followup",
            NotificationKind::VerificationRequest => "verification_request",
        }
    }
}

pub(crate) struct NewNotification<'a> {
    pub user_id: &'a str,
    pub kind: NotificationKind,
    pub message: &'a str,
    pub related_issue_id: Option<&'a str>,
    pub related_user_id: Option<&'a str>,
    /// Hidden from listings until this instant. `None` delivers immediately.
    pub deliver_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct NotificationView {
    pub notification_id: String,
    pub user_id: String,
    pub notification_type: String,
    pub message: String,
    pub related_issue_id: Option<String>,
    pub issue_title: Option<String>,
    pub related_user_id: Option<String>,
    pub related_user_name: Option<String>,
    pub is_read: bool,
    pub created_at: i64,
}

impl NotificationView {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            notification_id: row.try_get("notification_id")?,
            user_id: row.try_get("user_id")?,
            notification_type: row.try_get("notification_type")?,
            message: row.try_get("message")?,
            related_issue_id: row.try_get("related_issue_id")?,
            issue_title: row.try_get("issue_title")?,
            related_user_id: row.try_get("related_user_id")?,
            related_user_name: row.try_get("related_user_name")?,
            is_read: row.try_get("is_read")?,
            created_at: unix(row.try_get("created_at")?),
        })
    }
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub message: &'static str,
}

pub(crate) async fn insert_notification<'e, E>(
    executor: E,
    notification: &NewNotification<'_>,
) -> Result<String, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let notification_id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO civic.notifications \
         (notification_id, user_id, notification_type, message, related_issue_id, \
          related_user_id, deliver_after) \
         VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, NOW()))",
    )
    .bind(&notification_id)
    .bind(notification.user_id)
    .bind(notification.kind.as_str())
    .bind(notification.message)
    .bind(notification.related_issue_id)
    .bind(notification.related_user_id)
    .bind(notification.deliver_after)
    .execute(executor)
    .await?;
    Ok(notification_id)
}

pub async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<NotificationView>>> {
    authorize_owner(&state, &headers, &user_id, StatusCode::FORBIDDEN)?;

    let rows = sqlx::query(
        "SELECT n.notification_id, n.user_id, n.notification_type, n.message, \
                n.related_issue_id, i.title AS issue_title, \
                n.related_user_id, u.name AS related_user_name, \
                n.is_read, n.created_at \
         FROM civic.notifications n \
         LEFT JOIN civic.issues i ON n.related_issue_id = i.issue_id \
         LEFT JOIN civic.users u ON n.related_user_id = u.user_id \
         WHERE n.user_id = $1 AND n.deliver_after <= NOW() \
         ORDER BY GREATEST(n.deliver_after, n.created_at) DESC, n.notification_id DESC \
         LIMIT $2",
    )
    .bind(&user_id)
    .bind(LIST_LIMIT)
    .fetch_all(&state.pool)
    .await?;

    let notifications = rows
        .iter()
        .map(NotificationView::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(notification_id): Path<String>,
) -> ApiResult<Json<MarkReadResponse>> {
    let owner = sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM civic.notifications WHERE notification_id = $1",
    )
    .bind(&notification_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Notification not found"))?;

    authorize_owner(&state, &headers, &owner, StatusCode::FORBIDDEN)?;

    sqlx::query("UPDATE civic.notifications SET is_read = TRUE WHERE notification_id = $1")
        .bind(&notification_id)
        .execute(&state.pool)
        .await?;

    Ok(Json(MarkReadResponse {
        message: "Notification marked as read",
    }))
}
