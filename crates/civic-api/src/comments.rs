use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Executor, Pool, Postgres, Row};
use std::collections::HashMap;

use crate::auth::resolve_actor;
use crate::issues::ensure_issue_exists;
use crate::{non_blank, unix, ApiError, ApiResult, AppState};

const COMMENT_SELECT: &str = "SELECT c.comment_id, c.issue_id, c.user_id, u.name AS user_name, \
            c.content, c.is_official, c.created_at \
     FROM civic.comments c \
     LEFT JOIN civic.users u ON c.user_id = u.user_id";

const MISSING_COMMENT_FIELDS: &str = "User ID and comment content are required";

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CommentView {
    pub comment_id: String,
    pub issue_id: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub content: String,
    pub is_official: bool,
    pub created_at: i64,
}

impl CommentView {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            comment_id: row.try_get("comment_id")?,
            issue_id: row.try_get("issue_id")?,
            user_id: row.try_get("user_id")?,
            user_name: row.try_get("user_name")?,
            content: row.try_get("content")?,
            is_official: row.try_get("is_official")?,
            created_at: unix(row.try_get("created_at")?),
        })
    }
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct AddCommentRequest {
    pub user_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Serialize)]
pub struct AddCommentResponse {
    pub message: &'static str,
    pub comment: CommentView,
}

/// Appends a comment. `user_id` of `None` marks a system comment.
pub(crate) async fn insert_comment<'e, E>(
    executor: E,
    issue_id: &str,
    user_id: Option<&str>,
    content: &str,
    is_official: bool,
) -> Result<String, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let comment_id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO civic.comments (comment_id, issue_id, user_id, content, is_official) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&comment_id)
    .bind(issue_id)
    .bind(user_id)
    .bind(content)
    .bind(is_official)
    .execute(executor)
    .await?;
    Ok(comment_id)
}

/// Loads comments for many issues at once, oldest first per issue.
pub(crate) async fn load_for_issues(
    pool: &Pool<Postgres>,
    issue_ids: &[String],
) -> Result<HashMap<String, Vec<CommentView>>, sqlx::Error> {
    let mut grouped: HashMap<String, Vec<CommentView>> = HashMap::new();
    if issue_ids.is_empty() {
        return Ok(grouped);
    }

    let rows = sqlx::query(&format!(
        "{COMMENT_SELECT} WHERE c.issue_id = ANY($1) ORDER BY c.created_at ASC, c.comment_id ASC"
    ))
    .bind(issue_ids)
    .fetch_all(pool)
    .await?;

    for row in rows {
        let comment = CommentView::from_row(&row)?;
        grouped
            .entry(comment.issue_id.clone())
            .or_default()
            .push(comment);
    }
    Ok(grouped)
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
) -> ApiResult<Json<Vec<CommentView>>> {
    ensure_issue_exists(&state.pool, &issue_id).await?;
    let mut grouped = load_for_issues(&state.pool, std::slice::from_ref(&issue_id)).await?;
    Ok(Json(grouped.remove(&issue_id).unwrap_or_default()))
}

pub async fn add_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(issue_id): Path<String>,
    Json(payload): Json<AddCommentRequest>,
) -> ApiResult<Json<AddCommentResponse>> {
    let content = non_blank(payload.content)
        .ok_or_else(|| ApiError::bad_request(MISSING_COMMENT_FIELDS))?;
    let user_id = resolve_actor(
        &state,
        &headers,
        payload.user_id.as_deref(),
        MISSING_COMMENT_FIELDS,
    )?;

    ensure_issue_exists(&state.pool, &issue_id).await?;
    let comment_id =
        insert_comment(&state.pool, &issue_id, Some(&user_id), &content, false).await?;

    let row = sqlx::query(&format!("{COMMENT_SELECT} WHERE c.comment_id = $1"))
        .bind(&comment_id)
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(AddCommentResponse {
        message: "Comment added successfully",
        comment: CommentView::from_row(&row)?,
    }))
}

#[cfg(test)]
mod tests {
    use crate::router;
    use crate::test_support::{authed_json_request, json_request, send, test_state};
    use axum::http::StatusCode;
    use civic_core::auth::AuthMode;
    use serde_json::json;

    #[tokio::test]
    async fn blank_content_is_rejected() {
        let app = router(test_state(AuthMode::Off));
        let (status, payload) = send(
            app,
            json_request(
                "POST",
                "/api/issues/issue-1/comments",
                json!({ "user_id": "user-1", "content": "   " }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["message"], "User ID and comment content are required");
    }

    #[tokio::test]
    async fn missing_user_is_rejected() {
        let app = router(test_state(AuthMode::Off));
        let (status, payload) = send(
            app,
            json_request(
                "POST",
                "/api/issues/issue-1/comments",
                json!({ "content": "Still there this morning" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["message"], "User ID and comment content are required");
    }

    #[tokio::test]
    async fn mismatched_token_is_rejected() {
        let app = router(test_state(AuthMode::Off));
        let (status, _) = send(
            app,
            authed_json_request(
                "POST",
                "/api/issues/issue-1/comments",
                json!({ "user_id": "user-1", "content": "hello" }),
                "user-2",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
