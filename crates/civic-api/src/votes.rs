use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use civic_core::metrics;
use serde::{Deserialize, Serialize};

use crate::auth::resolve_actor;
use crate::issues::lock_issue;
use crate::{ApiResult, AppState};

#[derive(Deserialize, utoipa::ToSchema)]
pub struct UpvoteRequest {
    pub user_id: Option<String>,
}

#[derive(Serialize)]
pub struct UpvoteResponse {
    pub message: &'static str,
    pub upvoted: bool,
    pub upvote_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToggleOutcome {
    Removed,
    Changed,
    Added,
}

impl ToggleOutcome {
    fn from_existing(existing: Option<&str>) -> Self {
        match existing {
            Some("upvote") => ToggleOutcome::Removed,
            Some(_) => ToggleOutcome::Changed,
            None => ToggleOutcome::Added,
        }
    }

    fn message(self) -> &'static str {
        match self {
            ToggleOutcome::Removed => "Upvote removed",
            ToggleOutcome::Changed => "Changed to upvote",
            ToggleOutcome::Added => "Issue upvoted",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ToggleOutcome::Removed => "removed",
            ToggleOutcome::Changed => "changed",
            ToggleOutcome::Added => "added",
        }
    }

    fn upvoted(self) -> bool {
        self != ToggleOutcome::Removed
    }
}

pub async fn toggle_upvote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(issue_id): Path<String>,
    Json(payload): Json<UpvoteRequest>,
) -> ApiResult<Json<UpvoteResponse>> {
    let user_id = resolve_actor(
        &state,
        &headers,
        payload.user_id.as_deref(),
        "User ID is required",
    )?;

    let mut tx = state.pool.begin().await?;
    lock_issue(&mut *tx, &issue_id).await?;

    let existing = sqlx::query_scalar::<_, String>(
        "SELECT vote_type FROM civic.votes WHERE issue_id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(&issue_id)
    .bind(&user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = ToggleOutcome::from_existing(existing.as_deref());
    match outcome {
        ToggleOutcome::Removed => {
            sqlx::query("DELETE FROM civic.votes WHERE issue_id = $1 AND user_id = $2")
                .bind(&issue_id)
                .bind(&user_id)
                .execute(&mut *tx)
                .await?;
        }
        ToggleOutcome::Changed => {
            sqlx::query(
                "UPDATE civic.votes SET vote_type = 'upvote', created_at = NOW() \
                 WHERE issue_id = $1 AND user_id = $2",
            )
            .bind(&issue_id)
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;
        }
        ToggleOutcome::Added => {
            sqlx::query(
                "INSERT INTO civic.votes (vote_id, issue_id, user_id, vote_type) \
                 VALUES ($1, $2, $3, 'upvote') \
                 ON CONFLICT (issue_id, user_id) DO NOTHING",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&issue_id)
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;
        }
    }

    let upvote_count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM civic.votes WHERE issue_id = $1 AND vote_type = 'upvote'",
    )
    .bind(&issue_id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    metrics::inc_upvote_toggle(crate::SERVICE_NAME, outcome.label());

    Ok(Json(UpvoteResponse {
        message: outcome.message(),
        upvoted: outcome.upvoted(),
        upvote_count,
    }))
}
