use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{Pool, Postgres};

const SEED_EMAIL: &str = "priya.k@example.com";
const SEED_USER_NAME: &str = "Priya K";
const SEED_AREA: &str = "Indiranagar, Bangalore";
const SEED_ISSUE_ID: &str = "seed-pothole-indiranagar";

#[derive(Debug, Serialize)]
pub struct SeedSummary {
    pub user_id: String,
    pub issue_id: String,
    pub issue_created: bool,
}

/// Idempotent: re-running keeps the existing demo rows.
pub async fn seed(pool: &Pool<Postgres>) -> Result<SeedSummary> {
    let mut tx = pool.begin().await?;

    let user_id: String = sqlx::query_scalar(
        "INSERT INTO civic.users \
         (user_id, name, email, area, latitude, longitude, reputation_score, \
          is_verified, email_verified) \
         VALUES ($1, $2, $3, $4, 12.9784, 77.6408, 120, TRUE, TRUE) \
         ON CONFLICT (email) DO UPDATE SET updated_at = NOW() \
         RETURNING user_id",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(SEED_USER_NAME)
    .bind(SEED_EMAIL)
    .bind(SEED_AREA)
    .fetch_one(&mut *tx)
    .await
    .context("seed demo user")?;

    let result = sqlx::query(
        "INSERT INTO civic.issues \
         (issue_id, user_id, category, title, description, area, latitude, longitude, status) \
         VALUES ($1, $2, 'potholes', 'Pothole on 100 Feet Road', \
                 'Large pothole near the metro station, two-wheelers swerving into traffic.', \
                 $3, 12.9784, 77.6408, 'open') \
         ON CONFLICT (issue_id) DO NOTHING",
    )
    .bind(SEED_ISSUE_ID)
    .bind(&user_id)
    .bind(SEED_AREA)
    .execute(&mut *tx)
    .await
    .context("seed sample issue")?;
    let inserted = result.rows_affected() > 0;

    if inserted {
        sqlx::query(
            "INSERT INTO civic.comments (comment_id, issue_id, user_id, content, is_official) \
             VALUES ($1, $2, NULL, \
                     'Report logged! Notifying nearby users. We''ll follow up in 48 hours.', TRUE)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(SEED_ISSUE_ID)
        .execute(&mut *tx)
        .await
        .context("seed official comment")?;
    }

    tx.commit().await?;
    tracing::info!(user_id = %user_id, issue_created = inserted, "demo data seeded");

    Ok(SeedSummary {
        user_id,
        issue_id: SEED_ISSUE_ID.to_string(),
        issue_created: inserted,
    })
}
