use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;

pub async fn connect(database_url: &str, max_connections: u32) -> Result<Pool<Postgres>> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;
    tracing::info!(max_connections, "database pool ready");
    Ok(pool)
}

pub async fn check_ready(pool: &Pool<Postgres>) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
