use std::time::Duration;

use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
}

/// Build a pool without opening a connection. The first query connects; a
/// failed connect surfaces on that query and the next one tries again.
pub fn create_lazy_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    pool_options(config).connect_lazy(&config.url)
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

pub async fn check_postgis(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) =
        sqlx::query_as("SELECT extversion FROM pg_extension WHERE extname = 'postgis'")
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

/// Create the check-in table and its spatial index if they are missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS location_checkins (
            id           UUID PRIMARY KEY,
            user_id      TEXT NOT NULL,
            location     GEOGRAPHY(POINT, 4326) NOT NULL,
            accuracy     DOUBLE PRECISION NOT NULL,
            user_agent   TEXT,
            submitted_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS location_checkins_location_gix \
         ON location_checkins USING GIST (location)",
    )
    .execute(pool)
    .await?;

    tracing::debug!("location_checkins schema ensured");
    Ok(())
}
