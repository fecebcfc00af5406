//! Storage collaborator for the ingest endpoint.
//!
//! The store is append-only: one row per accepted check-in, with a spatial
//! index over the point. Two implementations:
//! - **Postgres**: PostGIS `geography(Point, 4326)` column with a GIST index
//! - **Memory**: in-process vector for demo runs and tests

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::config::{CheckinConfig, StorageBackend};
use crate::error::CheckinError;
use crate::models::{GeoPoint, LocationRecord, NewLocation};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Append one record and return its newly assigned id.
    async fn insert(&self, location: &NewLocation) -> Result<Uuid, StoreError>;

    /// Backend status for the health endpoint.
    async fn health(&self) -> Result<serde_json::Value, StoreError>;

    /// Release connections. Called once on shutdown.
    async fn close(&self) {}

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Construct the configured store. Postgres pools are created lazily so the
/// process starts even if the database is briefly unreachable.
pub fn build_store(config: &CheckinConfig) -> Result<Arc<dyn LocationStore>, CheckinError> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryLocationStore::new())),
        StorageBackend::Postgres => {
            let pool = crate::db::create_lazy_pool(&config.database)?;
            Ok(Arc::new(PgLocationStore::new(pool)))
        }
    }
}

/// Runs a setup step until it succeeds once. Failures are not remembered, so
/// the step runs again on the next call.
#[derive(Default)]
pub(crate) struct SetupOnce {
    done: OnceCell<()>,
}

impl SetupOnce {
    pub(crate) async fn run<F, Fut, E>(&self, step: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        self.done.get_or_try_init(step).await?;
        Ok(())
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.initialized()
    }
}

// ============================================================================
// PgLocationStore
// ============================================================================

pub struct PgLocationStore {
    pool: PgPool,
    schema: SetupOnce,
}

impl PgLocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema: SetupOnce::default(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Whether the schema has been ensured on this store.
    pub fn schema_ready(&self) -> bool {
        self.schema.is_done()
    }

    /// Ensure the table exists. Only success is remembered; after a failure
    /// the next call runs the DDL again.
    async fn ready(&self) -> Result<(), StoreError> {
        self.schema
            .run(|| async {
                crate::db::ensure_schema(&self.pool).await.map_err(|e| {
                    tracing::warn!(error = %e, "Schema setup failed; will retry on next write");
                    StoreError::from(e)
                })
            })
            .await
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<LocationRecord>, StoreError> {
        self.ready().await?;

        let row = sqlx::query(
            r#"
            SELECT id, user_id,
                   ST_X(location::geometry) AS longitude,
                   ST_Y(location::geometry) AS latitude,
                   accuracy, user_agent, submitted_at
            FROM location_checkins
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(LocationRecord {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            point: GeoPoint::from_lat_lng(row.try_get("latitude")?, row.try_get("longitude")?),
            accuracy: row.try_get("accuracy")?,
            user_agent: row.try_get("user_agent")?,
            submitted_at: row.try_get("submitted_at")?,
        }))
    }
}

#[async_trait]
impl LocationStore for PgLocationStore {
    async fn insert(&self, location: &NewLocation) -> Result<Uuid, StoreError> {
        self.ready().await?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO location_checkins (id, user_id, location, accuracy, user_agent, submitted_at)
            VALUES ($1, $2, ST_SetSRID(ST_MakePoint($3, $4), 4326)::geography, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(&location.user_id)
        .bind(location.point.longitude())
        .bind(location.point.latitude())
        .bind(location.accuracy)
        .bind(&location.user_agent)
        .bind(location.submitted_at)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn health(&self) -> Result<serde_json::Value, StoreError> {
        let pg_ver = crate::db::health_check(&self.pool).await?;
        let postgis_ver = match crate::db::check_postgis(&self.pool).await {
            Ok(v) => v,
            Err(e) => format!("unavailable: {}", e),
        };
        Ok(serde_json::json!({
            "backend": self.name(),
            "postgresql": pg_ver,
            "postgis": postgis_ver,
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// MemoryLocationStore
// ============================================================================

#[derive(Default)]
pub struct MemoryLocationStore {
    records: Mutex<Vec<LocationRecord>>,
    read_only: AtomicBool,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While read-only, every insert is rejected.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<LocationRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn insert(&self, location: &NewLocation) -> Result<Uuid, StoreError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("store is read-only".to_string()));
        }

        let id = Uuid::new_v4();
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Rejected("store lock poisoned".to_string()))?;
        records.push(LocationRecord::from_new(id, location));
        Ok(id)
    }

    async fn health(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::json!({
            "backend": self.name(),
            "records": self.len(),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> NewLocation {
        NewLocation {
            user_id: "demo-user".to_string(),
            point: GeoPoint::from_lat_lng(11.0168, 76.9558),
            accuracy: 20.0,
            user_agent: Some("test-agent".to_string()),
            submitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_appends_distinct_records() {
        let store = MemoryLocationStore::new();
        let first = store.insert(&sample()).await.unwrap();
        let second = store.insert(&sample()).await.unwrap();

        assert_ne!(first, second, "same payload must not overwrite");
        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, first);
        assert_eq!(records[1].point.coordinates, [76.9558, 11.0168]);
    }

    #[tokio::test]
    async fn test_memory_store_read_only_rejects() {
        let store = MemoryLocationStore::new();
        store.set_read_only(true);

        let result = store.insert(&sample()).await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert!(store.is_empty());

        store.set_read_only(false);
        assert!(store.insert(&sample()).await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_health_reports_backend() {
        let store = MemoryLocationStore::new();
        store.insert(&sample()).await.unwrap();
        let health = store.health().await.unwrap();
        assert_eq!(health["backend"], "memory");
        assert_eq!(health["records"], 1);
    }

    #[tokio::test]
    async fn test_build_store_selects_memory_backend() {
        let config = CheckinConfig::from_toml_str(
            "[database]\nurl = \"postgresql://localhost/checkin\"\n[storage]\nbackend = \"memory\"\n",
        )
        .unwrap();
        let store = build_store(&config).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_build_store_postgres_does_not_connect_eagerly() {
        // Nothing listens on this port; construction must still succeed.
        let config = CheckinConfig::from_toml_str(
            "[database]\nurl = \"postgresql://checkin:x@127.0.0.1:1/checkin\"\n",
        )
        .unwrap();
        let store = build_store(&config).unwrap();
        assert_eq!(store.name(), "postgres");
    }

    #[tokio::test]
    async fn test_setup_once_retries_after_failure() {
        use std::sync::atomic::AtomicUsize;

        let gate = SetupOnce::default();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let step = move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(StoreError::Rejected("database starting up".to_string()))
            } else {
                Ok(())
            }
        };

        assert!(gate.run(step).await.is_err());
        assert!(!gate.is_done(), "a failed setup must not be remembered");

        assert!(gate.run(step).await.is_ok());
        assert!(gate.is_done());

        // Once it has succeeded the step is not run again.
        assert!(gate.run(step).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_build_store_bad_database_url_is_database_error() {
        let config = CheckinConfig::from_toml_str("[database]\nurl = \"not-a-database-url\"\n")
            .unwrap();
        match build_store(&config) {
            Err(CheckinError::Database(_)) => {}
            Err(e) => panic!("Expected Database error, got {}", e),
            Ok(_) => panic!("Expected Database error"),
        }
    }
}
