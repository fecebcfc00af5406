use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::models::DEMO_SUBJECT_ID;

#[derive(Debug, Deserialize, Clone)]
pub struct CheckinConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub insight: InsightSettings,
    #[serde(default)]
    pub flow: FlowConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_seconds() -> u64 {
    5
}

/// Which `LocationStore` implementation backs the ingest endpoint.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Identity stamped on records whose payload carries no `userId`.
    pub default_user_id: String,
    /// Reject latitude outside [-90, 90] and longitude outside [-180, 180].
    /// Off by default: any finite pair is accepted.
    pub validate_range: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_user_id: DEMO_SUBJECT_ID.to_string(),
            validate_range: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InsightSettings {
    pub enabled: bool,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for InsightSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gemini-2.0-flash".to_string(),
            timeout_ms: 8000,
        }
    }
}

/// Whether the UI waits for the write (shows SYNCING) or moves straight to GRANTED.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Await,
    Background,
}

/// What a failed submission does to the visible flow state.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    Swallow,
    Surface,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FlowConfig {
    pub endpoint: String,
    pub subject_id: String,
    pub high_accuracy: bool,
    pub capture_timeout_ms: u64,
    pub submit_timeout_ms: u64,
    pub sync_mode: SyncMode,
    pub error_policy: ErrorPolicy,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3001/api/location".to_string(),
            subject_id: DEMO_SUBJECT_ID.to_string(),
            high_accuracy: true,
            capture_timeout_ms: 10_000,
            submit_timeout_ms: 5_000,
            sync_mode: SyncMode::Await,
            error_policy: ErrorPolicy::Swallow,
        }
    }
}

impl FlowConfig {
    /// Read only the `[flow]` section. A missing file or section yields defaults,
    /// so the client runs without the server's database settings.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;
        match s.get::<FlowConfig>("flow") {
            Ok(flow) => Ok(flow),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }
}

impl CheckinConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}
