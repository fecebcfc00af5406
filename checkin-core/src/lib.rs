pub mod config;
pub mod db;
pub mod error;
pub mod insight;
pub mod models;
pub mod store;
pub mod wire;

pub use config::CheckinConfig;
pub use error::CheckinError;
pub use insight::{
    FallbackInsightClient, GeminiInsightClient, InsightBackend, InsightConfig, InsightError,
    LocationInsight,
};
pub use models::{
    CapturedPoint, GeoPoint, LocationRecord, NewLocation, SubmissionPayload, DEMO_SUBJECT_ID,
};
pub use store::{LocationStore, MemoryLocationStore, PgLocationStore, StoreError};
