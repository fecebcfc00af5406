//! Host geolocation capability consumed by the capture flow.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Options for one position request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix the host may return. Zero forces a fresh acquisition.
    pub maximum_age: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub timestamp_ms: i64,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    #[error("permission-denied")]
    PermissionDenied,

    #[error("position-unavailable")]
    PositionUnavailable,

    #[error("timeout")]
    Timeout,
}

#[async_trait]
pub trait GeolocationHost: Send + Sync {
    /// One-shot position request.
    async fn current_position(&self, options: &PositionOptions)
        -> Result<HostPosition, HostError>;

    /// Host name for logging.
    fn name(&self) -> &str;
}

/// Replays a fixed outcome after an optional delay. Honors `options.timeout`
/// the way a real host does: a fix slower than the timeout is a `Timeout`.
#[derive(Debug, Clone)]
pub struct StaticHost {
    outcome: Result<HostPosition, HostError>,
    delay: Duration,
}

impl StaticHost {
    pub fn new(outcome: Result<HostPosition, HostError>) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl GeolocationHost for StaticHost {
    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<HostPosition, HostError> {
        if self.delay > options.timeout {
            tokio::time::sleep(options.timeout).await;
            return Err(HostError::Timeout);
        }
        tokio::time::sleep(self.delay).await;
        self.outcome
    }

    fn name(&self) -> &str {
        "static"
    }
}
