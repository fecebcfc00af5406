use serde::{Deserialize, Serialize};

/// A one-shot fix reported by the host geolocation capability.
///
/// Lives only for the duration of one capture attempt; it is dropped once a
/// `SubmissionPayload` has been built from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapturedPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of uncertainty in meters.
    pub accuracy: f64,
    /// Milliseconds since the Unix epoch, as reported by the host.
    pub captured_at_ms: i64,
}
