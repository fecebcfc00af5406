use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CapturedPoint, GeoPoint};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub subject_id: String,
    pub point: GeoPoint,
    pub accuracy: f64,
    /// Time the payload was built for submission, not the capture time.
    pub submitted_at: DateTime<Utc>,
    /// User-agent style descriptor of the submitting client.
    pub client_context: String,
}

impl SubmissionPayload {
    pub fn from_capture(
        point: &CapturedPoint,
        subject_id: impl Into<String>,
        client_context: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            point: GeoPoint::from_lat_lng(point.latitude, point.longitude),
            accuracy: point.accuracy,
            submitted_at: Utc::now(),
            client_context: client_context.into(),
        }
    }
}
