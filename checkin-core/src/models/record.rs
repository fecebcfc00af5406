use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::GeoPoint;

/// A validated check-in ready to be written. The store assigns nothing but
/// the id; everything else is fixed by the ingest endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLocation {
    pub user_id: String,
    pub point: GeoPoint,
    pub accuracy: f64,
    pub user_agent: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// One persisted check-in. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub id: Uuid,
    pub user_id: String,
    pub point: GeoPoint,
    pub accuracy: f64,
    pub user_agent: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl LocationRecord {
    pub fn from_new(id: Uuid, new: &NewLocation) -> Self {
        Self {
            id,
            user_id: new.user_id.clone(),
            point: new.point,
            accuracy: new.accuracy,
            user_agent: new.user_agent.clone(),
            submitted_at: new.submitted_at,
        }
    }
}
