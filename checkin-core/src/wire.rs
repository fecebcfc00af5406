//! JSON bodies exchanged between the capture flow and the ingest endpoint.

use serde::{Deserialize, Serialize};

use crate::models::SubmissionPayload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
    pub accuracy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl From<&SubmissionPayload> for IngestRequest {
    fn from(payload: &SubmissionPayload) -> Self {
        Self {
            user_id: Some(payload.subject_id.clone()),
            coordinates: payload.point.coordinates,
            accuracy: payload.accuracy,
            user_agent: Some(payload.client_context.clone()),
        }
    }
}

/// 201 body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestCreated {
    pub success: bool,
    pub id: String,
}

/// 400 body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRejected {
    pub error: String,
}

/// 500 body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFailed {
    pub success: bool,
    pub error: String,
}

impl IngestCreated {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            success: true,
            id: id.into(),
        }
    }
}

impl IngestFailed {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
