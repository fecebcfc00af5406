use axum::http::StatusCode;
use checkin_core::config::IngestConfig;
use checkin_core::{GeoPoint, LocationStore, NewLocation, StoreError};
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),

    #[error("Failed to save location: {0}")]
    Storage(#[from] StoreError),
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn coordinates(payload: &Value) -> Result<[f64; 2], IngestError> {
    let invalid = || {
        IngestError::Validation("coordinates must be an array of two numbers".to_string())
    };

    let items = payload["coordinates"].as_array().ok_or_else(invalid)?;
    if items.len() != 2 {
        return Err(invalid());
    }

    let lng = items[0].as_f64().filter(|v| v.is_finite()).ok_or_else(invalid)?;
    let lat = items[1].as_f64().filter(|v| v.is_finite()).ok_or_else(invalid)?;
    Ok([lng, lat])
}

fn non_empty_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload[key].as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Check a raw submission and build the record to persist.
///
/// `submittedAt` is always the server's clock; any client-sent value is ignored.
pub fn validate(payload: &Value, config: &IngestConfig) -> Result<NewLocation, IngestError> {
    let coordinates = coordinates(payload)?;

    let accuracy = payload["accuracy"]
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| IngestError::Validation("accuracy is required and must be a number".to_string()))?;

    let point = GeoPoint::from_coordinates(coordinates);
    if config.validate_range && !point.is_in_range() {
        return Err(IngestError::Validation(
            "coordinates out of range: longitude must be within [-180, 180] and latitude within [-90, 90]"
                .to_string(),
        ));
    }

    let user_id = non_empty_str(payload, "userId").unwrap_or(config.default_user_id.as_str());

    Ok(NewLocation {
        user_id: user_id.to_string(),
        point,
        accuracy,
        user_agent: non_empty_str(payload, "userAgent").map(str::to_string),
        submitted_at: Utc::now(),
    })
}

/// Validate and append one check-in. `fallback_user_agent` (usually the
/// request's `User-Agent` header) is used when the body carries none.
pub async fn ingest(
    store: &dyn LocationStore,
    payload: &Value,
    fallback_user_agent: Option<&str>,
    config: &IngestConfig,
) -> Result<Uuid, IngestError> {
    let mut location = match validate(payload, config) {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected location submission");
            return Err(e);
        }
    };

    if location.user_agent.is_none() {
        location.user_agent = fallback_user_agent.map(str::to_string);
    }

    match store.insert(&location).await {
        Ok(id) => {
            tracing::info!(
                id = %id,
                user_id = %location.user_id,
                backend = store.name(),
                "Stored location check-in"
            );
            Ok(id)
        }
        Err(e) => {
            tracing::error!(error = %e, backend = store.name(), "Failed to store location check-in");
            Err(e.into())
        }
    }
}
