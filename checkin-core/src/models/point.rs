use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoJsonType {
    Point,
}

/// GeoJSON Point. `coordinates` is always `[longitude, latitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: GeoJsonType,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn from_lat_lng(latitude: f64, longitude: f64) -> Self {
        Self {
            kind: GeoJsonType::Point,
            coordinates: [longitude, latitude],
        }
    }

    /// Build from an already GeoJSON-ordered `[lng, lat]` pair.
    pub fn from_coordinates(coordinates: [f64; 2]) -> Self {
        Self {
            kind: GeoJsonType::Point,
            coordinates,
        }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }

    pub fn is_in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude()) && (-180.0..=180.0).contains(&self.longitude())
    }
}
