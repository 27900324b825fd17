//! Value types shared by the watch engine and its collaborators.

use serde::{Deserialize, Serialize};

/// Anchor position and swing radius.
///
/// Replaced wholesale whenever the anchor is set or lifted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorConfig {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Alarm radius in meters
    pub radius_meters: f32,
}

impl AnchorConfig {
    pub fn new(latitude: f64, longitude: f64, radius_meters: f32) -> Self {
        AnchorConfig {
            latitude,
            longitude,
            radius_meters,
        }
    }

    /// Coordinates are finite and within WGS-84 bounds, radius is positive
    pub fn is_valid(&self) -> bool {
        valid_position(self.latitude, self.longitude)
            && self.radius_meters.is_finite()
            && self.radius_meters > 0.0
    }
}

/// Directional sector and inner (hysteresis) radius settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorConfig {
    /// Whether the sector restriction is applied
    pub enabled: bool,
    /// Center heading of the sector, 0-359 degrees
    pub heading_deg: i32,
    /// Total sector width, 0-360 degrees (0 = full circle)
    pub sector_width_deg: i32,
    /// Inside this distance any alarm is cleared unconditionally
    pub inner_radius_meters: f64,
}

impl SectorConfig {
    /// Sector only restricts anything when enabled with a non-zero width
    pub fn is_active(&self) -> bool {
        self.enabled && self.sector_width_deg != 0
    }
}

impl Default for SectorConfig {
    fn default() -> Self {
        SectorConfig {
            enabled: false,
            heading_deg: 180,
            sector_width_deg: 0,
            inner_radius_meters: 5.0,
        }
    }
}

/// One raw position sample from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub lat: f64,
    pub lon: f64,
    /// Horizontal accuracy estimate in meters
    pub accuracy_meters: f32,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
}

impl Fix {
    pub fn new(lat: f64, lon: f64, accuracy_meters: f32, timestamp_ms: i64) -> Self {
        Fix {
            lat,
            lon,
            accuracy_meters,
            timestamp_ms,
        }
    }

    /// Finite and inside [-90, 90] x [-180, 180]
    pub fn is_valid(&self) -> bool {
        valid_position(self.lat, self.lon)
    }
}

/// A recorded fix in the trace log.
///
/// `id` is assigned by the trace store and is monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracePoint {
    pub id: i64,
    pub timestamp_ms: i64,
    pub lat: f64,
    pub lon: f64,
    pub accuracy_meters: f32,
}

impl TracePoint {
    /// Build an unsaved point (id 0) from a fix
    pub fn from_fix(fix: &Fix) -> Self {
        TracePoint {
            id: 0,
            timestamp_ms: fix.timestamp_ms,
            lat: fix.lat,
            lon: fix.lon,
            accuracy_meters: fix.accuracy_meters,
        }
    }
}

fn valid_position(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}
