//! Anchor Zone Evaluation
//!
//! Defines the safe area around the anchor and classifies fixes against it.
//!
//! The safe area is the union of:
//! - the inner circle (`inner_radius_meters`), which always clears an alarm
//! - the swing circle (`radius_meters`), restricted to the sector when one is active
//!
//! ```text
//!            heading
//!               |
//!        \      |      /      swing circle, sector slice only
//!         \   .-+-.   /
//!          \ /  |  \ /
//!           |   o   |         o = anchor, inner circle always safe
//!            \     /
//!             '---'
//! ```

use serde::{Deserialize, Serialize};

use crate::geo::{bearing_deg, bearing_in_sector, distance_meters};
use crate::model::{AnchorConfig, SectorConfig};

/// Where a fix lies relative to the safe area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZoneVerdict {
    /// Closer than the inner radius: clears any alarm regardless of sector
    InnerCircle,
    /// Within the swing radius and the allowed sector
    Inside,
    /// Within the swing radius but on a bearing outside the sector
    OutsideSector,
    /// Beyond the swing radius
    OutsideRadius,
}

impl ZoneVerdict {
    /// Whether this verdict clears an alarm
    pub fn is_safe(&self) -> bool {
        matches!(self, ZoneVerdict::InnerCircle | ZoneVerdict::Inside)
    }
}

/// Result of evaluating one position against the zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneCheck {
    /// Distance from the anchor in meters
    pub distance: f64,
    /// Bearing from the anchor in degrees
    pub bearing: f64,
    pub verdict: ZoneVerdict,
}

/// Anchor plus sector settings, the complete containment rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorZone {
    pub anchor: AnchorConfig,
    pub sector: SectorConfig,
}

impl AnchorZone {
    pub fn new(anchor: AnchorConfig, sector: SectorConfig) -> Self {
        AnchorZone { anchor, sector }
    }

    /// Classify a position
    pub fn check(&self, lat: f64, lon: f64) -> ZoneCheck {
        let a = &self.anchor;
        let distance = distance_meters(a.latitude, a.longitude, lat, lon);
        let bearing = bearing_deg(a.latitude, a.longitude, lat, lon);

        let verdict = if distance < self.sector.inner_radius_meters {
            ZoneVerdict::InnerCircle
        } else if distance > a.radius_meters as f64 {
            ZoneVerdict::OutsideRadius
        } else if self.sector.is_active()
            && !bearing_in_sector(bearing, self.sector.heading_deg, self.sector.sector_width_deg)
        {
            ZoneVerdict::OutsideSector
        } else {
            ZoneVerdict::Inside
        };

        ZoneCheck {
            distance,
            bearing,
            verdict,
        }
    }
}
