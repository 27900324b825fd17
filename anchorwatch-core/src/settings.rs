//! Persistent watch settings.
//!
//! Settings live in one flat key-value namespace provided by the host
//! ([`KeyValueStore`]). [`Prefs`] is the typed view over it: it owns the key
//! names, the defaults and the clamping rules, so every backend behaves the
//! same way.
//!
//! | Key | Type | Default | Range |
//! |-----|------|---------|-------|
//! | `armed` | bool | false | |
//! | `anchorLat`, `anchorLon`, `anchorRadius` | f64, f64, f32 | none | |
//! | `intervalSec` | int | 60 | 15..=120 |
//! | `sectorEnabled` | bool | false | |
//! | `headingDeg` | int | 180 | 0..=359, wrapped |
//! | `sectorDeg` | int | 0 | 0..=360 |
//! | `innerRadiusM` | int | 5 | 1..=100 |

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::model::{AnchorConfig, SectorConfig};

pub const KEY_ARMED: &str = "armed";
pub const KEY_ANCHOR_LAT: &str = "anchorLat";
pub const KEY_ANCHOR_LON: &str = "anchorLon";
pub const KEY_ANCHOR_RADIUS: &str = "anchorRadius";
pub const KEY_INTERVAL: &str = "intervalSec";
pub const KEY_SECTOR_ENABLED: &str = "sectorEnabled";
pub const KEY_HEADING: &str = "headingDeg";
pub const KEY_SECTOR: &str = "sectorDeg";
pub const KEY_INNER_RADIUS: &str = "innerRadiusM";

pub const DEFAULT_INTERVAL_SEC: i64 = 60;
pub const DEFAULT_HEADING_DEG: i64 = 180;
pub const DEFAULT_SECTOR_DEG: i64 = 0;
pub const DEFAULT_INNER_RADIUS_M: i64 = 5;

/// Flat durable key-value storage.
///
/// Reads must return the last successfully written value, including after a
/// process restart.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store, for tests and hosts without persistence
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values
            .lock()
            .map_err(|e| StoreError(e.to_string()))?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .map_err(|e| StoreError(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

pub fn clamp_interval_sec(sec: i64) -> i64 {
    sec.clamp(15, 120)
}

pub fn wrap_heading_deg(deg: i64) -> i64 {
    deg.rem_euclid(360)
}

pub fn clamp_sector_deg(deg: i64) -> i64 {
    deg.clamp(0, 360)
}

pub fn clamp_inner_radius_m(meters: i64) -> i64 {
    meters.clamp(1, 100)
}

/// Typed settings over a [`KeyValueStore`]
#[derive(Clone)]
pub struct Prefs {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for Prefs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Prefs {{ }}")
    }
}

impl Prefs {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Prefs { store }
    }

    /// Prefs backed by a fresh [`MemoryStore`]
    pub fn in_memory() -> Self {
        Prefs::new(Arc::new(MemoryStore::new()))
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.store.get(key).and_then(|v| v.as_bool())
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.store.get(key).and_then(|v| v.as_i64())
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.store.get(key).and_then(|v| v.as_f64())
    }

    pub fn is_armed(&self) -> bool {
        self.get_bool(KEY_ARMED).unwrap_or(false)
    }

    pub fn set_armed(&self, armed: bool) -> Result<(), StoreError> {
        self.store.put(KEY_ARMED, Value::from(armed))
    }

    /// Stored anchor, if all three fields are present
    pub fn anchor(&self) -> Option<AnchorConfig> {
        let lat = self.get_f64(KEY_ANCHOR_LAT)?;
        let lon = self.get_f64(KEY_ANCHOR_LON)?;
        let radius = self.get_f64(KEY_ANCHOR_RADIUS)?;
        Some(AnchorConfig::new(lat, lon, radius as f32))
    }

    /// Store an anchor, or remove it with `None`
    pub fn set_anchor(&self, anchor: Option<&AnchorConfig>) -> Result<(), StoreError> {
        match anchor {
            Some(a) => {
                self.store.put(KEY_ANCHOR_LAT, Value::from(a.latitude))?;
                self.store.put(KEY_ANCHOR_LON, Value::from(a.longitude))?;
                self.store
                    .put(KEY_ANCHOR_RADIUS, Value::from(a.radius_meters as f64))
            }
            None => {
                self.store.remove(KEY_ANCHOR_LAT)?;
                self.store.remove(KEY_ANCHOR_LON)?;
                self.store.remove(KEY_ANCHOR_RADIUS)
            }
        }
    }

    pub fn interval_sec(&self) -> i64 {
        self.get_i64(KEY_INTERVAL)
            .map(clamp_interval_sec)
            .unwrap_or(DEFAULT_INTERVAL_SEC)
    }

    pub fn set_interval_sec(&self, sec: i64) -> Result<(), StoreError> {
        self.store
            .put(KEY_INTERVAL, Value::from(clamp_interval_sec(sec)))
    }

    pub fn is_sector_enabled(&self) -> bool {
        self.get_bool(KEY_SECTOR_ENABLED).unwrap_or(false)
    }

    pub fn set_sector_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.store.put(KEY_SECTOR_ENABLED, Value::from(enabled))
    }

    pub fn heading_deg(&self) -> i64 {
        self.get_i64(KEY_HEADING)
            .map(wrap_heading_deg)
            .unwrap_or(DEFAULT_HEADING_DEG)
    }

    pub fn set_heading_deg(&self, deg: i64) -> Result<(), StoreError> {
        self.store.put(KEY_HEADING, Value::from(wrap_heading_deg(deg)))
    }

    pub fn sector_deg(&self) -> i64 {
        self.get_i64(KEY_SECTOR)
            .map(clamp_sector_deg)
            .unwrap_or(DEFAULT_SECTOR_DEG)
    }

    pub fn set_sector_deg(&self, deg: i64) -> Result<(), StoreError> {
        self.store.put(KEY_SECTOR, Value::from(clamp_sector_deg(deg)))
    }

    pub fn inner_radius_m(&self) -> i64 {
        self.get_i64(KEY_INNER_RADIUS)
            .map(clamp_inner_radius_m)
            .unwrap_or(DEFAULT_INNER_RADIUS_M)
    }

    pub fn set_inner_radius_m(&self, meters: i64) -> Result<(), StoreError> {
        self.store
            .put(KEY_INNER_RADIUS, Value::from(clamp_inner_radius_m(meters)))
    }

    /// All sector-related settings as one value
    pub fn sector_config(&self) -> SectorConfig {
        SectorConfig {
            enabled: self.is_sector_enabled(),
            heading_deg: self.heading_deg() as i32,
            sector_width_deg: self.sector_deg() as i32,
            inner_radius_meters: self.inner_radius_m() as f64,
        }
    }

    /// Store all sector-related settings; returns the clamped result
    pub fn set_sector_config(&self, sector: &SectorConfig) -> Result<SectorConfig, StoreError> {
        self.set_sector_enabled(sector.enabled)?;
        self.set_heading_deg(sector.heading_deg as i64)?;
        self.set_sector_deg(sector.sector_width_deg as i64)?;
        self.set_inner_radius_m(sector.inner_radius_meters.round() as i64)?;
        Ok(self.sector_config())
    }
}
