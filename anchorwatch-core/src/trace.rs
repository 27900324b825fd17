//! Client-side trace merge buffer.
//!
//! A renderer builds its path from two sources: a pull of the latest N
//! stored points, followed by a live stream of new points. [`TraceBuffer`]
//! joins the two without duplicates or gaps:
//!
//! ```text
//!   latest(N) ──► load() ──┐
//!                          ├──► [p0, p1, ... pk]   (ascending, capped)
//!   live bus ──► apply() ──┘        ▲
//!                                   └── high-water timestamp
//! ```
//!
//! Live points at or below the high-water mark are already covered by the
//! pull and are skipped. A point with the same coordinates as the last one
//! is a no-op fix and is not appended.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::model::{Fix, TracePoint};

/// Number of points a renderer pulls and keeps
pub const RENDER_LIMIT: usize = 2000;

/// Point as published on the live bus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivePoint {
    pub lat: f64,
    pub lon: f64,
    pub timestamp_ms: i64,
}

impl From<&Fix> for LivePoint {
    fn from(fix: &Fix) -> Self {
        LivePoint {
            lat: fix.lat,
            lon: fix.lon,
            timestamp_ms: fix.timestamp_ms,
        }
    }
}

impl From<&TracePoint> for LivePoint {
    fn from(p: &TracePoint) -> Self {
        LivePoint {
            lat: p.lat,
            lon: p.lon,
            timestamp_ms: p.timestamp_ms,
        }
    }
}

/// Message on the live bus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TraceEvent {
    Point(LivePoint),
    /// The trace was emptied (anchor set or lifted)
    Cleared,
}

#[derive(Debug, Clone)]
pub struct TraceBuffer {
    capacity: usize,
    points: VecDeque<LivePoint>,
    high_water_ms: Option<i64>,
    /// Coordinates already seen at exactly `high_water_ms`
    at_high_water: Vec<(f64, f64)>,
}

impl Default for TraceBuffer {
    fn default() -> Self {
        TraceBuffer::new(RENDER_LIMIT)
    }
}

impl TraceBuffer {
    pub fn new(capacity: usize) -> Self {
        TraceBuffer {
            capacity: capacity.max(1),
            points: VecDeque::with_capacity(capacity.min(RENDER_LIMIT)),
            high_water_ms: None,
            at_high_water: Vec::new(),
        }
    }

    /// Replace the contents with a pull result.
    ///
    /// `latest` may be in any order; store queries return it newest first.
    pub fn load(&mut self, latest: &[TracePoint]) {
        let mut sorted: Vec<&TracePoint> = latest.iter().collect();
        sorted.sort_by_key(|p| (p.timestamp_ms, p.id));

        self.points.clear();
        self.high_water_ms = None;
        self.at_high_water.clear();
        for p in sorted {
            self.append(LivePoint::from(p));
        }
    }

    /// Append a live point. Returns true if the buffer changed.
    ///
    /// Points older than the high-water mark are already covered by a pull.
    /// A point at the mark itself is new unless its coordinates were seen
    /// at that timestamp.
    pub fn push_live(&mut self, point: LivePoint) -> bool {
        match self.high_water_ms {
            Some(hw) if point.timestamp_ms < hw => return false,
            Some(hw)
                if point.timestamp_ms == hw
                    && self.at_high_water.contains(&(point.lat, point.lon)) =>
            {
                return false
            }
            _ => {}
        }
        self.append(point)
    }

    /// Apply a bus message. Returns true if the buffer changed.
    pub fn apply(&mut self, event: &TraceEvent) -> bool {
        match event {
            TraceEvent::Point(p) => self.push_live(*p),
            TraceEvent::Cleared => {
                let changed = !self.points.is_empty();
                self.clear();
                changed
            }
        }
    }

    fn append(&mut self, point: LivePoint) -> bool {
        let coords = (point.lat, point.lon);
        match self.high_water_ms {
            Some(hw) if point.timestamp_ms < hw => {}
            Some(hw) if point.timestamp_ms == hw => {
                if !self.at_high_water.contains(&coords) {
                    self.at_high_water.push(coords);
                }
            }
            _ => {
                self.high_water_ms = Some(point.timestamp_ms);
                self.at_high_water.clear();
                self.at_high_water.push(coords);
            }
        }

        if let Some(last) = self.points.back() {
            if last.lat == point.lat && last.lon == point.lon {
                return false;
            }
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
        true
    }

    pub fn clear(&mut self) {
        self.points.clear();
        // Keep the mark: anything older than the clear is gone for good
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn high_water_ms(&self) -> Option<i64> {
        self.high_water_ms
    }

    pub fn last(&self) -> Option<&LivePoint> {
        self.points.back()
    }

    /// Points in chronological order
    pub fn points(&self) -> impl Iterator<Item = &LivePoint> {
        self.points.iter()
    }

    /// Path as `(lon, lat)` pairs, oldest first
    pub fn coordinates(&self) -> Vec<(f64, f64)> {
        self.points.iter().map(|p| (p.lon, p.lat)).collect()
    }
}
