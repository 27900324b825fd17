//! # Anchorwatch Core
//!
//! Platform-independent anchor watch engine.
//!
//! This crate contains the geodesy, zone evaluation and alarm state machine
//! of an anchor alarm with **zero I/O dependencies**. It has no async
//! runtime; time is always passed in explicitly.
//!
//! ## Architecture
//!
//! Everything platform-specific is reached through the collaborator traits
//! in [`io`] and the [`KeyValueStore`] behind [`Prefs`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  anchorwatch-core (no tokio, no sockets, no files)           │
//! │  ├── geo/       (haversine, bearing, sector, polygons)       │
//! │  ├── zone/      (inside / inner / outside classification)    │
//! │  ├── watch/     (AnchorWatch state machine)                  │
//! │  ├── sampling/  (foreground / background fix cadence)        │
//! │  ├── trace/     (pull + live merge buffer)                   │
//! │  ├── settings/  (typed, clamped preferences)                 │
//! │  ├── nmea/      (RMC / GGA fix parsing)                      │
//! │  └── io         (LocationProvider, AlertSink, TraceSink)     │
//! └──────────────────────────────────────────────────────────────┘
//!                              ▲
//!               ┌──────────────┴──────────────┐
//!               │  anchorwatch-server         │
//!               │  (NMEA/UDP, SQLite, axum)   │
//!               └─────────────────────────────┘
//! ```
//!
//! ## Key Modules
//!
//! - [`geo`] - Great-circle distance, bearing and sector containment
//! - [`watch`] - The [`AnchorWatch`] session and its transitions
//! - [`sampling`] - Adaptive location request interval
//! - [`trace`] - Merge of stored and live trace points for rendering
//! - [`geojson`] - GeoJSON for guard circle, sector, trace and position
//!
//! ## Example: Zone check
//!
//! ```rust
//! use anchorwatch_core::{AnchorConfig, AnchorZone, SectorConfig, ZoneVerdict};
//!
//! let anchor = AnchorConfig::new(48.0, -4.5, 60.0);
//! let zone = AnchorZone::new(anchor, SectorConfig::default());
//!
//! assert_eq!(zone.check(48.0, -4.5).verdict, ZoneVerdict::InnerCircle);
//! assert_eq!(zone.check(48.001, -4.5).verdict, ZoneVerdict::OutsideRadius);
//! ```

pub mod error;
pub mod geo;
pub mod geojson;
pub mod io;
pub mod model;
pub mod nmea;
pub mod sampling;
pub mod settings;
pub mod trace;
pub mod watch;
pub mod zone;

// Re-export commonly used types
pub use error::{LocationError, ParseError, StoreError, WatchError};
pub use io::{AlertSink, LocationProvider, LocationRequest, SubscriptionId, TraceSink};
pub use model::{AnchorConfig, Fix, SectorConfig, TracePoint};
pub use sampling::{FixThrottle, SamplingController};
pub use settings::{KeyValueStore, MemoryStore, Prefs};
pub use trace::{LivePoint, TraceBuffer, TraceEvent};
pub use watch::{AlarmTransition, AnchorWatch, FixOutcome, WatchDeps, WatchPhase, WatchState, WatchStatus};
pub use zone::{AnchorZone, ZoneCheck, ZoneVerdict};
