//! # Anchorwatch Server
//!
//! Headless anchor alarm with a REST and WebSocket API.
//!
//! The server:
//! - Listens for NMEA 0183 position sentences on UDP
//! - Runs one [`AnchorWatch`] session and raises the alarm when the boat
//!   leaves its zone
//! - Logs the position trace to SQLite and streams it live
//! - Keeps armed state and settings in a JSON file so a restart re-arms
//!
//! ## Architecture
//!
//! The watch engine lives in [`anchorwatch_core`]; this crate provides its
//! collaborators and a [`tokio`] runtime around it.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    anchorwatch-server                      │
//! │  ┌──────────────┐   (SubscriptionId, Fix)   ┌────────────┐ │
//! │  │ NmeaListener │ ────── mpsc(64) ────────► │ Watch task │ │
//! │  │ (UDP 10110)  │                           └─────┬──────┘ │
//! │  └──────────────┘                                 │        │
//! │                                                   ▼        │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │           Session (Arc<RwLock<AnchorWatch>>)         │  │
//! │  └───────┬───────────────────┬──────────────────┬───────┘  │
//! │          ▼                   ▼                  ▼          │
//! │  ┌──────────────┐   ┌────────────────┐   ┌─────────────┐   │
//! │  │ LogAlertSink │   │ TracePipeline  │   │ FileConfig  │   │
//! │  │              │   │ bus + SQLite   │   │ Store       │   │
//! │  └──────────────┘   └────────────────┘   └─────────────┘   │
//! │                              ▲                             │
//! │                     REST / WebSocket (axum)                │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## REST API
//!
//! The server exposes a REST API (via the `web` module in `main.rs`):
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /v1/api/status` | Watch phase, settings and last check |
//! | `PUT /v1/api/anchor` | Drop the anchor at a position |
//! | `DELETE /v1/api/anchor` | Lift the anchor |
//! | `POST /v1/api/arm`, `POST /v1/api/disarm` | Start or stop watching |
//! | `POST /v1/api/mute?durationMs=` | Silence a sounding alarm |
//! | `PUT /v1/api/settings` | Interval, sector and inner radius |
//! | `GET /v1/api/trace?limit=` | Latest stored trace points |
//! | `WS /v1/api/trace/live` | Trace snapshot followed by live points |
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-p, --port` - HTTP server port (default: 6503)
//! - `-v` - Increase verbosity (use multiple times)
//! - `--nmea-address` - UDP address to receive NMEA 0183 on
//! - `--data-dir` - Where settings and the trace database live

use anchorwatch_core::{
    AnchorWatch, Fix, FixOutcome, Prefs, StoreError, SubscriptionId, WatchDeps, WatchStatus,
};
use clap::Parser;
use log::{debug, info, warn};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

pub mod alerts;
pub mod config;
pub mod location;
pub mod storage;
pub mod trace;

use alerts::{AlertSnapshot, LogAlertSink};
use location::{FixReceiver, NmeaListener, NmeaUdpProvider, FIX_CHANNEL_CAPACITY};
use storage::FileConfigStore;
use trace::{TraceDb, TraceError, TracePipeline};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Port for webserver
    #[arg(short, long, default_value_t = 6503)]
    pub port: u16,

    /// Directory for settings and the trace database
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// UDP address to receive NMEA 0183 sentences on
    #[arg(long, default_value = "0.0.0.0:10110")]
    pub nmea_address: SocketAddr,

    /// Start with fast (1 s) sampling, as if a display were open
    #[arg(long, default_value_t = false)]
    pub foreground: bool,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Cannot determine a data directory, use --data-dir")]
    NoDataDir,
}

/// Wall clock as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Everything `GET status` reports
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusApi {
    pub version: &'static str,
    #[serde(flatten)]
    pub watch: WatchStatus,
    pub alert: AlertSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_error: Option<String>,
}

pub struct SessionInner {
    pub args: Cli,
    pub watch: AnchorWatch,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<RwLock<SessionInner>>,
    pub trace: TracePipeline,
    pub location: Arc<NmeaUdpProvider>,
    pub alerts: Arc<LogAlertSink>,
}

impl Session {
    pub fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the stores and build a disarmed session. Starts nothing; use
    /// [`Session::new`] for a running server.
    pub fn open(args: Cli) -> Result<Self, ServerError> {
        let data_dir = config::data_dir(&args)?;
        info!("Data directory {}", data_dir.display());

        let store = FileConfigStore::open(data_dir.join(config::SETTINGS_FILE))?;
        let db = TraceDb::open(data_dir.join(config::TRACE_DB_FILE))?;

        let trace = TracePipeline::new(db);
        let location = Arc::new(NmeaUdpProvider::new(args.nmea_address));
        let alerts = Arc::new(LogAlertSink::new());

        let deps = WatchDeps {
            location: location.clone(),
            alerts: alerts.clone(),
            trace: Arc::new(trace.clone()),
            prefs: Prefs::new(Arc::new(store)),
        };
        let watch = AnchorWatch::new(deps, args.foreground);

        Ok(Session {
            inner: Arc::new(RwLock::new(SessionInner { args, watch })),
            trace,
            location,
            alerts,
        })
    }

    /// Open the session, start the NMEA listener and the watch task, and
    /// re-arm if the watch was armed when the server last stopped.
    pub async fn new(subsystem: &SubsystemHandle, args: Cli) -> Result<Self, ServerError> {
        let session = Self::open(args)?;

        let (fix_tx, fix_rx) = mpsc::channel(FIX_CHANNEL_CAPACITY);
        if let Some(listener) = NmeaListener::new(session.location.clone(), fix_tx) {
            subsystem.start(SubsystemBuilder::new("Nmea", |subsys| listener.run(subsys)));
        }
        if let Err(e) = session.location.open() {
            // Retried on the next location request
            session.location.set_failure(e);
        }

        session.restore();

        let watch_session = session.clone();
        subsystem.start(SubsystemBuilder::new("Watch", |subsys| {
            watch_session.run(subsys, fix_rx)
        }));

        Ok(session)
    }

    pub fn args(&self) -> Cli {
        self.read().args.clone()
    }

    /// Reload anchor and armed flag from the settings store
    pub fn restore(&self) {
        match self.write().watch.restore() {
            Ok(true) => info!("Anchor watch resumed after restart"),
            Ok(false) => debug!("No armed watch to resume"),
            Err(e) => warn!("Could not resume anchor watch: {}", e),
        }
    }

    /// Current status. `locationActive` is only true while the NMEA source
    /// still serves the watch's subscription.
    pub fn status(&self) -> StatusApi {
        let mut watch = self.read().watch.status(now_ms());
        watch.location_active = watch.location_active && self.location.active().is_some();
        StatusApi {
            version: VERSION,
            watch,
            alert: self.alerts.snapshot(),
            location_error: self.location.failure().map(|e| e.to_string()),
        }
    }

    /// Evaluate a fix delivered for `subscription`.
    ///
    /// Fixes from a subscription that has since been cancelled are dropped.
    pub fn handle_fix(&self, subscription: SubscriptionId, fix: &Fix) -> Option<FixOutcome> {
        let mut inner = self.write();
        let current = inner.watch.sampler().active().map(|(id, _)| id);
        if current != Some(subscription) {
            debug!("Dropping fix from stale subscription {:?}", subscription);
            return None;
        }

        match inner.watch.on_fix(fix, now_ms()) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                debug!("Fix not evaluated: {}", e);
                None
            }
        }
    }

    async fn run(self, subsys: SubsystemHandle, mut fix_rx: FixReceiver) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    debug!("Watch task shutting down");
                    return Ok(());
                },
                r = fix_rx.recv() => {
                    match r {
                        Some((subscription, fix)) => {
                            self.handle_fix(subscription, &fix);
                        }
                        None => {
                            // No location source, nothing more will arrive
                            subsys.on_shutdown_requested().await;
                            return Ok(());
                        }
                    }
                },
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session {{ }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorwatch_core::{AlarmTransition, AnchorConfig, LocationError, WatchError, WatchPhase};
    use tempfile::TempDir;

    fn create_test_session() -> (Session, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_str().unwrap().to_string();
        let args = Cli::parse_from(["anchorwatch-server", "--data-dir", &dir]);
        (Session::open(args).unwrap(), temp_dir)
    }

    fn create_test_session_on(nmea_address: &str) -> (Session, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_str().unwrap().to_string();
        let args = Cli::parse_from([
            "anchorwatch-server",
            "--data-dir",
            &dir,
            "--nmea-address",
            nmea_address,
        ]);
        (Session::open(args).unwrap(), temp_dir)
    }

    fn drop_and_arm(session: &Session) -> SubscriptionId {
        let mut inner = session.write();
        inner
            .watch
            .set_anchor(AnchorConfig::new(48.0, -4.5, 60.0))
            .unwrap();
        inner.watch.arm().unwrap();
        inner.watch.sampler().active().unwrap().0
    }

    #[tokio::test]
    async fn test_fix_raises_alarm() {
        let (session, _temp) = create_test_session();
        let id = drop_and_arm(&session);

        let inside = session
            .handle_fix(id, &Fix::new(48.0, -4.5, 3.0, now_ms()))
            .unwrap();
        assert_eq!(inside.transition, None);

        let outside = session
            .handle_fix(id, &Fix::new(48.001, -4.5, 3.0, now_ms()))
            .unwrap();
        assert_eq!(outside.transition, Some(AlarmTransition::Triggered));
        assert!(session.alerts.is_sounding());

        let status = session.status();
        assert_eq!(status.watch.phase, WatchPhase::ArmedAlarming);
        assert!(status.alert.alert.is_some());
    }

    #[tokio::test]
    async fn test_stale_subscription_ignored() {
        let (session, _temp) = create_test_session();
        let id = drop_and_arm(&session);
        session.write().watch.set_foreground(true).unwrap();

        assert!(session
            .handle_fix(id, &Fix::new(48.001, -4.5, 3.0, now_ms()))
            .is_none());
        assert!(!session.alerts.is_sounding());
    }

    #[tokio::test]
    async fn test_restart_rearms() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_str().unwrap().to_string();
        {
            let args = Cli::parse_from(["anchorwatch-server", "--data-dir", &dir]);
            let session = Session::open(args).unwrap();
            drop_and_arm(&session);
        }

        let args = Cli::parse_from(["anchorwatch-server", "--data-dir", &dir]);
        let session = Session::open(args).unwrap();
        session.restore();
        let status = session.status();
        assert!(status.watch.state.armed);
        assert!(status.watch.location_active);
        assert_eq!(
            status.watch.state.anchor,
            Some(AnchorConfig::new(48.0, -4.5, 60.0))
        );
    }

    #[tokio::test]
    async fn test_permission_denied_stays_disarmed() {
        let (session, _temp) = create_test_session();
        session.location.set_failure(LocationError::PermissionDenied);

        let mut inner = session.write();
        inner
            .watch
            .set_anchor(AnchorConfig::new(48.0, -4.5, 60.0))
            .unwrap();
        assert!(inner.watch.arm().is_err());
        assert!(!inner.watch.state().armed);
        assert_eq!(inner.watch.status_text(), "Missing location permission");
    }

    #[tokio::test]
    async fn test_read_failure_reported_in_status() {
        let (session, _temp) = create_test_session_on("127.0.0.1:0");
        drop_and_arm(&session);
        assert!(session.status().watch.location_active);

        session
            .location
            .set_failure(LocationError::Io("connection reset".into()));
        let status = session.status();
        assert!(status.watch.state.armed);
        assert!(!status.watch.location_active);
        assert_eq!(
            status.location_error.as_deref(),
            Some("Location I/O error: connection reset")
        );
    }

    #[tokio::test]
    async fn test_location_request_rebinds_after_failure() {
        let (session, _temp) = create_test_session_on("127.0.0.1:0");
        session
            .location
            .set_failure(LocationError::Unavailable("address in use".into()));

        let mut inner = session.write();
        inner
            .watch
            .set_anchor(AnchorConfig::new(48.0, -4.5, 60.0))
            .unwrap();
        inner.watch.arm().unwrap();
        drop(inner);

        let status = session.status();
        assert!(status.watch.state.armed);
        assert!(status.watch.location_active);
        assert_eq!(status.location_error, None);
        assert_eq!(session.location.failure(), None);
    }

    #[tokio::test]
    async fn test_rebind_failure_keeps_watch_disarmed() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = taken.local_addr().unwrap().to_string();
        let (session, _temp) = create_test_session_on(&address);
        session
            .location
            .set_failure(LocationError::Io("connection reset".into()));

        let mut inner = session.write();
        inner
            .watch
            .set_anchor(AnchorConfig::new(48.0, -4.5, 60.0))
            .unwrap();
        assert!(matches!(
            inner.watch.arm(),
            Err(WatchError::Location(LocationError::Unavailable(_)))
        ));
        assert!(!inner.watch.state().armed);
    }
}
