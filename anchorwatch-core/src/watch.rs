//! Anchor watch state machine.
//!
//! [`AnchorWatch`] owns the single mutable [`WatchState`] of a session. All
//! transitions go through its methods, which must be called from one place
//! at a time (the host serializes them, e.g. behind a mutex or in a single
//! task). Time is passed in explicitly as Unix milliseconds so the machine
//! stays deterministic.
//!
//! ```text
//!                 arm()                    fix outside
//!  ┌──────────┐ ───────► ┌──────────────┐ ───────────► ┌────────────────┐
//!  │ Disarmed │          │ Armed-Inside │              │ Armed-Alarming │
//!  └──────────┘ ◄─────── └──────────────┘ ◄─────────── └────────────────┘
//!       ▲      disarm()         ▲          fix inside          │
//!       │                       │ deadline passed,             │ mute()
//!       │                       │ fix inside                   ▼
//!       │                       │                      ┌──────────────┐
//!       └─────── disarm() ──────┴───────────────────── │ Armed-Muted  │
//!                                                      └──────────────┘
//! ```
//!
//! Alarm side effects fire on edges only: triggering while already alarming
//! is a no-op, and so is clearing while clear.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{LocationError, StoreError, WatchError};
use crate::io::{AlertSink, LocationProvider, TraceSink};
use crate::model::{AnchorConfig, Fix, SectorConfig};
use crate::sampling::SamplingController;
use crate::settings::{
    clamp_inner_radius_m, clamp_interval_sec, clamp_sector_deg, wrap_heading_deg, Prefs,
};
use crate::zone::{AnchorZone, ZoneCheck};

/// Default mute window
pub const DEFAULT_MUTE_MS: i64 = 120_000;
/// Vibration length per alarm edge
pub const ALARM_VIBRATION_MS: u64 = 3_000;

const STATUS_IDLE: &str = "Anchor watch idle";
const STATUS_ARMED: &str = "Armed";
const STATUS_DISARMED: &str = "Disarmed";
const STATUS_BACK_IN_ZONE: &str = "Back in zone";
const STATUS_ANCHOR_LIFTED: &str = "Anchor lifted";
const STATUS_MISSING_PERMISSION: &str = "Missing location permission";

fn outside_text(distance: f64) -> String {
    format!("Outside zone: {} m", distance as i64)
}

fn muted_text(duration_ms: i64) -> String {
    if duration_ms % 60_000 == 0 {
        format!("Alarm muted for {} min", duration_ms / 60_000)
    } else {
        format!("Alarm muted for {} s", duration_ms / 1_000)
    }
}

fn interval_text(interval_ms: u64) -> String {
    format!("Interval applied: {} s", interval_ms / 1_000)
}

fn location_error_text(e: &LocationError) -> String {
    match e {
        LocationError::PermissionDenied => STATUS_MISSING_PERMISSION.to_string(),
        other => other.to_string(),
    }
}

/// Coarse state of a watch session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchPhase {
    Disarmed,
    ArmedInside,
    ArmedAlarming,
    ArmedMuted,
}

impl std::fmt::Display for WatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchPhase::Disarmed => write!(f, "Disarmed"),
            WatchPhase::ArmedInside => write!(f, "Armed-Inside"),
            WatchPhase::ArmedAlarming => write!(f, "Armed-Alarming"),
            WatchPhase::ArmedMuted => write!(f, "Armed-Muted"),
        }
    }
}

/// Mutable state of a watch session.
///
/// `alarming` implies `armed` and an anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchState {
    pub anchor: Option<AnchorConfig>,
    pub armed: bool,
    pub alarming: bool,
    /// Unix ms until which new alarms are suppressed
    pub muted_until: Option<i64>,
    pub current_interval_ms: u64,
    pub app_foreground: bool,
}

impl WatchState {
    pub fn phase(&self, now_ms: i64) -> WatchPhase {
        if !self.armed {
            WatchPhase::Disarmed
        } else if self.alarming {
            WatchPhase::ArmedAlarming
        } else if self.muted_until.is_some_and(|until| now_ms < until) {
            WatchPhase::ArmedMuted
        } else {
            WatchPhase::ArmedInside
        }
    }
}

/// Alarm edge produced by a fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmTransition {
    Triggered,
    Cleared,
}

/// Result of processing one fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixOutcome {
    pub check: ZoneCheck,
    /// Alarm evaluation was skipped because of an active mute
    pub muted: bool,
    pub transition: Option<AlarmTransition>,
}

/// Snapshot of a session for status reporting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatus {
    pub phase: WatchPhase,
    pub state: WatchState,
    pub sector: SectorConfig,
    pub user_interval_ms: u64,
    pub location_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<ZoneCheck>,
    pub status_text: String,
}

/// Collaborators injected into a watch session
#[derive(Clone)]
pub struct WatchDeps {
    pub location: Arc<dyn LocationProvider>,
    pub alerts: Arc<dyn AlertSink>,
    pub trace: Arc<dyn TraceSink>,
    pub prefs: Prefs,
}

pub struct AnchorWatch {
    deps: WatchDeps,
    state: WatchState,
    sector: SectorConfig,
    sampler: SamplingController,
    last_check: Option<ZoneCheck>,
    status_text: String,
}

impl std::fmt::Debug for AnchorWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorWatch")
            .field("state", &self.state)
            .field("sector", &self.sector)
            .finish()
    }
}

fn persist(what: &str, result: Result<(), StoreError>) {
    if let Err(e) = result {
        warn!("Failed to persist {}: {}", what, e);
    }
}

impl AnchorWatch {
    /// Create a disarmed session using the stored interval and sector settings.
    ///
    /// Call [`restore`](Self::restore) afterwards to pick up a stored anchor.
    pub fn new(deps: WatchDeps, app_foreground: bool) -> Self {
        let interval_ms = deps.prefs.interval_sec() as u64 * 1_000;
        let sector = deps.prefs.sector_config();
        let sampler = SamplingController::new(interval_ms, app_foreground);

        AnchorWatch {
            state: WatchState {
                anchor: None,
                armed: false,
                alarming: false,
                muted_until: None,
                current_interval_ms: sampler.target_interval_ms(),
                app_foreground,
            },
            deps,
            sector,
            sampler,
            last_check: None,
            status_text: STATUS_IDLE.to_string(),
        }
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    pub fn phase(&self, now_ms: i64) -> WatchPhase {
        self.state.phase(now_ms)
    }

    pub fn sector(&self) -> SectorConfig {
        self.sector
    }

    pub fn zone(&self) -> Option<AnchorZone> {
        self.state.anchor.map(|a| AnchorZone::new(a, self.sector))
    }

    pub fn last_check(&self) -> Option<ZoneCheck> {
        self.last_check
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn sampler(&self) -> &SamplingController {
        &self.sampler
    }

    pub fn status(&self, now_ms: i64) -> WatchStatus {
        WatchStatus {
            phase: self.phase(now_ms),
            state: self.state.clone(),
            sector: self.sector,
            user_interval_ms: self.sampler.user_interval_ms(),
            location_active: self.sampler.is_subscribed(),
            last_check: self.last_check,
            status_text: self.status_text.clone(),
        }
    }

    fn set_status(&mut self, text: impl Into<String>) {
        self.status_text = text.into();
        self.deps.alerts.post_status(&self.status_text);
    }

    /// Reload the stored anchor and re-arm if the session was armed before
    /// the restart. Returns whether the watch is armed afterwards.
    pub fn restore(&mut self) -> Result<bool, WatchError> {
        self.state.anchor = self.deps.prefs.anchor().filter(|a| a.is_valid());

        if !self.deps.prefs.is_armed() {
            return Ok(false);
        }

        match self.state.anchor {
            Some(anchor) => {
                info!(
                    "Restoring armed watch at {:.6},{:.6} r={} m",
                    anchor.latitude, anchor.longitude, anchor.radius_meters
                );
                self.arm().map(|_| true)
            }
            None => {
                warn!("Stored state is armed but has no anchor, staying disarmed");
                persist("armed flag", self.deps.prefs.set_armed(false));
                Ok(false)
            }
        }
    }

    /// Replace the anchor. Does not arm; clears the trace.
    pub fn set_anchor(&mut self, anchor: AnchorConfig) -> Result<(), WatchError> {
        if !anchor.is_valid() {
            return Err(WatchError::InvalidAnchor {
                lat: anchor.latitude,
                lon: anchor.longitude,
                radius: anchor.radius_meters,
            });
        }

        // A new zone starts from a clean alarm state
        if self.state.alarming {
            self.silence();
        }
        self.state.muted_until = None;
        self.state.anchor = Some(anchor);
        self.last_check = None;

        persist("anchor", self.deps.prefs.set_anchor(Some(&anchor)));
        self.deps.trace.clear();

        info!(
            "Anchor set at {:.6},{:.6} r={} m",
            anchor.latitude, anchor.longitude, anchor.radius_meters
        );
        Ok(())
    }

    /// Disarm if needed, then forget the anchor and the trace.
    pub fn lift_anchor(&mut self) {
        if self.state.armed {
            self.disarm();
        }
        self.state.anchor = None;
        self.last_check = None;

        persist("anchor", self.deps.prefs.set_anchor(None));
        self.deps.trace.clear();

        info!("Anchor lifted");
        self.set_status(STATUS_ANCHOR_LIFTED);
    }

    /// Start watching. Requires an anchor.
    ///
    /// If the location provider refuses the request the session stays
    /// disarmed and the status shows why.
    pub fn arm(&mut self) -> Result<(), WatchError> {
        if self.state.anchor.is_none() {
            return Err(WatchError::NoAnchor);
        }
        if self.state.armed {
            return Ok(());
        }

        self.resubscribe()?;

        self.state.armed = true;
        self.state.alarming = false;
        self.state.muted_until = None;
        persist("armed flag", self.deps.prefs.set_armed(true));

        info!("Anchor watch armed");
        self.set_status(STATUS_ARMED);
        Ok(())
    }

    /// Arm, refusing when the last known position is outside the zone.
    ///
    /// `force` arms anyway; the first fix then raises the alarm.
    pub fn arm_checked(&mut self, force: bool) -> Result<(), WatchError> {
        let anchor = self.state.anchor.ok_or(WatchError::NoAnchor)?;
        if self.state.armed {
            return Ok(());
        }

        if !force {
            if let Some(fix) = self.deps.location.last_known().filter(Fix::is_valid) {
                let check = AnchorZone::new(anchor, self.sector).check(fix.lat, fix.lon);
                if !check.verdict.is_safe() {
                    info!("Not arming, boat is {:.1} m from the anchor", check.distance);
                    return Err(WatchError::OutsideZone {
                        distance: check.distance,
                    });
                }
            }
        }
        self.arm()
    }

    /// Stop watching. Cancels location updates and silences any alarm
    /// before returning.
    pub fn disarm(&mut self) {
        self.sampler.cancel(self.deps.location.as_ref());
        self.deps.alerts.stop_alarm();
        self.deps.alerts.cancel_alert();

        self.state.armed = false;
        self.state.alarming = false;
        self.state.muted_until = None;
        persist("armed flag", self.deps.prefs.set_armed(false));

        info!("Anchor watch disarmed");
        self.set_status(STATUS_DISARMED);
    }

    /// Re-issue the location request, e.g. after permission was granted.
    pub fn request_location(&mut self) -> Result<(), WatchError> {
        if !self.state.armed {
            return Err(WatchError::NotArmed);
        }
        self.resubscribe()?;
        self.set_status(STATUS_ARMED);
        Ok(())
    }

    /// Silence the alarm for `duration_ms` without disarming.
    ///
    /// Returns the deadline. Fixes keep being traced while muted.
    pub fn mute(&mut self, now_ms: i64, duration_ms: i64) -> Result<i64, WatchError> {
        if !self.state.alarming {
            return Err(WatchError::NotAlarming);
        }

        self.silence();
        let until = now_ms.saturating_add(duration_ms);
        self.state.muted_until = Some(until);

        info!("Alarm muted until {}", until);
        self.set_status(muted_text(duration_ms));
        Ok(until)
    }

    /// Evaluate one fix.
    ///
    /// Invalid fixes are rejected before any computation. While muted the
    /// fix is traced but no alarm is evaluated.
    pub fn on_fix(&mut self, fix: &Fix, now_ms: i64) -> Result<FixOutcome, WatchError> {
        if !fix.is_valid() {
            debug!("Dropping invalid fix {:?}", fix);
            return Err(WatchError::InvalidFix {
                lat: fix.lat,
                lon: fix.lon,
            });
        }

        let anchor = match (self.state.armed, self.state.anchor) {
            (true, Some(anchor)) => anchor,
            _ => return Err(WatchError::NotArmed),
        };

        let check = AnchorZone::new(anchor, self.sector).check(fix.lat, fix.lon);
        self.deps.trace.record(fix);
        self.last_check = Some(check);

        if let Some(until) = self.state.muted_until {
            if now_ms < until {
                debug!("Muted, d={:.1} m {:?}", check.distance, check.verdict);
                return Ok(FixOutcome {
                    check,
                    muted: true,
                    transition: None,
                });
            }
            self.state.muted_until = None;
        }

        let transition = if check.verdict.is_safe() {
            self.reset_if_alarming()
        } else {
            self.trigger_alarm_once(check.distance)
        };

        Ok(FixOutcome {
            check,
            muted: false,
            transition,
        })
    }

    /// Switch between fast foreground sampling and the user interval.
    pub fn set_foreground(&mut self, foreground: bool) -> Result<(), WatchError> {
        self.state.app_foreground = foreground;
        self.sampler.set_foreground(foreground);
        self.state.current_interval_ms = self.sampler.target_interval_ms();

        if self.state.armed {
            self.resubscribe()?;
        }
        if foreground {
            self.set_status(format!(
                "Update interval: {} s",
                self.state.current_interval_ms / 1_000
            ));
        } else {
            self.set_status(interval_text(self.sampler.user_interval_ms()));
        }
        Ok(())
    }

    /// Store a new background interval. Returns the clamped value in seconds.
    ///
    /// Takes effect immediately only while backgrounded.
    pub fn set_interval_sec(&mut self, sec: i64) -> Result<i64, WatchError> {
        let sec = clamp_interval_sec(sec);
        persist("interval", self.deps.prefs.set_interval_sec(sec));
        self.sampler.set_user_interval_ms(sec as u64 * 1_000);
        self.state.current_interval_ms = self.sampler.target_interval_ms();

        if !self.state.app_foreground {
            if self.state.armed {
                self.resubscribe()?;
            }
            self.set_status(interval_text(self.sampler.user_interval_ms()));
        }
        Ok(sec)
    }

    /// Store new sector and inner-radius settings. Returns the clamped value.
    pub fn update_sector(&mut self, sector: SectorConfig) -> SectorConfig {
        let sector = SectorConfig {
            enabled: sector.enabled,
            heading_deg: wrap_heading_deg(sector.heading_deg as i64) as i32,
            sector_width_deg: clamp_sector_deg(sector.sector_width_deg as i64) as i32,
            inner_radius_meters: clamp_inner_radius_m(sector.inner_radius_meters.round() as i64)
                as f64,
        };
        if let Err(e) = self.deps.prefs.set_sector_config(&sector) {
            warn!("Failed to persist sector settings: {}", e);
        }
        info!(
            "Sector {} heading {} width {} inner {} m",
            if sector.enabled { "on" } else { "off" },
            sector.heading_deg,
            sector.sector_width_deg,
            sector.inner_radius_meters
        );
        self.sector = sector;
        sector
    }

    fn resubscribe(&mut self) -> Result<(), WatchError> {
        match self.sampler.resubscribe(self.deps.location.as_ref()) {
            Ok(request) => {
                self.state.current_interval_ms = request.interval_ms;
                Ok(())
            }
            Err(e) => {
                warn!("Location request failed: {}", e);
                self.set_status(location_error_text(&e));
                Err(e.into())
            }
        }
    }

    fn trigger_alarm_once(&mut self, distance: f64) -> Option<AlarmTransition> {
        if self.state.alarming {
            return None;
        }
        self.state.alarming = true;

        let message = outside_text(distance);
        warn!("Anchor alarm: {}", message);
        self.deps.alerts.sound_alarm();
        self.deps.alerts.vibrate(ALARM_VIBRATION_MS);
        self.deps.alerts.post_alert(&message);
        self.set_status(message);
        Some(AlarmTransition::Triggered)
    }

    fn reset_if_alarming(&mut self) -> Option<AlarmTransition> {
        if !self.state.alarming {
            return None;
        }
        self.silence();
        info!("Back in zone");
        self.set_status(STATUS_BACK_IN_ZONE);
        Some(AlarmTransition::Cleared)
    }

    fn silence(&mut self) {
        self.deps.alerts.stop_alarm();
        self.deps.alerts.cancel_alert();
        self.state.alarming = false;
    }
}
