//! Error types for the watch engine and NMEA parsing

use thiserror::Error;

/// Errors reported by a location provider.
///
/// None of these are fatal to a watch session: they are surfaced as a
/// status message and the session keeps waiting for an explicit re-request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    /// The platform refused access to position data
    #[error("Location permission denied")]
    PermissionDenied,

    /// No position source could be opened
    #[error("Location source unavailable: {0}")]
    Unavailable(String),

    /// Low-level failure while reading fixes
    #[error("Location I/O error: {0}")]
    Io(String),
}

/// Precondition failures of the watch state machine.
///
/// Returned synchronously; a failed operation never changes watch state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WatchError {
    /// Arming requires an anchor to be set first
    #[error("No anchor set")]
    NoAnchor,

    /// Operation is only meaningful while armed
    #[error("Anchor watch is not armed")]
    NotArmed,

    /// Mute is only accepted while the alarm is sounding
    #[error("Alarm is not active")]
    NotAlarming,

    /// Last known position is already outside the zone
    #[error("Boat is {distance:.0} m from the anchor, outside the zone")]
    OutsideZone { distance: f64 },

    /// Anchor has non-finite coordinates or a non-positive radius
    #[error("Invalid anchor: lat={lat}, lon={lon}, radius={radius}")]
    InvalidAnchor { lat: f64, lon: f64, radius: f32 },

    /// Fix has non-finite or out-of-range coordinates
    #[error("Invalid fix: lat={lat}, lon={lon}")]
    InvalidFix { lat: f64, lon: f64 },

    /// The location provider refused the request
    #[error("{0}")]
    Location(#[from] LocationError),
}

/// Failure of the settings backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Settings store error: {0}")]
pub struct StoreError(pub String);

/// Errors that can occur when parsing NMEA 0183 sentences
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Sentence does not start with `$` or lacks a talker/type field
    #[error("Not an NMEA sentence: {0}")]
    NotNmea(String),

    /// Sentence type is valid NMEA but carries no position
    #[error("Unsupported sentence type: {0}")]
    Unsupported(String),

    /// Receiver reports no valid position (RMC status V, GGA quality 0)
    #[error("No position fix in sentence")]
    NoFix,

    /// Rejected by the sentence decoder (checksum, malformed field)
    #[error("Invalid sentence: {0}")]
    Invalid(String),
}
