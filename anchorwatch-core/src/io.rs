//! Collaborator interfaces consumed by the watch engine.
//!
//! The engine never touches a platform API directly. A host (the native
//! server, a mobile shell, a test) injects implementations of these traits
//! when it constructs an [`AnchorWatch`](crate::watch::AnchorWatch).
//!
//! All methods take `&self` and are fire-and-forget from the engine's point
//! of view: implementations must not block the caller on I/O.

use serde::{Deserialize, Serialize};

use crate::error::LocationError;
use crate::model::Fix;

// =============================================================================
// Location
// =============================================================================

/// Parameters for a location update subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRequest {
    /// Desired interval between fixes
    pub interval_ms: u64,
    /// Fastest interval the provider may deliver at
    pub min_interval_ms: u64,
    /// Always true for anchor watching
    pub high_accuracy: bool,
}

impl LocationRequest {
    /// High-accuracy request with the minimum interval at half the interval
    pub fn high_accuracy(interval_ms: u64) -> Self {
        LocationRequest {
            interval_ms,
            min_interval_ms: interval_ms / 2,
            high_accuracy: true,
        }
    }
}

/// Opaque handle to an active location subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Source of position fixes.
///
/// Fixes are delivered asynchronously through a channel owned by the
/// implementation; this trait only manages the subscription lifecycle.
pub trait LocationProvider: Send + Sync {
    /// Start delivering fixes with the given parameters.
    fn request_updates(&self, request: LocationRequest) -> Result<SubscriptionId, LocationError>;

    /// Stop a subscription. Must take effect before returning.
    fn cancel(&self, subscription: SubscriptionId);

    /// Whether the platform currently grants location access.
    fn has_permission(&self) -> bool {
        true
    }

    /// Most recent fix the source has seen, with or without a subscription.
    fn last_known(&self) -> Option<Fix> {
        None
    }
}

// =============================================================================
// Alerts
// =============================================================================

/// Sound, vibration and notification output.
///
/// There is one sink per watch session. `sound_alarm` while already sounding
/// must not stack a second sound.
pub trait AlertSink: Send + Sync {
    fn sound_alarm(&self);
    fn vibrate(&self, duration_ms: u64);
    fn stop_alarm(&self);
    /// Post the high-priority "outside zone" alert
    fn post_alert(&self, message: &str);
    fn cancel_alert(&self);
    /// Update the persistent status line
    fn post_status(&self, message: &str);
}

// =============================================================================
// Trace
// =============================================================================

/// Receiver of accepted fixes for the position trace.
///
/// `record` is called on the fix-processing path and must return without
/// waiting for storage.
pub trait TraceSink: Send + Sync {
    fn record(&self, fix: &Fix);

    /// Drop every recorded point, durable and live
    fn clear(&self);
}
