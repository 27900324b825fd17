//! Adaptive sampling of the location provider.
//!
//! While the controlling application is in the foreground fixes are
//! requested every second so the live map stays responsive. In the background
//! the user-configured interval is used to save power.
//!
//! The controller owns the single outstanding subscription: every change of
//! interval cancels it before a new one is issued.

use log::{debug, info};

use crate::error::LocationError;
use crate::io::{LocationProvider, LocationRequest, SubscriptionId};

/// Interval used while the application is in the foreground
pub const FOREGROUND_INTERVAL_MS: u64 = 1_000;
/// Lower bound of the user-configurable interval
pub const MIN_BACKGROUND_INTERVAL_MS: u64 = 15_000;
/// Upper bound of the user-configurable interval
pub const MAX_BACKGROUND_INTERVAL_MS: u64 = 120_000;
/// Interval used when none is configured
pub const DEFAULT_BACKGROUND_INTERVAL_MS: u64 = 60_000;

/// Clamp a user interval to the supported background range
pub fn clamp_background_interval(interval_ms: u64) -> u64 {
    interval_ms.clamp(MIN_BACKGROUND_INTERVAL_MS, MAX_BACKGROUND_INTERVAL_MS)
}

#[derive(Debug)]
pub struct SamplingController {
    foreground: bool,
    user_interval_ms: u64,
    active: Option<(SubscriptionId, LocationRequest)>,
}

impl SamplingController {
    pub fn new(user_interval_ms: u64, foreground: bool) -> Self {
        SamplingController {
            foreground,
            user_interval_ms: clamp_background_interval(user_interval_ms),
            active: None,
        }
    }

    /// Interval the policy currently asks for
    pub fn target_interval_ms(&self) -> u64 {
        if self.foreground {
            FOREGROUND_INTERVAL_MS
        } else {
            self.user_interval_ms
        }
    }

    pub fn user_interval_ms(&self) -> u64 {
        self.user_interval_ms
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    /// Request built from the current policy
    pub fn request(&self) -> LocationRequest {
        LocationRequest::high_accuracy(self.target_interval_ms())
    }

    /// Active subscription and the request it was issued with
    pub fn active(&self) -> Option<(SubscriptionId, LocationRequest)> {
        self.active
    }

    pub fn is_subscribed(&self) -> bool {
        self.active.is_some()
    }

    /// Returns true when the target interval changed
    pub fn set_foreground(&mut self, foreground: bool) -> bool {
        let before = self.target_interval_ms();
        self.foreground = foreground;
        before != self.target_interval_ms()
    }

    /// Returns true when the target interval changed
    pub fn set_user_interval_ms(&mut self, interval_ms: u64) -> bool {
        let before = self.target_interval_ms();
        self.user_interval_ms = clamp_background_interval(interval_ms);
        before != self.target_interval_ms()
    }

    /// Replace the outstanding subscription with one matching the policy.
    ///
    /// The old subscription is cancelled first, even when the new request
    /// fails, so two subscriptions never coexist.
    pub fn resubscribe(
        &mut self,
        provider: &dyn LocationProvider,
    ) -> Result<LocationRequest, LocationError> {
        self.cancel(provider);

        if !provider.has_permission() {
            return Err(LocationError::PermissionDenied);
        }

        let request = self.request();
        let id = provider.request_updates(request)?;
        info!(
            "Location updates every {} ms (min {} ms)",
            request.interval_ms, request.min_interval_ms
        );
        self.active = Some((id, request));
        Ok(request)
    }

    /// Cancel the outstanding subscription, if any
    pub fn cancel(&mut self, provider: &dyn LocationProvider) {
        if let Some((id, _)) = self.active.take() {
            debug!("Cancelling location subscription {:?}", id);
            provider.cancel(id);
        }
    }
}

/// Rate limiter for push-style location sources.
///
/// Sources such as an NMEA feed emit fixes at their own rate. The throttle
/// keeps one fix per `interval_ms` slot, and never forwards two fixes closer
/// than `min_interval_ms` apart even when catching up on a late slot.
#[derive(Debug, Clone)]
pub struct FixThrottle {
    interval_ms: u64,
    min_interval_ms: u64,
    last_ms: Option<u64>,
    due_ms: u64,
}

impl FixThrottle {
    pub fn new(request: &LocationRequest) -> Self {
        FixThrottle {
            interval_ms: request.interval_ms,
            min_interval_ms: request.min_interval_ms,
            last_ms: None,
            due_ms: 0,
        }
    }

    /// Decide whether a fix arriving at `now_ms` is forwarded
    pub fn accept(&mut self, now_ms: u64) -> bool {
        let Some(last) = self.last_ms else {
            self.last_ms = Some(now_ms);
            self.due_ms = now_ms + self.interval_ms;
            return true;
        };

        if now_ms < self.due_ms || now_ms.saturating_sub(last) < self.min_interval_ms {
            return false;
        }

        self.last_ms = Some(now_ms);
        self.due_ms = if self.due_ms + self.interval_ms < now_ms {
            // Fell more than a slot behind, restart the schedule
            now_ms + self.interval_ms
        } else {
            self.due_ms + self.interval_ms
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeLocation {
        permission: bool,
        next_id: Mutex<u64>,
        active: Mutex<Vec<SubscriptionId>>,
        requests: Mutex<Vec<LocationRequest>>,
    }

    impl FakeLocation {
        fn granted() -> Self {
            FakeLocation {
                permission: true,
                ..Default::default()
            }
        }
    }

    impl LocationProvider for FakeLocation {
        fn request_updates(
            &self,
            request: LocationRequest,
        ) -> Result<SubscriptionId, LocationError> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let id = SubscriptionId(*next);
            self.active.lock().unwrap().push(id);
            self.requests.lock().unwrap().push(request);
            Ok(id)
        }

        fn cancel(&self, subscription: SubscriptionId) {
            self.active.lock().unwrap().retain(|s| *s != subscription);
        }

        fn has_permission(&self) -> bool {
            self.permission
        }
    }

    #[test]
    fn test_foreground_uses_fast_interval() {
        let mut sampler = SamplingController::new(60_000, false);
        assert_eq!(sampler.target_interval_ms(), 60_000);
        assert!(sampler.set_foreground(true));
        assert_eq!(sampler.target_interval_ms(), FOREGROUND_INTERVAL_MS);
        // User interval changes do not affect the foreground cadence
        assert!(!sampler.set_user_interval_ms(30_000));
        assert!(sampler.set_foreground(false));
        assert_eq!(sampler.target_interval_ms(), 30_000);
    }

    #[test]
    fn test_user_interval_clamped() {
        let mut sampler = SamplingController::new(1_000, false);
        assert_eq!(sampler.target_interval_ms(), MIN_BACKGROUND_INTERVAL_MS);
        sampler.set_user_interval_ms(600_000);
        assert_eq!(sampler.target_interval_ms(), MAX_BACKGROUND_INTERVAL_MS);
    }

    #[test]
    fn test_request_shape() {
        let sampler = SamplingController::new(60_000, false);
        let request = sampler.request();
        assert_eq!(request.interval_ms, 60_000);
        assert_eq!(request.min_interval_ms, 30_000);
        assert!(request.high_accuracy);
    }

    #[test]
    fn test_resubscribe_never_overlaps() {
        let provider = FakeLocation::granted();
        let mut sampler = SamplingController::new(60_000, false);

        sampler.resubscribe(&provider).unwrap();
        sampler.set_foreground(true);
        sampler.resubscribe(&provider).unwrap();
        sampler.set_foreground(false);
        sampler.resubscribe(&provider).unwrap();

        assert_eq!(provider.active.lock().unwrap().len(), 1);
        let requests = provider.requests.lock().unwrap();
        let intervals: Vec<u64> = requests.iter().map(|r| r.interval_ms).collect();
        assert_eq!(intervals, vec![60_000, 1_000, 60_000]);

        sampler.cancel(&provider);
        assert!(provider.active.lock().unwrap().is_empty());
        assert!(!sampler.is_subscribed());
    }

    #[test]
    fn test_resubscribe_without_permission() {
        let provider = FakeLocation::default();
        let mut sampler = SamplingController::new(60_000, false);
        assert_eq!(
            sampler.resubscribe(&provider),
            Err(LocationError::PermissionDenied)
        );
        assert!(!sampler.is_subscribed());
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_throttle_keeps_one_fix_per_slot() {
        let mut throttle = FixThrottle::new(&LocationRequest::high_accuracy(10_000));
        let accepted: Vec<u64> = (0..=30)
            .map(|s| s * 1_000)
            .filter(|&t| throttle.accept(t))
            .collect();
        assert_eq!(accepted, vec![0, 10_000, 20_000, 30_000]);
    }

    #[test]
    fn test_throttle_catches_up_after_gap() {
        let mut throttle = FixThrottle::new(&LocationRequest::high_accuracy(10_000));
        assert!(throttle.accept(0));
        // Source silent for a while
        assert!(throttle.accept(35_000));
        assert!(!throttle.accept(40_000));
        assert!(throttle.accept(45_000));
    }
}
