//! Headless alert sink.
//!
//! There is no speaker or vibration motor on a server, so alarms go to the
//! log and to API clients. The sink keeps the current alarm, alert and status
//! so `GET status` can show them, and publishes every change on a broadcast
//! channel.

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use anchorwatch_core::AlertSink;

const ALERT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSnapshot {
    pub sounding: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    pub status: String,
}

#[derive(Debug, Default)]
struct Messages {
    alert: Option<String>,
    status: String,
}

pub struct LogAlertSink {
    sounding: AtomicBool,
    messages: Mutex<Messages>,
    tx: broadcast::Sender<AlertSnapshot>,
}

impl Default for LogAlertSink {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        LogAlertSink {
            sounding: AtomicBool::new(false),
            messages: Mutex::new(Messages::default()),
            tx,
        }
    }
}

impl LogAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn messages(&self) -> MutexGuard<'_, Messages> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_sounding(&self) -> bool {
        self.sounding.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> AlertSnapshot {
        let messages = self.messages();
        AlertSnapshot {
            sounding: self.is_sounding(),
            alert: messages.alert.clone(),
            status: messages.status.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertSnapshot> {
        self.tx.subscribe()
    }

    fn publish(&self) {
        let _ = self.tx.send(self.snapshot());
    }
}

impl AlertSink for LogAlertSink {
    fn sound_alarm(&self) {
        if self.sounding.swap(true, Ordering::SeqCst) {
            debug!("Alarm already sounding");
            return;
        }
        warn!("ANCHOR ALARM");
        self.publish();
    }

    fn vibrate(&self, duration_ms: u64) {
        debug!("Vibrate {} ms", duration_ms);
    }

    fn stop_alarm(&self) {
        if self.sounding.swap(false, Ordering::SeqCst) {
            info!("Alarm stopped");
            self.publish();
        }
    }

    fn post_alert(&self, message: &str) {
        warn!("Alert: {}", message);
        self.messages().alert = Some(message.to_string());
        self.publish();
    }

    fn cancel_alert(&self) {
        if self.messages().alert.take().is_some() {
            debug!("Alert cancelled");
            self.publish();
        }
    }

    fn post_status(&self, message: &str) {
        info!("Status: {}", message);
        self.messages().status = message.to_string();
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_does_not_stack() {
        let sink = LogAlertSink::new();
        let mut rx = sink.subscribe();

        sink.sound_alarm();
        sink.sound_alarm();
        assert!(sink.is_sounding());
        assert!(rx.try_recv().unwrap().sounding);
        // Second call published nothing
        assert!(rx.try_recv().is_err());

        sink.stop_alarm();
        sink.stop_alarm();
        assert!(!rx.try_recv().unwrap().sounding);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_snapshot_tracks_messages() {
        let sink = LogAlertSink::new();
        sink.post_status("Armed");
        sink.post_alert("Outside zone: 111 m");
        assert_eq!(
            sink.snapshot(),
            AlertSnapshot {
                sounding: false,
                alert: Some("Outside zone: 111 m".into()),
                status: "Armed".into(),
            }
        );

        sink.cancel_alert();
        assert_eq!(sink.snapshot().alert, None);
    }
}
