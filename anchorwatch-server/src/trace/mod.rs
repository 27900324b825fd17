//! Position trace: durable log plus live bus.
//!
//! Every accepted fix is published on a broadcast channel for connected
//! renderers and queued for the SQLite log. Renderers join the two with a
//! [`TraceBuffer`](anchorwatch_core::TraceBuffer): pull `latest(N)` first,
//! then apply live events newer than the pull.

pub mod db;

use anchorwatch_core::{Fix, LivePoint, TraceEvent, TracePoint, TraceSink};
use log::trace;
use tokio::sync::broadcast;

pub use db::{TraceDb, TraceError};

/// Live bus capacity. Slow subscribers lag and must re-pull.
pub const LIVE_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct TracePipeline {
    db: TraceDb,
    live_tx: broadcast::Sender<TraceEvent>,
}

impl TracePipeline {
    pub fn new(db: TraceDb) -> Self {
        let (live_tx, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        TracePipeline { db, live_tx }
    }

    pub fn db(&self) -> &TraceDb {
        &self.db
    }

    /// Subscribe to the live bus. Subscribe before pulling `latest` so no
    /// point falls between the two.
    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.live_tx.subscribe()
    }

    /// Up to `limit` stored points, newest first
    pub async fn latest(&self, limit: usize) -> Result<Vec<TracePoint>, TraceError> {
        self.db.latest(limit).await
    }

    fn publish(&self, event: TraceEvent) {
        // No receivers is fine, nobody is looking at the map
        if let Err(broadcast::error::SendError(event)) = self.live_tx.send(event) {
            trace!("No live subscribers for {:?}", event);
        }
    }
}

impl TraceSink for TracePipeline {
    fn record(&self, fix: &Fix) {
        self.publish(TraceEvent::Point(LivePoint::from(fix)));
        self.db.append(TracePoint::from_fix(fix));
    }

    fn clear(&self) {
        self.db.clear_all();
        self.publish(TraceEvent::Cleared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorwatch_core::TraceBuffer;
    use tempfile::TempDir;

    fn create_test_pipeline() -> (TracePipeline, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = TraceDb::open(temp_dir.path().join("trace.sqlite")).unwrap();
        (TracePipeline::new(db), temp_dir)
    }

    #[tokio::test]
    async fn test_record_reaches_bus_and_store() {
        let (pipeline, _temp) = create_test_pipeline();
        let mut rx = pipeline.subscribe();

        pipeline.record(&Fix::new(48.0, -4.5, 3.0, 1_000));

        match rx.recv().await.unwrap() {
            TraceEvent::Point(p) => assert_eq!(p.timestamp_ms, 1_000),
            other => panic!("unexpected event {:?}", other),
        }
        let stored = pipeline.latest(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].lat, 48.0);
    }

    #[tokio::test]
    async fn test_clear_empties_both() {
        let (pipeline, _temp) = create_test_pipeline();
        pipeline.record(&Fix::new(48.0, -4.5, 3.0, 1_000));
        let mut rx = pipeline.subscribe();

        pipeline.clear();

        assert_eq!(rx.recv().await.unwrap(), TraceEvent::Cleared);
        assert!(pipeline.latest(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pull_then_live_has_no_duplicates() {
        let (pipeline, _temp) = create_test_pipeline();
        pipeline.record(&Fix::new(48.0, -4.5, 3.0, 1_000));
        pipeline.record(&Fix::new(48.0001, -4.5, 3.0, 2_000));

        let mut rx = pipeline.subscribe();
        // Lands on the bus and in the store before the pull
        pipeline.record(&Fix::new(48.0002, -4.5, 3.0, 3_000));

        let mut buffer = TraceBuffer::default();
        buffer.load(&pipeline.latest(2000).await.unwrap());
        assert_eq!(buffer.len(), 3);

        // Replayed live copy of the same point is ignored
        let event = rx.recv().await.unwrap();
        assert!(!buffer.apply(&event));

        pipeline.record(&Fix::new(48.0003, -4.5, 3.0, 4_000));
        let event = rx.recv().await.unwrap();
        assert!(buffer.apply(&event));
        assert_eq!(buffer.len(), 4);
    }
}
