//! SQLite trace log.
//!
//! The connection lives on a dedicated worker thread. Callers hand it
//! closures over a channel; writes are fire-and-forget so the fix path never
//! waits on disk, reads reply through a oneshot. The worker executes commands
//! in order, which keeps the stored trace in fix arrival order.

use anchorwatch_core::TracePoint;
use log::{debug, error, info, warn};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::{oneshot, watch};

const SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS trace_points (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_ms  INTEGER NOT NULL,
    lat           REAL NOT NULL,
    lon           REAL NOT NULL,
    accuracy_m    REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trace_points_ts ON trace_points (timestamp_ms);
";

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot create {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Trace database schema {0} is newer than supported {1}")]
    SchemaTooNew(i32, i32),

    #[error("Trace database worker is not running")]
    WorkerGone,
}

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct TraceDbInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for TraceDbInner {
    fn drop(&mut self) {
        let mut guard = self.worker.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = guard.take() {
            if let Err(e) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to trace DB thread: {}", e);
            }
            if handle.join().is_err() {
                error!("Trace DB thread panicked");
            }
        }
    }
}

fn migrate(conn: &mut Connection) -> Result<(), TraceError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(TraceError::SchemaTooNew(version, SCHEMA_VERSION));
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_V1)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn insert(conn: &Connection, point: &TracePoint) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO trace_points (timestamp_ms, lat, lon, accuracy_m) VALUES (?1, ?2, ?3, ?4)",
        params![
            point.timestamp_ms,
            point.lat,
            point.lon,
            point.accuracy_meters as f64
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn select_latest(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<TracePoint>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, timestamp_ms, lat, lon, accuracy_m
         FROM trace_points
         ORDER BY timestamp_ms DESC, id DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(TracePoint {
            id: row.get(0)?,
            timestamp_ms: row.get(1)?,
            lat: row.get(2)?,
            lon: row.get(3)?,
            accuracy_meters: row.get::<_, f64>(4)? as f32,
        })
    })?;
    let points = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(points)
}

#[derive(Clone)]
pub struct TraceDb {
    inner: Arc<TraceDbInner>,
    db_path: Arc<PathBuf>,
    /// Bumped after every committed write
    version: Arc<watch::Sender<u64>>,
}

impl TraceDb {
    pub fn open(db_path: PathBuf) -> Result<Self, TraceError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TraceError::Io(parent.display().to_string(), e))?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("trace-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(conn) => conn,
                    Err(e) => {
                        let _ = ready_tx.send(Err(TraceError::from(e)));
                        return;
                    }
                };

                if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
                    warn!("Failed to enable WAL mode: {}", e);
                }

                let init = migrate(&mut conn);
                if ready_tx.send(init).is_err() {
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }
                debug!("Trace DB thread shutting down");
            })
            .map_err(|e| TraceError::Io("trace-db thread".to_string(), e))?;

        ready_rx.recv().map_err(|_| TraceError::WorkerGone)??;
        info!("Trace database at {}", db_path.display());

        let (version, _) = watch::channel(0);
        Ok(TraceDb {
            inner: Arc::new(TraceDbInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
            version: Arc::new(version),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    fn submit(&self, task: DbTask) -> Result<(), TraceError> {
        self.inner
            .sender
            .send(DbCommand::Execute(task))
            .map_err(|_| TraceError::WorkerGone)
    }

    /// Run `task` on the worker and wait for its result
    pub async fn execute<F, T>(&self, task: F) -> Result<T, TraceError>
    where
        F: FnOnce(&mut Connection) -> Result<T, TraceError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Box::new(move |conn| {
            let _ = reply_tx.send(task(conn));
        }))?;
        reply_rx.await.map_err(|_| TraceError::WorkerGone)?
    }

    /// Queue a point for writing. Failures are logged, never returned.
    pub fn append(&self, point: TracePoint) {
        let version = self.version.clone();
        let queued = self.submit(Box::new(move |conn| match insert(conn, &point) {
            Ok(id) => {
                version.send_modify(|v| *v += 1);
                debug!("Trace point {} at {}", id, point.timestamp_ms);
            }
            Err(e) => warn!("Failed to store trace point: {}", e),
        }));
        if let Err(e) = queued {
            warn!("Trace point dropped: {}", e);
        }
    }

    /// Queue deletion of every stored point
    pub fn clear_all(&self) {
        let version = self.version.clone();
        let queued = self.submit(Box::new(move |conn| {
            match conn.execute("DELETE FROM trace_points", []) {
                Ok(n) => {
                    version.send_modify(|v| *v += 1);
                    info!("Cleared {} trace points", n);
                }
                Err(e) => warn!("Failed to clear trace: {}", e),
            }
        }));
        if let Err(e) = queued {
            warn!("Trace clear dropped: {}", e);
        }
    }

    /// Up to `limit` points, newest first
    pub async fn latest(&self, limit: usize) -> Result<Vec<TracePoint>, TraceError> {
        self.execute(move |conn| Ok(select_latest(conn, limit)?))
            .await
    }

    /// Wait until all previously queued writes are done
    pub async fn flush(&self) -> Result<(), TraceError> {
        self.execute(|_| Ok(())).await
    }

    /// Snapshots of `latest(limit)`, refreshed after every write.
    ///
    /// The first value is loaded immediately. The refresh task ends when the
    /// receiver is dropped.
    pub fn subscribe_latest(&self, limit: usize) -> watch::Receiver<Vec<TracePoint>> {
        let (tx, rx) = watch::channel(Vec::new());
        let db = self.clone();
        let mut version = self.version.subscribe();

        tokio::spawn(async move {
            loop {
                let _ = version.borrow_and_update();
                match db.latest(limit).await {
                    Ok(points) => {
                        if tx.send(points).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Trace snapshot failed: {}", e);
                        break;
                    }
                }
                tokio::select! {
                    _ = tx.closed() => break,
                    changed = version.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Trace snapshot subscription ended");
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn point(ts: i64, lat: f64) -> TracePoint {
        TracePoint {
            id: 0,
            timestamp_ms: ts,
            lat,
            lon: -4.5,
            accuracy_meters: 3.0,
        }
    }

    fn open_test_db() -> (TraceDb, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = TraceDb::open(temp_dir.path().join("trace.sqlite")).unwrap();
        (db, temp_dir)
    }

    #[tokio::test]
    async fn test_latest_newest_first() {
        let (db, _temp) = open_test_db();
        for i in 0..5 {
            db.append(point(1_000 + i, 48.0 + i as f64 * 0.001));
        }

        let latest = db.latest(3).await.unwrap();
        let ts: Vec<i64> = latest.iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(ts, vec![1_004, 1_003, 1_002]);
        assert!(latest[0].id > latest[1].id);
    }

    #[tokio::test]
    async fn test_clear_all_empties_store() {
        let (db, _temp) = open_test_db();
        db.append(point(1, 48.0));
        db.append(point(2, 48.1));
        db.clear_all();
        assert!(db.latest(10).await.unwrap().is_empty());

        db.append(point(3, 48.2));
        assert_eq!(db.latest(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("trace.sqlite");
        {
            let db = TraceDb::open(path.clone()).unwrap();
            db.append(point(1, 48.0));
            db.flush().await.unwrap();
        }
        let db = TraceDb::open(path).unwrap();
        assert_eq!(db.latest(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_latest_follows_writes() {
        let (db, _temp) = open_test_db();
        db.append(point(1, 48.0));
        db.flush().await.unwrap();

        let mut rx = db.subscribe_latest(10);
        rx.wait_for(|pts| pts.len() == 1).await.unwrap();

        db.append(point(2, 48.1));
        let snapshot = rx.wait_for(|pts| pts.len() == 2).await.unwrap().clone();
        assert_eq!(snapshot[0].timestamp_ms, 2);

        db.clear_all();
        rx.wait_for(|pts| pts.is_empty()).await.unwrap();
    }
}
