//! Connection manager
//!
//! Owns the single logical connection of a [`Database`], collapses
//! concurrent opens into one physical open and runs additive schema
//! upgrades when the stored version is older than the requested one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use tracing::{debug, error, info, warn};

use crate::{Error, Result, StorageFault};
use super::handle::Handle;
use super::schema;

/// Default time SQLite waits on a locked database before reporting busy
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

type OpenAttempt = Shared<BoxFuture<'static, Result<Arc<Handle>>>>;

struct ConnState {
    requested_version: u32,
    handle: Option<Arc<Handle>>,
    in_flight: Option<OpenAttempt>,
}

/// The persistence service: one database file, one logical connection
///
/// Construct it once and share it (`Arc<Database>`) with every caller.
pub struct Database {
    name: String,
    path: PathBuf,
    busy_timeout: Duration,
    opens: AtomicUsize,
    state: Mutex<ConnState>,
}

impl Database {
    /// Create a service for the database file at `path`; nothing is opened yet
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            opens: AtomicUsize::new(0),
            state: Mutex::new(ConnState {
                requested_version: version,
                handle: None,
                in_flight: None,
            }),
        }
    }

    /// Override how long an open waits for a locked database
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema version the next open will request
    pub fn version(&self) -> u32 {
        self.lock_state().requested_version
    }

    /// Request a different schema version; the current handle becomes stale
    /// and the next operation reopens (and upgrades) the database.
    pub fn set_version(&self, version: u32) {
        self.lock_state().requested_version = version;
    }

    /// Number of physical opens performed so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    /// Release the current handle, if any. The next operation reopens.
    pub fn close(&self) {
        let handle = self.lock_state().handle.take();
        if let Some(handle) = handle {
            handle.close();
        }
    }

    /// Return the ready-to-use handle, opening the database if needed
    ///
    /// Callers arriving while an open is in flight await that same attempt.
    pub async fn open_db(&self) -> Result<Arc<Handle>> {
        let (attempt, stale) = {
            let mut state = self.lock_state();
            match &state.in_flight {
                Some(pending) => (pending.clone(), None),
                None => {
                    if let Some(handle) = &state.handle {
                        if !handle.is_closed() && handle.version() == state.requested_version {
                            return Ok(Arc::clone(handle));
                        }
                    }

                    let stale = state.handle.take();
                    let serial = self.opens.fetch_add(1, Ordering::AcqRel) + 1;
                    let request = OpenRequest {
                        name: self.name.clone(),
                        path: self.path.clone(),
                        version: state.requested_version,
                        busy_timeout: self.busy_timeout,
                        serial,
                    };
                    let attempt = request.run().boxed().shared();
                    state.in_flight = Some(attempt.clone());
                    (attempt, stale)
                }
            }
        };

        // Closing waits for any transaction still running on the old handle.
        if let Some(stale) = stale {
            debug!(
                "Releasing stale handle for {} (version {}, open #{})",
                self.name,
                stale.version(),
                stale.serial()
            );
            if let Err(e) = tokio::task::spawn_blocking(move || stale.close()).await {
                warn!("Closing stale handle for {} failed: {}", self.name, e);
            }
        }

        let outcome = attempt.clone().await;

        let mut state = self.lock_state();
        let is_current = state
            .in_flight
            .as_ref()
            .is_some_and(|pending| pending.ptr_eq(&attempt));
        if is_current {
            state.in_flight = None;
            if let Ok(handle) = &outcome {
                state.handle = Some(Arc::clone(handle));
            }
        }

        outcome
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = state.handle.take() {
            handle.close();
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("version", &self.version())
            .field("opens", &self.open_count())
            .finish()
    }
}

/// Everything one physical open needs, detached from the `Database`
struct OpenRequest {
    name: String,
    path: PathBuf,
    version: u32,
    busy_timeout: Duration,
    serial: usize,
}

impl OpenRequest {
    async fn run(self) -> Result<Arc<Handle>> {
        let name = self.name.clone();
        let outcome = tokio::task::spawn_blocking(move || self.open())
            .await
            .map_err(|e| Error::Worker(e.to_string()))?;

        match outcome {
            Ok(handle) => {
                info!("Database {} opened successfully", name);
                Ok(Arc::new(handle))
            }
            Err(fault) => {
                let err = classify_open_failure(&name, fault);
                error!("Database open error: {}", err);
                Err(err)
            }
        }
    }

    fn open(self) -> std::result::Result<Handle, StorageFault> {
        info!("Opening database {} version {}...", self.name, self.version);
        if self.version == 0 {
            return Err(StorageFault::InvalidVersion);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;

        let stored = schema::stored_version(&conn)?;
        if self.version < stored {
            return Err(StorageFault::VersionTooLow { requested: self.version, stored });
        }
        if self.version > stored {
            upgrade(&mut conn, self.version)?;
        }

        let collections = schema::existing_collections(&conn)?;
        let missing: Vec<&str> = schema::COLLECTIONS
            .iter()
            .copied()
            .filter(|name| !collections.contains(*name))
            .collect();
        if !missing.is_empty() {
            warn!(
                "Missing stores (will be created on next upgrade): {}",
                missing.join(", ")
            );
        }

        Ok(Handle::new(self.name, self.version, self.serial, collections, conn))
    }
}

/// Create every registry collection that is missing; never drops anything
///
/// Runs under one immediate transaction and re-reads the stored version once
/// the write lock is held, so a concurrent upgrader is not repeated.
fn upgrade(conn: &mut Connection, target: u32) -> rusqlite::Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = schema::stored_version(&tx)?;
    if current >= target {
        debug!("Schema already at version {current}, skipping upgrade");
        return Ok(());
    }

    info!("Upgrading database from version {} to {}", current, target);
    let existing = schema::existing_collections(&tx)?;
    for name in schema::COLLECTIONS.iter().copied() {
        if existing.contains(name) {
            debug!("Store {} already exists", name);
        } else {
            info!("Creating store: {}", name);
            tx.execute(&schema::create_collection_sql(name), [])?;
        }
    }
    schema::set_stored_version(&tx, target)?;
    tx.commit()?;

    info!("Database upgrade completed");
    Ok(())
}

/// Lock contention means another connection holds the database: `Blocked`.
/// Everything else is an `OpenFailed` carrying the cause.
fn classify_open_failure(name: &str, fault: StorageFault) -> Error {
    if let StorageFault::Engine(e) = &fault {
        if matches!(
            e.sqlite_error_code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        ) {
            return Error::Blocked(name.to_string());
        }
    }
    Error::OpenFailed {
        database: name.to_string(),
        source: Arc::new(fault),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_db(dir: &tempfile::TempDir, version: u32) -> Database {
        Database::new(dir.path().join("twin.db"), "mytwin", version)
    }

    #[tokio::test]
    async fn test_first_open_creates_registry() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_db(&dir, 3);

        let handle = db.open_db().await.unwrap();
        let names: Vec<&str> = handle.object_store_names().collect();
        assert_eq!(names.len(), schema::COLLECTIONS.len());
        for name in schema::COLLECTIONS {
            assert!(handle.contains(name), "missing {name}");
        }
        assert_eq!(handle.version(), 3);
        assert_eq!(db.open_count(), 1);
    }

    #[tokio::test]
    async fn test_reuses_live_handle() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_db(&dir, 3);

        let first = db.open_db().await.unwrap();
        let second = db.open_db().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(db.open_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_opens_share_one_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(temp_db(&dir, 3));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let db = Arc::clone(&db);
            tasks.push(tokio::spawn(async move { db.open_db().await }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(db.open_count(), 1);
        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], handle));
        }
    }

    #[tokio::test]
    async fn test_joined_opens_share_one_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_db(&dir, 3);

        let (a, b, c, d, e) = tokio::join!(
            db.open_db(),
            db.open_db(),
            db.open_db(),
            db.open_db(),
            db.open_db()
        );
        let a = a.unwrap();
        for other in [b, c, d, e] {
            assert!(Arc::ptr_eq(&a, &other.unwrap()));
        }
        assert_eq!(db.open_count(), 1);
    }

    #[tokio::test]
    async fn test_close_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_db(&dir, 3);

        let first = db.open_db().await.unwrap();
        db.close();
        assert!(first.is_closed());

        let second = db.open_db().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.serial(), 2);
        assert_eq!(db.open_count(), 2);
    }

    #[tokio::test]
    async fn test_upgrade_is_additive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twin.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(&schema::create_collection_sql("processes"), []).unwrap();
            conn.execute(
                "INSERT INTO processes (key, record) VALUES ('1', '{\"id\":1,\"name\":\"RCA clean\"}')",
                [],
            )
            .unwrap();
            schema::set_stored_version(&conn, 1).unwrap();
        }

        let db = Database::new(&path, "mytwin", 1);
        let v1 = db.open_db().await.unwrap();
        assert!(v1.contains("processes"));
        assert!(!v1.contains("factories"));

        db.set_version(3);
        let v3 = db.open_db().await.unwrap();
        assert!(v1.is_closed());
        assert_eq!(v3.version(), 3);
        for name in schema::COLLECTIONS {
            assert!(v3.contains(name), "missing {name}");
        }

        let processes = db.get_all("processes").await.unwrap();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0]["name"], json!("RCA clean"));
    }

    #[tokio::test]
    async fn test_low_version_creates_whole_registry() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_db(&dir, 1);

        let handle = db.open_db().await.unwrap();
        assert_eq!(handle.version(), 1);
        for name in schema::COLLECTIONS {
            assert!(handle.contains(name), "missing {name}");
        }

        db.put("products", json!({"id": 1, "productName": "Wafer"})).await.unwrap();
        assert_eq!(db.count("products").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_version_persists_across_services() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = temp_db(&dir, 2);
            db.open_db().await.unwrap();
        }

        let conn = Connection::open(dir.path().join("twin.db")).unwrap();
        assert_eq!(schema::stored_version(&conn).unwrap(), 2);
        drop(conn);

        let db = temp_db(&dir, 2);
        let handle = db.open_db().await.unwrap();
        assert_eq!(handle.version(), 2);
        assert!(handle.contains("products"));
        assert!(handle.contains("equipment"));
        assert_eq!(db.open_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_close_does_not_stall_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_db(&dir, 1);
        let old = db.open_db().await.unwrap();

        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let busy = Arc::clone(&old);
        let writer = tokio::task::spawn_blocking(move || {
            busy.with_conn(|_| {
                let _ = locked_tx.send(());
                std::thread::sleep(Duration::from_millis(400));
                Ok(())
            })
        });
        locked_rx.await.unwrap();

        db.set_version(2);
        let started = std::time::Instant::now();
        let (reopened, ticked) = tokio::join!(db.open_db(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            started.elapsed()
        });

        assert!(ticked < Duration::from_millis(300), "runtime stalled for {ticked:?}");
        assert_eq!(reopened.unwrap().version(), 2);
        assert!(old.is_closed());
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_downgrade_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        temp_db(&dir, 3).open_db().await.unwrap();

        let older = temp_db(&dir, 2);
        let err = older.open_db().await.unwrap_err();
        match err {
            Error::OpenFailed { source, .. } => {
                assert!(matches!(*source, StorageFault::VersionTooLow { requested: 2, stored: 3 }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_version_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_db(&dir, 0);
        assert!(matches!(db.open_db().await, Err(Error::OpenFailed { .. })));
    }

    #[tokio::test]
    async fn test_blocked_open_clears_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twin.db");
        let db = Database::new(&path, "mytwin", 3).with_busy_timeout(Duration::ZERO);
        db.open_db().await.unwrap();
        db.close();

        let blocker = Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let err = db.open_db().await.unwrap_err();
        assert!(matches!(err, Error::Blocked(ref name) if name == "mytwin"), "got {err:?}");

        blocker.execute_batch("COMMIT").unwrap();
        let handle = db.open_db().await.unwrap();
        assert!(handle.contains("processes"));
        assert_eq!(db.open_count(), 3);
    }
}
