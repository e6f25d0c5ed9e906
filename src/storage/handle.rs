//! Opened database handle

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use rusqlite::Connection;
use crate::StorageFault;

/// One physical connection to the database, plus the collections it saw
/// when it was opened.
///
/// Handles are shared as `Arc<Handle>` and only ever closed by the
/// [`Database`](super::Database) that opened them.
pub struct Handle {
    name: String,
    version: u32,
    serial: usize,
    collections: BTreeSet<String>,
    conn: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

impl Handle {
    pub(crate) fn new(
        name: String,
        version: u32,
        serial: usize,
        collections: BTreeSet<String>,
        conn: Connection,
    ) -> Self {
        Self {
            name,
            version,
            serial,
            collections,
            conn: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
        }
    }

    /// Database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema version this handle was opened at
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Sequence number of the physical open that produced this handle
    pub fn serial(&self) -> usize {
        self.serial
    }

    /// Collections present in the database
    pub fn object_store_names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(String::as_str)
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.collections.contains(collection)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the underlying connection
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(conn) = conn {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("Error closing database {}: {}", self.name, e);
            }
        }
        tracing::debug!("Closed database {} (open #{})", self.name, self.serial);
    }

    /// Run a closure against the live connection
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StorageFault>,
    ) -> Result<T, StorageFault> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(StorageFault::Closed),
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("serial", &self.serial)
            .field("collections", &self.collections)
            .field("closed", &self.is_closed())
            .finish()
    }
}
