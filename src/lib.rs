//! # Twinstore - Local persistence for manufacturing process data
//!
//! Versioned, SQLite-backed object store holding process recipes, materials,
//! product configurations and production lines on the local machine.
//!
//! Twinstore provides:
//! - A fixed registry of named collections keyed by a caller-assigned `id`
//! - A connection manager that collapses concurrent opens into one and runs
//!   additive schema upgrades
//! - A sanitizer that turns arbitrary in-memory values into plain JSON records
//! - Async CRUD operations (get-all, put, delete, clear)
//! - A one-shot importer for records kept in an older flat key-value store

pub mod storage;
pub mod sanitize;
pub mod migrate;
pub mod seed;
pub mod config;
pub mod ui;

use std::fmt;
use std::sync::Arc;

// Re-exports for convenient access
pub use storage::{Database, Handle, Record, RecordKey};
pub use sanitize::{clean_data, Value};
pub use migrate::{JsonFileLegacyStore, LegacySource, MemoryLegacyStore};
pub use config::StoreConfig;

/// Result type alias for Twinstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Twinstore operations
///
/// Cloneable so that every caller awaiting the same in-flight open receives
/// the same failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Database {0} is blocked by another connection")]
    Blocked(String),

    #[error("Failed to open database {database}: {source}")]
    OpenFailed {
        database: String,
        #[source]
        source: Arc<StorageFault>,
    },

    #[error("Store {0} not found")]
    CollectionNotFound(String),

    #[error("{op} on {collection} failed: {source}")]
    ReadFailed {
        collection: String,
        op: Operation,
        #[source]
        source: Arc<StorageFault>,
    },

    #[error("{op} on {collection} failed: {source}")]
    WriteFailed {
        collection: String,
        op: Operation,
        #[source]
        source: Arc<StorageFault>,
    },

    #[error("Migration of legacy key {key} into {collection} failed: {source}")]
    MigrationFailed {
        key: String,
        collection: String,
        #[source]
        source: Box<Error>,
    },

    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Storage worker failed: {0}")]
    Worker(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(Arc::new(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

/// Engine-level cause behind an open, read or write failure
#[derive(Debug, thiserror::Error)]
pub enum StorageFault {
    #[error(transparent)]
    Engine(#[from] rusqlite::Error),

    #[error("record has no usable `id` key")]
    MissingKey,

    #[error("requested version {requested} is lower than stored version {stored}")]
    VersionTooLow { requested: u32, stored: u32 },

    #[error("schema version must be at least 1")]
    InvalidVersion,

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("connection is closed")]
    Closed,

    #[error("could not prepare database location: {0}")]
    Location(#[from] std::io::Error),
}

/// The kind of collection operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetAll,
    Get,
    Count,
    Put,
    Delete,
    Clear,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetAll => "getAll",
            Operation::Get => "get",
            Operation::Count => "count",
            Operation::Put => "put",
            Operation::Delete => "delete",
            Operation::Clear => "clear",
        }
    }

    /// Read operations run in a deferred transaction and fail as `ReadFailed`
    pub fn is_read(&self) -> bool {
        matches!(self, Operation::GetAll | Operation::Get | Operation::Count)
    }

    pub(crate) fn failure(self, collection: &str, fault: StorageFault) -> Error {
        let collection = collection.to_string();
        let source = Arc::new(fault);
        if self.is_read() {
            Error::ReadFailed { collection, op: self, source }
        } else {
            Error::WriteFailed { collection, op: self, source }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
