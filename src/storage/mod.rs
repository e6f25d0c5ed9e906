//! Storage Layer - SQLite-backed object store
//!
//! One database file holds one table per collection:
//! - `<collection>(key, record)` where `key` is the encoded record `id`
//!   and `record` the JSON text of the sanitized record
//!
//! The schema version is kept in `PRAGMA user_version`.

pub mod schema;
pub mod key;
pub mod handle;
pub mod connection;
pub mod crud;

pub use connection::{Database, DEFAULT_BUSY_TIMEOUT};
pub use handle::Handle;
pub use key::RecordKey;

/// A persisted record: an ordered map from field name to JSON value
pub type Record = serde_json::Map<String, serde_json::Value>;
