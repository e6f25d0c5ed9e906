//! Legacy migration - copy records out of the old flat key-value store
//!
//! The old store kept each collection as one JSON-encoded array under a
//! string key. Migration copies that array into a collection with `put`
//! and leaves the legacy slot untouched, so running it again is harmless.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_json::Value as JsonValue;
use tracing::{debug, error, info};

use crate::storage::Database;
use crate::{Error, Result};

/// Read access to a flat legacy key-value store
pub trait LegacySource: Send + Sync {
    /// The raw string stored under `key`, if any
    fn get_item(&self, key: &str) -> Result<Option<String>>;
}

/// In-memory legacy store
#[derive(Debug, Default)]
pub struct MemoryLegacyStore {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryLegacyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }
}

impl LegacySource for MemoryLegacyStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }
}

/// Legacy store exported to a JSON file: one object mapping keys to values
///
/// String values are returned as-is; any other JSON value is returned in
/// its serialized form. A missing file is an empty store.
#[derive(Debug, Clone)]
pub struct JsonFileLegacyStore {
    path: PathBuf,
}

impl JsonFileLegacyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LegacySource for JsonFileLegacyStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path)?;
        let slots: serde_json::Map<String, JsonValue> = serde_json::from_str(&contents)?;
        Ok(slots.get(key).map(|value| match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }
}

impl Database {
    /// Copy the JSON array stored under `legacy_key` into `collection`
    ///
    /// Absent keys and payloads that are not arrays are a no-op. Returns the
    /// number of records written. Records written before a failure stay.
    pub async fn migrate_from_local_storage(
        &self,
        source: &(impl LegacySource + ?Sized),
        legacy_key: &str,
        collection: &str,
    ) -> Result<usize> {
        info!("Migrating data from legacy key \"{legacy_key}\" to store \"{collection}\"");

        let failed = |source: Error| {
            let err = Error::MigrationFailed {
                key: legacy_key.to_string(),
                collection: collection.to_string(),
                source: Box::new(source),
            };
            error!("{err}");
            err
        };

        let raw = match source.get_item(legacy_key).map_err(failed)? {
            Some(raw) if !raw.is_empty() => raw,
            _ => {
                debug!("Legacy key \"{legacy_key}\" is empty, nothing to migrate");
                return Ok(0);
            }
        };

        let payload: JsonValue = serde_json::from_str(&raw).map_err(|e| failed(e.into()))?;
        let JsonValue::Array(items) = payload else {
            debug!("Legacy key \"{legacy_key}\" does not hold an array, nothing to migrate");
            return Ok(0);
        };

        let migrated = self.put_many(collection, items).await.map_err(failed)?;
        info!("Successfully migrated {migrated} items to {collection}");
        Ok(migrated)
    }
}
