//! Collection CRUD operations
//!
//! Every operation opens (or reuses) the connection, checks that the
//! collection exists in the opened handle and runs one transaction scoped
//! to that collection on tokio's blocking pool.

use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::Value as JsonValue;
use tracing::{debug, error};

use crate::sanitize::{clean_data, Value};
use crate::{Error, Operation, Result, StorageFault};
use super::connection::Database;
use super::key::RecordKey;
use super::schema::quote_ident;
use super::Record;

type Fault = StorageFault;

impl Database {
    /// Every record in the collection, in key order
    ///
    /// Numeric ids sort numerically and before string ids.
    pub async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        debug!("Getting all data from store: {collection}");
        let records = self
            .transact(collection, Operation::GetAll, |tx, table| {
                let mut stmt = tx.prepare(&format!("SELECT record FROM {table} ORDER BY json_extract(key, '$')"))?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut records = Vec::new();
                for row in rows {
                    records.push(decode_record(&row?)?);
                }
                Ok(records)
            })
            .await?;

        debug!("Retrieved {} items from {collection}", records.len());
        Ok(records)
    }

    /// The record stored under `id`, if any
    pub async fn get(&self, collection: &str, id: impl Into<RecordKey>) -> Result<Option<Record>> {
        let key = id.into();
        self.transact(collection, Operation::Get, move |tx, table| {
            let text: Option<String> = tx
                .query_row(
                    &format!("SELECT record FROM {table} WHERE key = ?1"),
                    [key.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            text.as_deref().map(decode_record).transpose()
        })
        .await
    }

    /// Number of records in the collection
    pub async fn count(&self, collection: &str) -> Result<usize> {
        self.transact(collection, Operation::Count, |tx, table| {
            let count: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    /// Sanitize `value`, then insert it or replace the record with the same `id`
    ///
    /// Returns the record as stored.
    pub async fn put(&self, collection: &str, value: impl Into<Value>) -> Result<Record> {
        let cleaned = clean_data(&value.into());
        debug!("Putting data in store: {collection}");

        let stored = self
            .transact(collection, Operation::Put, move |tx, table| {
                let key = RecordKey::of_record(&cleaned).ok_or(Fault::MissingKey)?;
                let JsonValue::Object(record) = cleaned else {
                    return Err(Fault::MissingKey);
                };
                let text = serde_json::to_string(&record)
                    .map_err(|e| Fault::Corrupt(e.to_string()))?;
                tx.execute(
                    &format!("INSERT OR REPLACE INTO {table} (key, record) VALUES (?1, ?2)"),
                    params![key.as_str(), text],
                )?;
                Ok(record)
            })
            .await?;

        debug!("Successfully put data in {collection}");
        Ok(stored)
    }

    /// `put` each value in turn, one transaction per record
    ///
    /// Stops at the first failure; records already written stay written.
    pub async fn put_many<I, V>(&self, collection: &str, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut written = 0;
        for value in values {
            self.put(collection, value).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Remove the record stored under `id`; a missing `id` is not an error
    pub async fn delete(&self, collection: &str, id: impl Into<RecordKey>) -> Result<()> {
        let key = id.into();
        debug!("Deleting {key} from store: {collection}");
        self.transact(collection, Operation::Delete, move |tx, table| {
            tx.execute(&format!("DELETE FROM {table} WHERE key = ?1"), [key.as_str()])?;
            Ok(())
        })
        .await
    }

    /// Remove every record in the collection
    pub async fn clear(&self, collection: &str) -> Result<()> {
        debug!("Clearing store: {collection}");
        self.transact(collection, Operation::Clear, |tx, table| {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
            Ok(())
        })
        .await
    }

    async fn transact<T, F>(&self, collection: &str, op: Operation, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>, &str) -> std::result::Result<T, Fault> + Send + 'static,
    {
        let handle = self.open_db().await?;
        if !handle.contains(collection) {
            let err = Error::CollectionNotFound(collection.to_string());
            error!("{err}");
            return Err(err);
        }

        let table = quote_ident(collection);
        let behavior = if op.is_read() {
            TransactionBehavior::Deferred
        } else {
            TransactionBehavior::Immediate
        };

        let outcome = tokio::task::spawn_blocking(move || {
            handle.with_conn(|conn| {
                let tx = conn.transaction_with_behavior(behavior)?;
                let value = work(&tx, &table)?;
                tx.commit()?;
                Ok(value)
            })
        })
        .await
        .map_err(|e| Error::Worker(e.to_string()))?;

        outcome.map_err(|fault| {
            let err = op.failure(collection, fault);
            error!("Error in {op}({collection}): {err}");
            err
        })
    }
}

fn decode_record(text: &str) -> std::result::Result<Record, Fault> {
    match serde_json::from_str(text) {
        Ok(JsonValue::Object(record)) => Ok(record),
        Ok(other) => Err(Fault::Corrupt(format!("expected an object, found {other}"))),
        Err(e) => Err(Fault::Corrupt(e.to_string())),
    }
}
