//! Collection registry and schema definitions
//!
//! Every collection is one table keyed by the canonical encoding of the
//! record `id`. The schema version lives in SQLite's `user_version`.

use std::collections::BTreeSet;
use rusqlite::Connection;

/// Default database name
pub const DEFAULT_DB_NAME: &str = "mytwin";

/// Schema version expected by this build
pub const DEFAULT_VERSION: u32 = 3;

/// The fixed collection registry; every upgrade ensures all of them exist
pub const COLLECTIONS: &[&str] = &[
    "processes",
    "products",
    "productConfigs",
    "materials",
    "productions",
    "equipment",
    "factories",
];

/// Check whether a name belongs to the registry
pub fn is_registered(name: &str) -> bool {
    COLLECTIONS.contains(&name)
}

/// Quote a collection name for use as an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL to create a collection table
pub fn create_collection_sql(name: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    key TEXT PRIMARY KEY,\n    record TEXT NOT NULL\n)",
        quote_ident(name)
    )
}

/// Read the stored schema version (0 for a fresh database)
pub fn stored_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Record a new schema version
pub fn set_stored_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}

/// Names of every collection table present in the database
pub fn existing_collections(conn: &Connection) -> rusqlite::Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;

    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_names() {
        assert_eq!(COLLECTIONS.len(), 7);
        assert!(is_registered("productConfigs"));
        assert!(!is_registered("bogus"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("productConfigs"), "\"productConfigs\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_version_roundtrip_and_tables() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(stored_version(&conn).unwrap(), 0);

        set_stored_version(&conn, 3).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), 3);

        conn.execute(&create_collection_sql("processes"), []).unwrap();
        let tables = existing_collections(&conn).unwrap();
        assert!(tables.contains("processes"));
        assert_eq!(tables.len(), 1);
    }
}
