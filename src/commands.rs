use crate::{emit_success, OutputMode};
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use twinstore::config::{self, StoreConfig};
use twinstore::storage::schema;
use twinstore::ui::{self, collection_table, CollectionRow, Icons, Spinner};
use twinstore::{seed, Database, JsonFileLegacyStore, Record, RecordKey};

pub fn run_init(
    output_mode: OutputMode,
    config_path: &Path,
    database: Option<PathBuf>,
    force: bool,
) -> anyhow::Result<()> {
    let mut store_config = StoreConfig::default();
    if let Some(database) = database {
        store_config.database = database;
    }

    config::write_config(config_path, &store_config, force)?;
    let project_root = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    config::ensure_gitignore(project_root)?;

    if output_mode.is_human() {
        ui::success(&format!("Wrote {}", config_path.display()));
        ui::summary_row("Database:", &store_config.database.display().to_string());
        ui::summary_row("Version:", &store_config.version.to_string());
    } else {
        emit_success(output_mode, "init", json!({
            "config": config_path,
            "database": store_config.database,
            "version": store_config.version,
        }))?;
    }
    Ok(())
}

pub async fn run_stats(output_mode: OutputMode, db: &Database) -> anyhow::Result<()> {
    let handle = db.open_db().await?;

    let mut rows = Vec::new();
    let mut counts = serde_json::Map::new();
    for name in schema::COLLECTIONS.iter().copied() {
        let records = if handle.contains(name) {
            Some(db.count(name).await?)
        } else {
            None
        };
        counts.insert(name.to_string(), json!(records));
        rows.push(CollectionRow::new(name, records));
    }

    if output_mode.is_human() {
        ui::header(Icons::STATS, &format!("Twinstore Statistics ({})", db.path().display()));
        ui::summary_row("Database:", handle.name());
        ui::summary_row("Schema version:", &handle.version().to_string());
        println!("{}", collection_table(&rows));
    } else {
        emit_success(output_mode, "stats", json!({
            "name": handle.name(),
            "path": db.path(),
            "version": handle.version(),
            "collections": counts,
        }))?;
    }
    Ok(())
}

pub async fn run_list(output_mode: OutputMode, db: &Database, collection: &str) -> anyhow::Result<()> {
    let records = db.get_all(collection).await?;

    if output_mode.is_human() {
        if records.is_empty() {
            println!("{} No records in {}.", Icons::EMPTY, collection);
            return Ok(());
        }
        ui::section(&format!("{collection} ({})", records.len()));
        for record in &records {
            let key = record.get("id").map(JsonValue::to_string).unwrap_or_default();
            let name = record
                .get("name")
                .or_else(|| record.get("productName"))
                .and_then(JsonValue::as_str);
            ui::record_line(&key, name);
        }
    } else {
        emit_success(output_mode, "list", json!({
            "collection": collection,
            "records": records,
        }))?;
    }
    Ok(())
}

pub async fn run_get(output_mode: OutputMode, db: &Database, collection: &str, id: &str) -> anyhow::Result<()> {
    let key = RecordKey::parse_lenient(id);
    let record = db.get(collection, key.clone()).await?;

    match (output_mode.is_human(), record) {
        (true, Some(record)) => println!("{}", serde_json::to_string_pretty(&record)?),
        (true, None) => println!("{} No record {} in {}.", Icons::EMPTY, key, collection),
        (false, record) => emit_success(output_mode, "get", json!({
            "collection": collection,
            "record": record,
        }))?,
    }
    Ok(())
}

pub async fn run_put(
    output_mode: OutputMode,
    db: &Database,
    collection: &str,
    data: Option<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let text = match (data, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)?,
        (None, None) => anyhow::bail!("provide a record with --data or --file"),
    };

    let stored: Vec<Record> = match serde_json::from_str::<JsonValue>(&text)? {
        JsonValue::Array(items) => {
            let spinner = Spinner::new(&format!("Writing {} records to {collection}", items.len()));
            let mut stored = Vec::with_capacity(items.len());
            for item in items {
                stored.push(db.put(collection, item).await?);
            }
            spinner.finish_and_clear();
            stored
        }
        single => vec![db.put(collection, single).await?],
    };

    if output_mode.is_human() {
        ui::success(&format!("Stored {} record(s) in {}", stored.len(), collection));
    } else {
        emit_success(output_mode, "put", json!({
            "collection": collection,
            "records": stored,
        }))?;
    }
    Ok(())
}

pub async fn run_delete(output_mode: OutputMode, db: &Database, collection: &str, id: &str) -> anyhow::Result<()> {
    let key = RecordKey::parse_lenient(id);
    db.delete(collection, key.clone()).await?;

    if output_mode.is_human() {
        println!("{} Deleted {} from {}", Icons::DEL, key, collection);
    } else {
        emit_success(output_mode, "delete", json!({
            "collection": collection,
            "id": key.to_string(),
        }))?;
    }
    Ok(())
}

pub async fn run_clear(output_mode: OutputMode, db: &Database, collection: &str, yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("clearing {collection} cannot be undone; pass --yes to confirm");
    }

    let before = db.count(collection).await?;
    db.clear(collection).await?;

    if output_mode.is_human() {
        ui::success(&format!("Cleared {before} record(s) from {collection}"));
    } else {
        emit_success(output_mode, "clear", json!({
            "collection": collection,
            "removed": before,
        }))?;
    }
    Ok(())
}

pub async fn run_migrate(
    output_mode: OutputMode,
    db: &Database,
    legacy: Option<PathBuf>,
    key: &str,
    collection: &str,
) -> anyhow::Result<()> {
    let Some(legacy) = legacy else {
        anyhow::bail!("no legacy dump given (use --legacy or set `legacy` in the config)");
    };
    if !legacy.exists() {
        ui::warn(&format!("Legacy dump {} not found; nothing to migrate", legacy.display()));
    }

    let source = JsonFileLegacyStore::new(&legacy);
    let spinner = Spinner::new(&format!("Migrating \"{key}\" into {collection}"));
    let outcome = db.migrate_from_local_storage(&source, key, collection).await;
    spinner.finish_and_clear();
    let migrated = outcome?;

    if output_mode.is_human() {
        println!("{} Migrated {} record(s) from \"{}\" into {}", Icons::MIGRATE, migrated, key, collection);
    } else {
        emit_success(output_mode, "migrate", json!({
            "key": key,
            "collection": collection,
            "migrated": migrated,
        }))?;
    }
    Ok(())
}

pub async fn run_seed(output_mode: OutputMode, db: &Database, force: bool) -> anyhow::Result<()> {
    if !force && !seed::needs_seed(db).await? {
        if output_mode.is_human() {
            ui::info("Seed", "every example collection already has records (use --force to reload)");
        } else {
            emit_success(output_mode, "seed", json!({ "seeded": false }))?;
        }
        return Ok(());
    }

    let spinner = Spinner::new("Loading example data");
    let report = seed::init_all_data(db).await?;
    spinner.finish_and_clear();

    if output_mode.is_human() {
        println!("{} {}", Icons::SEED, report);
        for (collection, reason) in &report.failed {
            ui::error(&format!("{collection}: {reason}"));
        }
    } else {
        let seeded: serde_json::Map<String, JsonValue> = report
            .seeded
            .iter()
            .map(|(collection, count)| (collection.clone(), json!(count)))
            .collect();
        emit_success(output_mode, "seed", json!({
            "seeded": true,
            "collections": seeded,
            "failed": report.failed.iter().map(|(c, r)| json!({"collection": c, "reason": r})).collect::<Vec<_>>(),
        }))?;
    }
    Ok(())
}
