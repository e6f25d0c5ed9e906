//! Example data bootstrap
//!
//! Bundled example processes, products, product configurations and
//! production lines. Whether to load them is the caller's decision;
//! [`needs_seed`] reports the usual trigger (any of them empty).

use std::fmt;

use serde_json::Value as JsonValue;
use tracing::{error, info};

use crate::storage::Database;
use crate::Result;

const SEED_JSON: &str = include_str!("../data/seed.json");

/// Collections the bundled dataset fills, in load order
pub const SEEDED_COLLECTIONS: [&str; 4] = ["processes", "products", "productConfigs", "productions"];

/// Example records for one collection
#[derive(Debug, Clone)]
pub struct SeedBatch {
    pub collection: String,
    pub records: Vec<JsonValue>,
}

/// Outcome of a bootstrap run
#[derive(Debug, Clone, Default)]
pub struct SeedReport {
    pub seeded: Vec<(String, usize)>,
    pub failed: Vec<(String, String)>,
}

impl SeedReport {
    pub fn total(&self) -> usize {
        self.seeded.iter().map(|(_, n)| n).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for SeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Seed Report:")?;
        for (collection, count) in &self.seeded {
            writeln!(f, "  {}: {} records", collection, count)?;
        }
        for (collection, reason) in &self.failed {
            writeln!(f, "  {}: failed ({})", collection, reason)?;
        }
        write!(f, "  Total: {}", self.total())
    }
}

/// The bundled example dataset
pub fn default_dataset() -> Result<Vec<SeedBatch>> {
    let mut dataset: serde_json::Map<String, JsonValue> = serde_json::from_str(SEED_JSON)?;

    let batches = SEEDED_COLLECTIONS
        .iter()
        .map(|name| {
            let records = match dataset.remove(*name) {
                Some(JsonValue::Array(records)) => records,
                _ => Vec::new(),
            };
            SeedBatch { collection: name.to_string(), records }
        })
        .collect();

    Ok(batches)
}

/// True when any seeded collection holds no records
pub async fn needs_seed(db: &Database) -> Result<bool> {
    for name in SEEDED_COLLECTIONS {
        let count = db.count(name).await?;
        info!("- {name}: {count} records");
        if count == 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Write every bundled record (upsert, safe to repeat)
///
/// A failing collection is logged and reported; the others still load.
pub async fn init_all_data(db: &Database) -> Result<SeedReport> {
    info!("Initializing example data...");
    let mut report = SeedReport::default();

    for batch in default_dataset()? {
        match db.put_many(&batch.collection, batch.records).await {
            Ok(count) => {
                info!("Seeded {count} records into {}", batch.collection);
                report.seeded.push((batch.collection, count));
            }
            Err(e) => {
                error!("Seeding {} failed: {}", batch.collection, e);
                report.failed.push((batch.collection, e.to_string()));
            }
        }
    }

    info!("Example data initialized ({} records)", report.total());
    Ok(report)
}
