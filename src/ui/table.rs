use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct CollectionRow {
    #[tabled(rename = "Collection")]
    pub collection: String,
    #[tabled(rename = "Records")]
    pub records: String,
}

impl CollectionRow {
    pub fn new(collection: &str, records: Option<usize>) -> Self {
        Self {
            collection: collection.to_string(),
            records: records.map_or_else(|| "missing".to_string(), |n| n.to_string()),
        }
    }
}

pub fn collection_table(rows: &[CollectionRow]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_table_lists_rows() {
        let rows = vec![
            CollectionRow::new("processes", Some(4)),
            CollectionRow::new("factories", None),
        ];
        let table = collection_table(&rows);
        assert!(table.contains("processes"));
        assert!(table.contains("missing"));
        assert!(collection_table(&[]).is_empty());
    }
}
