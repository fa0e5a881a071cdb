//! Catalog: Schema management for base tables
//!
//! Tracks schemas (column names, types, key columns) for all base tables.
//! Used by table scans to seed output metadata, lineage, and uniqueness, and
//! persisted alongside the data directory as a JSON document.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::metadata::BaseTableMetadata;
use crate::storage::{StorageError, StorageResult};

/// Catalog tracks metadata for all base tables.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<String, BaseTableMetadata>,
}

impl Catalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Catalog {
            tables: HashMap::new(),
        }
    }

    /// Register a table, replacing any previous metadata under the same name.
    pub fn register_table(&mut self, meta: BaseTableMetadata) {
        self.tables.insert(meta.name.clone(), meta);
    }

    /// Get metadata for a table.
    pub fn table(&self, name: &str) -> Option<&BaseTableMetadata> {
        self.tables.get(name)
    }

    /// Remove a table's metadata.
    pub fn deregister_table(&mut self, name: &str) -> Option<BaseTableMetadata> {
        self.tables.remove(name)
    }

    /// All registered table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Persist the catalog as a JSON document.
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        let tables: Vec<&BaseTableMetadata> = self.tables.values().collect();
        let json = serde_json::to_string_pretty(&tables)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a catalog previously written by `save`.
    pub fn load(path: &Path) -> StorageResult<Self> {
        let json = fs::read_to_string(path)?;
        let tables: Vec<BaseTableMetadata> = serde_json::from_str(&json)?;
        let mut catalog = Catalog::new();
        for meta in tables {
            catalog.register_table(meta);
        }
        Ok(catalog)
    }

    /// Load the catalog at `path`, or start empty if none was saved yet.
    pub fn load_or_default(path: &Path) -> StorageResult<Self> {
        if path.exists() {
            Catalog::load(path)
        } else {
            Ok(Catalog::new())
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Metadata(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TableMetadata;
    use crate::value::DataType;
    use tempfile::TempDir;

    fn sample_table(name: &str) -> BaseTableMetadata {
        BaseTableMetadata::new(
            name,
            TableMetadata::new(
                vec!["id".to_string(), "name".to_string()],
                vec![DataType::Integer, DataType::Varchar],
            ),
        )
        .with_primary_key(0)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut catalog = Catalog::new();
        catalog.register_table(sample_table("users"));
        assert!(catalog.table("users").is_some());
        assert!(catalog.table("orders").is_none());
        assert_eq!(catalog.table_names(), vec!["users".to_string()]);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("catalog.json");

        let mut catalog = Catalog::new();
        catalog.register_table(sample_table("users"));
        catalog.register_table(sample_table("orders"));
        catalog.save(&path).expect("save");

        let loaded = Catalog::load(&path).expect("load");
        assert_eq!(loaded.table_names(), vec!["orders".to_string(), "users".to_string()]);
        assert_eq!(loaded.table("users").map(|t| t.primary_key_column), Some(Some(0)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let tmp = TempDir::new().expect("tempdir");
        let catalog = Catalog::load_or_default(&tmp.path().join("missing.json")).expect("default");
        assert!(catalog.table_names().is_empty());
    }
}
