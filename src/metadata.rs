//! # Table Metadata and Column Lineage
//!
//! Schema descriptions for operator outputs and base tables, plus the lineage
//! machinery that lets qualified column references resolve to output column
//! indices anywhere in a plan.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::value::DataType;

/// Name for an output column with no natural name.
pub fn anon_column_name(index: usize) -> String {
    format!("column_{index}")
}

/// Alias under which an operator's computed output columns are referenced.
pub fn anon_table_name(op_name: &str, op_id: u64) -> String {
    format!(".{}-{}", op_name.to_lowercase(), op_id)
}

/// Schema of the rows produced by an operator: ordered column names and types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    column_names: Vec<String>,
    column_types: Vec<DataType>,
}

impl TableMetadata {
    pub fn new(column_names: Vec<String>, column_types: Vec<DataType>) -> Self {
        debug_assert_eq!(column_names.len(), column_types.len());
        TableMetadata {
            column_names,
            column_types,
        }
    }

    pub fn arity(&self) -> usize {
        self.column_names.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column_types(&self) -> &[DataType] {
        &self.column_types
    }

    pub fn column_type(&self, index: usize) -> Option<DataType> {
        self.column_types.get(index).copied()
    }

    /// Index of the named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|n| n == name)
    }

    /// Schema of two inputs joined side by side, left columns first.
    pub fn concat(&self, other: &TableMetadata) -> TableMetadata {
        let mut names = self.column_names.clone();
        names.extend(other.column_names.iter().cloned());
        let mut types = self.column_types.clone();
        types.extend(other.column_types.iter().copied());
        TableMetadata::new(names, types)
    }

    /// Estimated in-memory byte footprint of one row of this schema.
    pub fn estimated_row_size(&self) -> usize {
        24 + self.column_types.iter().map(|t| t.footprint()).sum::<usize>()
    }

    /// One line per column for pretty-printing.
    pub fn describe(&self) -> String {
        let cols: Vec<String> = self
            .column_names
            .iter()
            .zip(self.column_types.iter())
            .map(|(n, t)| format!("{n} {t}"))
            .collect();
        format!("({})", cols.join(", "))
    }
}

/// Metadata for a named base table: schema plus key information used to seed
/// the uniqueness property of table scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseTableMetadata {
    pub name: String,
    pub schema: TableMetadata,
    /// Index of the primary-key column, if the table declares a
    /// single-column key.
    pub primary_key_column: Option<usize>,
    /// Further columns declared UNIQUE.
    #[serde(default)]
    pub unique_columns: Vec<usize>,
}

impl BaseTableMetadata {
    pub fn new(name: impl Into<String>, schema: TableMetadata) -> Self {
        BaseTableMetadata {
            name: name.into(),
            schema,
            primary_key_column: None,
            unique_columns: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, column: usize) -> Self {
        self.primary_key_column = Some(column);
        self
    }

    pub fn with_unique_column(mut self, column: usize) -> Self {
        self.unique_columns.push(column);
        self
    }

    /// All column indices whose values are unique across the table.
    pub fn key_columns(&self) -> HashSet<usize> {
        let mut keys: HashSet<usize> = self.unique_columns.iter().copied().collect();
        if let Some(pk) = self.primary_key_column {
            keys.insert(pk);
        }
        keys
    }
}

/// The set of `(table_alias, column_name)` pairs that may legally reference
/// one output column.
pub type ColumnLineage = HashSet<(String, String)>;

/// For each output column index, its lineage.
pub type OutputLineage = Vec<ColumnLineage>;

/// Index of the output column referenced by the given qualified name, or
/// `None` if no column's lineage contains it.
pub fn find_column_in_lineage(
    table_alias: &str,
    column_name: &str,
    output_lineage: &OutputLineage,
) -> Option<usize> {
    output_lineage.iter().position(|valid_references| {
        valid_references
            .iter()
            .any(|(t, c)| t == table_alias && c == column_name)
    })
}

/// A lineage set holding exactly the given reference.
pub fn lineage_of(table_alias: &str, column_name: &str) -> ColumnLineage {
    let mut set = HashSet::new();
    set.insert((table_alias.to_string(), column_name.to_string()));
    set
}
