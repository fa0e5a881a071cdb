//! Statistics and cardinality estimation for physical plan costing.
//!
//! Tracks per-table row counts and row sizes, and derives output statistics
//! for selections, equi-joins, and groupings with simple textbook reduction
//! factors. Estimates only feed block-I/O cost formulas; they never affect
//! result correctness.
//!
//! # Example
//!
//! ```
//! use rowboat::statistics::{StatsManager, TableStats};
//!
//! let manager = StatsManager::new(4096);
//! manager.register_table("edge", 10_000, 56);
//!
//! let stats = manager.registered("edge").unwrap();
//! assert_eq!(stats.row_count, 10_000);
//! assert!(stats.block_count() > 0);
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::expr::{BinaryOp, ValExpr};
use crate::metadata::BaseTableMetadata;

/// Reduction factor applied per equality predicate.
const EQ_SELECTIVITY: f64 = 0.1;
/// Reduction factor applied per range predicate.
const RANGE_SELECTIVITY: f64 = 0.3;
/// Reduction factor applied per predicate of unknown shape.
const DEFAULT_SELECTIVITY: f64 = 0.5;
/// Assumed row count for tables never registered with the manager.
const DEFAULT_TABLE_ROWS: u64 = 1000;

/// Estimated data statistics for one operator output (or base table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    /// Estimated number of rows.
    pub row_count: u64,
    /// Estimated bytes per row.
    pub row_size: usize,
    /// Block size used to convert bytes to blocks.
    block_size: usize,
}

impl TableStats {
    pub fn new(row_count: u64, row_size: usize, block_size: usize) -> Self {
        TableStats {
            row_count,
            row_size,
            block_size: block_size.max(1),
        }
    }

    /// Estimated number of disk blocks the rows occupy.
    pub fn block_count(&self) -> u64 {
        let bytes = self.row_count * self.row_size as u64;
        bytes.div_ceil(self.block_size as u64)
    }

    /// One line for pretty-printing.
    pub fn describe(&self) -> String {
        format!(
            "~{} rows of ~{} bytes (~{} blocks)",
            self.row_count,
            self.row_size,
            self.block_count()
        )
    }

    fn scaled(&self, selectivity: f64) -> TableStats {
        let rows = ((self.row_count as f64) * selectivity).round() as u64;
        TableStats {
            row_count: rows.max(1).min(self.row_count.max(1)),
            row_size: self.row_size,
            block_size: self.block_size,
        }
    }
}

/// Provides table statistics and derives output statistics for the
/// relational operators.
#[derive(Debug)]
pub struct StatsManager {
    block_size: usize,
    registered: Mutex<HashMap<String, (u64, usize)>>,
}

impl StatsManager {
    pub fn new(block_size: usize) -> Self {
        StatsManager {
            block_size,
            registered: Mutex::new(HashMap::new()),
        }
    }

    /// Record observed statistics for a base table (ANALYZE-style).
    pub fn register_table(&self, name: &str, row_count: u64, row_size: usize) {
        self.registered
            .lock()
            .insert(name.to_string(), (row_count, row_size));
    }

    /// Statistics previously registered for a table, if any.
    pub fn registered(&self, name: &str) -> Option<TableStats> {
        self.registered
            .lock()
            .get(name)
            .map(|(rows, size)| TableStats::new(*rows, *size, self.block_size))
    }

    /// Statistics for a base table: registered numbers if available,
    /// otherwise a schema-derived guess.
    pub fn table_stats(&self, meta: &BaseTableMetadata) -> TableStats {
        self.registered(&meta.name).unwrap_or_else(|| {
            TableStats::new(
                DEFAULT_TABLE_ROWS,
                meta.schema.estimated_row_size(),
                self.block_size,
            )
        })
    }

    /// Output statistics for a selection over `input`. A `None` predicate is
    /// a pass-through (used by operators that only reorder rows).
    pub fn selection_stats(&self, input: &TableStats, predicate: Option<&ValExpr>) -> TableStats {
        match predicate {
            None => input.clone(),
            Some(cond) => {
                let mut selectivity = 1.0;
                for part in cond.conjunctive_parts() {
                    selectivity *= predicate_selectivity(part);
                }
                input.scaled(selectivity)
            }
        }
    }

    /// Output statistics for an equi-join with `num_key_pairs` key pairs.
    pub fn join_stats(
        &self,
        left: &TableStats,
        right: &TableStats,
        num_key_pairs: usize,
    ) -> TableStats {
        let cross = (left.row_count.max(1) as f64) * (right.row_count.max(1) as f64);
        let mut rows = cross;
        if num_key_pairs > 0 {
            // first key pair joins through the larger side's key space,
            // further pairs refine with the equality factor
            rows /= left.row_count.max(right.row_count).max(1) as f64;
            rows *= EQ_SELECTIVITY.powi(num_key_pairs as i32 - 1);
        }
        TableStats::new(
            (rows.round() as u64).max(1),
            left.row_size + right.row_size,
            self.block_size,
        )
    }

    /// Output statistics for a grouping with `num_groupby` group-by columns
    /// producing rows of `output_row_size` bytes.
    pub fn grouping_stats(
        &self,
        input: &TableStats,
        num_groupby: usize,
        output_row_size: usize,
    ) -> TableStats {
        let groups = if num_groupby == 0 {
            1
        } else {
            // square-root rule of thumb for distinct group keys
            ((input.row_count.max(1) as f64).sqrt().round() as u64).max(1)
        };
        TableStats::new(groups, output_row_size, self.block_size)
    }
}

fn predicate_selectivity(part: &ValExpr) -> f64 {
    if let ValExpr::Binary { op, .. } = part {
        if *op == BinaryOp::Eq {
            return EQ_SELECTIVITY;
        }
        if op.is_comparison() {
            return RANGE_SELECTIVITY;
        }
    }
    DEFAULT_SELECTIVITY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DataType, Value};

    fn stats(rows: u64, size: usize) -> TableStats {
        TableStats::new(rows, size, 4096)
    }

    #[test]
    fn test_block_count_rounds_up() {
        assert_eq!(stats(100, 50).block_count(), 2); // 5000 bytes over 4096
        assert_eq!(stats(0, 50).block_count(), 0);
    }

    #[test]
    fn test_selection_reduces_rows() {
        let manager = StatsManager::new(4096);
        let input = stats(1000, 40);
        let eq = ValExpr::eq(
            ValExpr::relative(0, 0, DataType::Integer),
            ValExpr::literal(Value::Integer(5)),
        );
        let out = manager.selection_stats(&input, Some(&eq));
        assert_eq!(out.row_count, 100);
        assert_eq!(manager.selection_stats(&input, None).row_count, 1000);
    }

    #[test]
    fn test_conjunction_multiplies_selectivity() {
        let manager = StatsManager::new(4096);
        let input = stats(1000, 40);
        let a = ValExpr::eq(
            ValExpr::relative(0, 0, DataType::Integer),
            ValExpr::literal(Value::Integer(5)),
        );
        let b = ValExpr::binary(
            BinaryOp::Lt,
            ValExpr::relative(0, 1, DataType::Integer),
            ValExpr::literal(Value::Integer(7)),
        );
        let both = ValExpr::binary(BinaryOp::And, a, b);
        let out = manager.selection_stats(&input, Some(&both));
        assert_eq!(out.row_count, 30); // 1000 * 0.1 * 0.3
    }

    #[test]
    fn test_join_stats_single_key() {
        let manager = StatsManager::new(4096);
        let out = manager.join_stats(&stats(100, 40), &stats(1000, 60), 1);
        assert_eq!(out.row_count, 100); // 100*1000 / 1000
        assert_eq!(out.row_size, 100);
    }

    #[test]
    fn test_grouping_stats() {
        let manager = StatsManager::new(4096);
        let grouped = manager.grouping_stats(&stats(10_000, 40), 1, 16);
        assert_eq!(grouped.row_count, 100);
        let global = manager.grouping_stats(&stats(10_000, 40), 0, 16);
        assert_eq!(global.row_count, 1);
    }

    #[test]
    fn test_unregistered_table_uses_default_guess() {
        use crate::metadata::{BaseTableMetadata, TableMetadata};
        let manager = StatsManager::new(4096);
        let meta = BaseTableMetadata::new(
            "t",
            TableMetadata::new(vec!["a".to_string()], vec![DataType::Integer]),
        );
        assert_eq!(manager.table_stats(&meta).row_count, DEFAULT_TABLE_ROWS);
        manager.register_table("t", 42, 8);
        assert_eq!(manager.table_stats(&meta).row_count, 42);
    }
}
