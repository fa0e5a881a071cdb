//! # Rowboat
//!
//! An instructional relational query engine: a pipelined, pull-based tree of
//! physical query operators executing over block-buffered heap-file storage
//! under strict memory budgets.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Physical plan (built top-down by a planner)
//!     ↓
//! [Compilation]   bottom-up, cached    → schema, lineage, ordering,
//!                                        uniqueness, evaluator closures
//!     ↓
//! [Estimation]    on demand, cached    → row counts, block I/O costs
//!     ↓
//! [Execution]     pull-based, lazy     → one row at a time off the root
//! ```
//!
//! Each operator declares its own peak memory demand in fixed-size blocks;
//! the heavy operators (external merge sort, grouped aggregation, recursive
//! hash join) spill sorted runs and hash partitions to temp heap files owned
//! by a statement-scoped temp transaction.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rowboat::exec::{MergeSortOp, QueryOp, StatementContext, TableScanOp};
//! use rowboat::expr::ValExpr;
//! use rowboat::value::DataType;
//! use rowboat::{Catalog, StatsManager, StorageManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sm = Arc::new(StorageManager::new("./data")?);
//! let catalog = Arc::new(Catalog::load_or_default("./data/catalog.json".as_ref())?);
//! let stats = Arc::new(StatsManager::new(4096));
//! let ctx = StatementContext::new(sm, catalog, stats, 4096);
//!
//! let scan = Arc::new(TableScanOp::from_catalog(&ctx, "r", "my_table")?);
//! let sort = MergeSortOp::new(
//!     scan,
//!     vec![ValExpr::column("r", "a", DataType::Integer)],
//!     vec![true],
//!     16,
//!     None,
//! )?;
//! for row in sort.execute()? {
//!     println!("{}", row?);
//! }
//! ctx.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod exec;
pub mod expr;
pub mod metadata;
pub mod statistics;
pub mod storage;
pub mod value;

pub use catalog::Catalog;
pub use config::Config;
pub use exec::{
    estimated_cost, pstr, total_memory_blocks_required, AggrOp, BlockNLJoinOp, CompiledProps,
    EstimatedProps, ExecResult, ExecutorError, FilterOp, HashEqJoinOp, MergeEqJoinOp, MergeSortOp,
    ProjectOp, QueryOp, StatementContext, TableScanOp,
};
pub use expr::{AggrExpr, AggrFunc, ValExpr};
pub use metadata::{BaseTableMetadata, TableMetadata};
pub use statistics::{StatsManager, TableStats};
pub use storage::{HeapFile, StorageManager, Transaction};
pub use value::{DataType, Row, Value};
