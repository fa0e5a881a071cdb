//! # Operator Framework
//!
//! The physical plan is a tree of `QueryOp` nodes executed Volcano-style:
//! driving the root's `execute` yields result rows one at a time, and each
//! operator lazily drives its children. Construction happens top-down in the
//! planner; compilation (property inference plus expression lowering) runs
//! bottom-up on first access and is cached; estimation is computed on demand.
//!
//! Every operator declares only its own peak block budget; budgets aggregate
//! additively along a root-to-leaf path, so the plan-wide requirement is the
//! heaviest such path.

pub mod error;
pub mod util;

pub mod aggr;
pub mod filter;
pub mod join;
pub mod mergesort;
pub mod project;
pub mod scan;

pub use aggr::AggrOp;
pub use error::{ExecResult, ExecutorError};
pub use filter::FilterOp;
pub use join::bnl::BlockNLJoinOp;
pub use join::hash::HashEqJoinOp;
pub use join::merge::MergeEqJoinOp;
pub use mergesort::MergeSortOp;
pub use project::ProjectOp;
pub use scan::TableScanOp;

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::metadata::{OutputLineage, TableMetadata};
use crate::statistics::{StatsManager, TableStats};
use crate::storage::{StorageManager, StorageResult, Transaction};
use crate::value::Row;
use crate::expr::ValExpr;

/// A lazy, fallible stream of result rows. Errors abort the pipeline; the
/// stream releases its resources when dropped, whether exhausted or not.
pub type RowStream<'a> = Box<dyn Iterator<Item = ExecResult<Row>> + 'a>;

/// Per-statement context threaded through every operator: storage, catalog,
/// statistics, the main transaction for base-table reads, and a dedicated
/// temp transaction owning all intermediate runs and partitions.
#[derive(Clone)]
pub struct StatementContext {
    pub sm: Arc<StorageManager>,
    pub catalog: Arc<Catalog>,
    pub stats: Arc<StatsManager>,
    pub tx: Transaction,
    pub tmp_tx: Transaction,
    /// Byte quantum for all block-budget accounting.
    pub block_size: usize,
    op_counter: Arc<AtomicU64>,
}

impl StatementContext {
    pub fn new(
        sm: Arc<StorageManager>,
        catalog: Arc<Catalog>,
        stats: Arc<StatsManager>,
        block_size: usize,
    ) -> Self {
        let tx = sm.begin_transaction();
        let tmp_tx = sm.begin_temp_transaction();
        StatementContext {
            sm,
            catalog,
            stats,
            tx,
            tmp_tx,
            block_size,
            op_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build a context using the configured block size.
    pub fn from_config(
        sm: Arc<StorageManager>,
        catalog: Arc<Catalog>,
        stats: Arc<StatsManager>,
        config: &crate::config::Config,
    ) -> Self {
        StatementContext::new(sm, catalog, stats, config.execution.block_size)
    }

    /// Statement-scoped monotone id, used to make temp file names unique and
    /// deterministic across operator instances.
    pub fn next_op_id(&self) -> u64 {
        self.op_counter.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// End both transactions. Any temp file an aborted pipeline left behind
    /// is deleted with the temp transaction.
    pub fn finish(&self) -> StorageResult<()> {
        self.sm.end_transaction(self.tmp_tx)?;
        self.sm.end_transaction(self.tx)?;
        Ok(())
    }
}

/// Compiled properties of an operator: an immutable bundle computed once
/// after construction, bottom-up.
#[derive(Debug, Clone)]
pub struct CompiledProps {
    /// Schema of the rows this operator produces.
    pub output_metadata: TableMetadata,
    /// For each output column, the qualified names that may reference it.
    pub output_lineage: OutputLineage,
    /// Prefix of output columns the rows are guaranteed sorted by.
    pub ordered_columns: Vec<usize>,
    /// Ascending/descending flag per entry of `ordered_columns`.
    pub ordered_asc: Vec<bool>,
    /// Output columns whose values are unique across the output.
    ///
    /// Only single-column uniqueness is captured; a multi-column key is not
    /// representable here.
    pub unique_columns: HashSet<usize>,
}

impl CompiledProps {
    /// Copy all properties from a single input (operators that preserve the
    /// input row shape start from this).
    pub fn from_input(input: &CompiledProps) -> CompiledProps {
        input.clone()
    }

    /// Properties of joining two inputs in an arbitrary fashion: schemas and
    /// lineage concatenate; no ordering or uniqueness survives by default.
    pub fn from_inputs(left: &CompiledProps, right: &CompiledProps) -> CompiledProps {
        let mut output_lineage = left.output_lineage.clone();
        output_lineage.extend(right.output_lineage.iter().cloned());
        CompiledProps {
            output_metadata: left.output_metadata.concat(&right.output_metadata),
            output_lineage,
            ordered_columns: Vec::new(),
            ordered_asc: Vec::new(),
            unique_columns: HashSet::new(),
        }
    }

    /// If `e` is a reference to one of this output's columns, return its
    /// index. Relative references must match `input_index`.
    pub fn column_in_output(&self, e: &ValExpr, input_index: usize) -> Option<usize> {
        match e {
            ValExpr::RelativeColumn {
                input_index: i,
                column_index,
                ..
            } if *i == input_index => Some(*column_index),
            ValExpr::NamedColumn {
                table_alias,
                column_name,
                ..
            } => crate::metadata::find_column_in_lineage(
                table_alias,
                column_name,
                &self.output_lineage,
            ),
            _ => None,
        }
    }

    /// Lines for pretty-printing.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!("output: {}", self.output_metadata.describe())];
        if !self.ordered_columns.is_empty() {
            let keys: Vec<String> = self
                .ordered_columns
                .iter()
                .zip(self.ordered_asc.iter())
                .map(|(c, asc)| format!("#{c} {}", if *asc { "ASC" } else { "DESC" }))
                .collect();
            lines.push(format!("ordered by: {}", keys.join(", ")));
        }
        if !self.unique_columns.is_empty() {
            let mut cols: Vec<usize> = self.unique_columns.iter().copied().collect();
            cols.sort_unstable();
            let cols: Vec<String> = cols.iter().map(|c| format!("#{c}")).collect();
            lines.push(format!("unique columns: {{{}}}", cols.join(", ")));
        }
        lines
    }
}

/// Estimated per-pass block I/O counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIoStats {
    /// Block reads by this operator itself (children excluded).
    pub self_reads: u64,
    /// Block writes by this operator itself (children excluded).
    pub self_writes: u64,
    /// Reads and writes of this operator and its whole subtree.
    pub overall: u64,
}

/// Estimated properties of an operator.
#[derive(Debug, Clone)]
pub struct EstimatedProps {
    /// Estimated output statistics.
    pub stats: TableStats,
    /// Steady-state per-pass I/O.
    pub blocks: BlockIoStats,
    /// One-time extra first-pass I/O (an index build, say), or `None` when
    /// the first pass is not special. Shared subtrees share the allocation,
    /// which is how `estimated_cost` avoids double-counting across a DAG.
    pub blocks_extra_init: Option<Arc<BlockIoStats>>,
}

impl EstimatedProps {
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "estimated I/Os = {}, with {} reads / {} writes by this op",
            self.blocks.overall, self.blocks.self_reads, self.blocks.self_writes
        )];
        if let Some(extra) = &self.blocks_extra_init {
            lines.push(format!("first-pass extra I/Os = {}", extra.overall));
        }
        lines.push(self.stats.describe());
        lines
    }
}

/// Lazily computed, invalidatable property caches owned by each operator.
#[derive(Default)]
pub struct PropsCache {
    compiled: Mutex<Option<Arc<CompiledProps>>>,
    estimated: Mutex<Option<Arc<EstimatedProps>>>,
}

impl PropsCache {
    pub fn new() -> Self {
        PropsCache::default()
    }

    fn compiled_or_compute(
        &self,
        compute: impl FnOnce() -> ExecResult<CompiledProps>,
    ) -> ExecResult<Arc<CompiledProps>> {
        let mut slot = self.compiled.lock();
        if let Some(props) = slot.as_ref() {
            return Ok(Arc::clone(props));
        }
        let props = Arc::new(compute()?);
        *slot = Some(Arc::clone(&props));
        Ok(props)
    }

    fn estimated_or_compute(
        &self,
        compute: impl FnOnce() -> ExecResult<EstimatedProps>,
    ) -> ExecResult<Arc<EstimatedProps>> {
        let mut slot = self.estimated.lock();
        if let Some(props) = slot.as_ref() {
            return Ok(Arc::clone(props));
        }
        let props = Arc::new(compute()?);
        *slot = Some(Arc::clone(&props));
        Ok(props)
    }

    /// Compiled properties if already computed; never triggers compilation.
    pub fn peek_compiled(&self) -> Option<Arc<CompiledProps>> {
        self.compiled.lock().clone()
    }

    pub fn peek_estimated(&self) -> Option<Arc<EstimatedProps>> {
        self.estimated.lock().clone()
    }

    pub fn clear(&self) {
        *self.compiled.lock() = None;
        *self.estimated.lock() = None;
    }
}

/// A physical query operator.
///
/// Implementors provide `compile_props` / `estimate_props`; callers go
/// through the caching `compiled()` / `estimated()` wrappers.
pub trait QueryOp {
    /// Display name of the operator kind.
    fn name(&self) -> &'static str;

    /// Statement-scoped id of this operator instance (temp-file naming).
    fn op_id(&self) -> u64;

    fn context(&self) -> &StatementContext;

    /// Ordered child operators.
    fn children(&self) -> Vec<&dyn QueryOp>;

    /// Peak block budget this operator consumes, excluding children.
    fn memory_blocks_required(&self) -> usize;

    fn props_cache(&self) -> &PropsCache;

    /// Compute compiled properties from scratch (uncached).
    fn compile_props(&self) -> ExecResult<CompiledProps>;

    /// Compute estimated properties from scratch (uncached).
    fn estimate_props(&self) -> ExecResult<EstimatedProps>;

    /// One-shot producer of result rows.
    fn execute(&self) -> ExecResult<RowStream<'_>>;

    /// Extra pretty-printing lines specific to the operator.
    fn describe_more(&self) -> Vec<String> {
        Vec::new()
    }

    /// Clear operator-local caches beyond the shared `PropsCache` (compiled
    /// closures, say). Called by `invalidate_cached_props`.
    fn clear_op_caches(&self) {}

    /// Compiled properties, cached after the first call.
    fn compiled(&self) -> ExecResult<Arc<CompiledProps>> {
        self.props_cache().compiled_or_compute(|| self.compile_props())
    }

    /// Estimated properties, cached after the first call.
    fn estimated(&self) -> ExecResult<Arc<EstimatedProps>> {
        self.props_cache()
            .estimated_or_compute(|| self.estimate_props())
    }

    /// Invalidate cached properties of this operator and, unless `shallow`,
    /// of all descendants.
    fn invalidate_cached_props(&self, shallow: bool) {
        self.props_cache().clear();
        self.clear_op_caches();
        if !shallow {
            for child in self.children() {
                child.invalidate_cached_props(false);
            }
        }
    }
}

/// Total block budget of the plan rooted at `op`: budgets aggregate
/// additively along a root-to-leaf chain, so this is the heaviest path.
pub fn total_memory_blocks_required(op: &dyn QueryOp) -> usize {
    op.memory_blocks_required()
        + op.children()
            .iter()
            .map(|c| total_memory_blocks_required(*c))
            .max()
            .unwrap_or(0)
}

/// Total estimated I/O cost of one complete `execute` pass of the plan
/// rooted at `op`, including one-time extra init costs. Extra-init objects
/// shared across a DAG are counted once (by allocation identity).
pub fn estimated_cost(op: &dyn QueryOp) -> ExecResult<u64> {
    let mut extras: Vec<Arc<BlockIoStats>> = Vec::new();
    collect_extra_init(op, &mut extras)?;
    let extra_total: u64 = extras.iter().map(|e| e.overall).sum();
    Ok(extra_total + op.estimated()?.blocks.overall)
}

fn collect_extra_init(op: &dyn QueryOp, extras: &mut Vec<Arc<BlockIoStats>>) -> ExecResult<()> {
    if let Some(extra) = &op.estimated()?.blocks_extra_init {
        if extras.iter().any(|seen| Arc::ptr_eq(seen, extra)) {
            // already visited this subtree; skip
            return Ok(());
        }
        extras.push(Arc::clone(extra));
    }
    for child in op.children() {
        collect_extra_init(child, extras)?;
    }
    Ok(())
}

/// Pretty-print the plan tree rooted at `op`, one line per element.
///
/// Compiled and estimated properties are shown only if already computed;
/// printing never triggers compilation.
pub fn pstr(op: &dyn QueryOp) -> String {
    let mut lines = Vec::new();
    pstr_into(op, 0, &mut lines);
    lines.join("\n")
}

fn pstr_into(op: &dyn QueryOp, indent: usize, lines: &mut Vec<String>) {
    let head_prefix = if indent == 0 {
        String::new()
    } else {
        format!("{}\\___", "    ".repeat(indent - 1))
    };
    lines.push(format!("{head_prefix}{}[#{}]", op.name(), op.op_id()));
    let prefix = format!("{}| ", "    ".repeat(indent));
    for line in op.describe_more() {
        lines.push(format!("{prefix}{line}"));
    }
    if let Some(compiled) = op.props_cache().peek_compiled() {
        for line in compiled.describe() {
            lines.push(format!("{prefix}{line}"));
        }
    }
    if let Some(estimated) = op.props_cache().peek_estimated() {
        for line in estimated.describe() {
            lines.push(format!("{prefix}{line}"));
        }
    }
    for child in op.children() {
        pstr_into(child, indent + 1, lines);
    }
}
