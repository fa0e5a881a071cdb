//! Grouped Aggregation
//!
//! Computes aggregate values over grouped input rows, emitting one row per
//! group: the group-by values followed by the aggregate values. The input
//! must already be grouped, with all rows of a group consecutive (pre-sorted
//! on the group-by keys).
//!
//! Incremental aggregates fold each input straight into their state. A
//! non-incremental aggregate (MEDIAN, or any DISTINCT variant) routes its
//! inputs through a private external sort buffer sized to its share of the
//! memory budget, so `add` sees the group's values sorted and, for DISTINCT,
//! deduplicated.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::expr::eval::{compile_expr, CompiledExpr};
use crate::expr::{AggrExpr, AggrState, ValExpr};
use crate::metadata::{anon_column_name, anon_table_name, OutputLineage, TableMetadata};
use crate::value::{Row, Value};

use super::error::{ExecResult, ExecutorError};
use super::util::{identity_key_fn, key_comparator, ExtSortBuffer, RunFileFactory};
use super::{
    BlockIoStats, CompiledProps, EstimatedProps, PropsCache, QueryOp, RowStream, StatementContext,
};

struct AggrFns {
    groupby: Vec<CompiledExpr>,
    aggr_inputs: Vec<CompiledExpr>,
}

/// Aggregation physical operator.
pub struct AggrOp {
    ctx: StatementContext,
    id: u64,
    input: Arc<dyn QueryOp>,
    groupby_exprs: Vec<ValExpr>,
    aggr_exprs: Vec<AggrExpr>,
    output_table_name: String,
    output_column_names: Vec<String>,
    num_memory_blocks: usize,
    num_non_incremental: usize,
    cache: PropsCache,
    fns: Mutex<Option<Arc<AggrFns>>>,
}

impl AggrOp {
    /// Construct an aggregation on top of `input`, which must produce all
    /// rows of a group consecutively. With `K` non-incremental aggregates
    /// the memory budget must cover `K` external sort buffers of at least 3
    /// blocks each.
    pub fn new(
        input: Arc<dyn QueryOp>,
        groupby_exprs: Vec<ValExpr>,
        aggr_exprs: Vec<AggrExpr>,
        column_names: Option<Vec<Option<String>>>,
        num_memory_blocks: usize,
    ) -> ExecResult<Self> {
        let num_non_incremental = aggr_exprs.iter().filter(|a| !a.is_incremental()).count();
        if num_memory_blocks < 3 * num_non_incremental.max(1) {
            return Err(ExecutorError::Config(
                "aggregation needs at least 3 memory blocks per external sort".to_string(),
            ));
        }
        let ctx = input.context().clone();
        let id = ctx.next_op_id();
        let output_table_name = anon_table_name("AggrOp", id);
        let num_outputs = groupby_exprs.len() + aggr_exprs.len();
        let mut output_column_names = Vec::with_capacity(num_outputs);
        for i in 0..num_outputs {
            let given = column_names
                .as_ref()
                .and_then(|names| names.get(i))
                .and_then(|n| n.clone());
            let name = match given {
                Some(name) => name,
                None => match groupby_exprs.get(i) {
                    Some(ValExpr::NamedColumn { column_name, .. }) => column_name.clone(),
                    _ => anon_column_name(i),
                },
            };
            output_column_names.push(name);
        }
        Ok(AggrOp {
            ctx,
            id,
            input,
            groupby_exprs,
            aggr_exprs,
            output_table_name,
            output_column_names,
            num_memory_blocks,
            num_non_incremental,
            cache: PropsCache::new(),
            fns: Mutex::new(None),
        })
    }

    fn aggr_fns(&self) -> ExecResult<Arc<AggrFns>> {
        let mut slot = self.fns.lock();
        if let Some(fns) = slot.as_ref() {
            return Ok(Arc::clone(fns));
        }
        let input_props = self.input.compiled()?;
        let lineages = [&input_props.output_lineage];
        let groupby = self
            .groupby_exprs
            .iter()
            .map(|e| compile_expr(e, &lineages))
            .collect::<Result<Vec<_>, _>>()?;
        let aggr_inputs = self
            .aggr_exprs
            .iter()
            .map(|a| compile_expr(&a.input, &lineages))
            .collect::<Result<Vec<_>, _>>()?;
        let fns = Arc::new(AggrFns {
            groupby,
            aggr_inputs,
        });
        *slot = Some(Arc::clone(&fns));
        Ok(fns)
    }

    /// One external sort buffer per non-incremental aggregate, each with its
    /// equal share of the block budget.
    fn make_sort_buffers(&self) -> ExecResult<Vec<Option<ExtSortBuffer>>> {
        let share = if self.num_non_incremental > 0 {
            self.num_memory_blocks / self.num_non_incremental
        } else {
            self.num_memory_blocks
        };
        self.aggr_exprs
            .iter()
            .enumerate()
            .map(|(i, aggr)| {
                if aggr.is_incremental() {
                    Ok(None)
                } else {
                    ExtSortBuffer::new(
                        identity_key_fn(),
                        key_comparator(vec![true]),
                        RunFileFactory::aggr_runs(&self.ctx, self.id, i),
                        share,
                        None,
                        self.ctx.block_size,
                        aggr.is_distinct(),
                    )
                    .map(Some)
                }
            })
            .collect()
    }
}

impl QueryOp for AggrOp {
    fn name(&self) -> &'static str {
        "AggrOp"
    }

    fn op_id(&self) -> u64 {
        self.id
    }

    fn context(&self) -> &StatementContext {
        &self.ctx
    }

    fn children(&self) -> Vec<&dyn QueryOp> {
        vec![self.input.as_ref()]
    }

    fn memory_blocks_required(&self) -> usize {
        self.num_memory_blocks
    }

    fn props_cache(&self) -> &PropsCache {
        &self.cache
    }

    fn clear_op_caches(&self) {
        *self.fns.lock() = None;
    }

    fn compile_props(&self) -> ExecResult<CompiledProps> {
        let input_props = self.input.compiled()?;
        let mut output_types = Vec::new();
        for e in &self.groupby_exprs {
            output_types.push(e.datatype()?);
        }
        for a in &self.aggr_exprs {
            output_types.push(a.datatype()?);
        }
        // a group-by column that is a bare column reference inherits the
        // child's lineage for that column; aggregates get a self reference
        let mut output_lineage: OutputLineage = Vec::new();
        let mut preserved: HashMap<usize, usize> = HashMap::new();
        for (i, name) in self.output_column_names.iter().enumerate() {
            let mut lineage = crate::metadata::lineage_of(&self.output_table_name, name);
            if let Some(expr) = self.groupby_exprs.get(i) {
                if let Some(input_column) = input_props.column_in_output(expr, 0) {
                    lineage.extend(input_props.output_lineage[input_column].iter().cloned());
                    preserved.insert(input_column, i);
                }
            }
            output_lineage.push(lineage);
        }
        let mut ordered_columns = Vec::new();
        let mut ordered_asc = Vec::new();
        for (input_column, asc) in input_props
            .ordered_columns
            .iter()
            .zip(input_props.ordered_asc.iter())
        {
            if let Some(out) = preserved.get(input_column) {
                ordered_columns.push(*out);
                ordered_asc.push(*asc);
            } else {
                // any gap means the remaining columns are not ordered
                break;
            }
        }
        let mut unique_columns: std::collections::HashSet<usize> = input_props
            .unique_columns
            .iter()
            .filter_map(|c| preserved.get(c).copied())
            .collect();
        // grouping makes the group-by columns unique as a whole, but only
        // single-column uniqueness is representable
        if self.groupby_exprs.len() == 1 {
            unique_columns.insert(0);
        }
        self.aggr_fns()?;
        Ok(CompiledProps {
            output_metadata: TableMetadata::new(self.output_column_names.clone(), output_types),
            output_lineage,
            ordered_columns,
            ordered_asc,
            unique_columns,
        })
    }

    fn estimate_props(&self) -> ExecResult<EstimatedProps> {
        let input_estimated = self.input.estimated()?;
        let row_size = self.compiled()?.output_metadata.estimated_row_size();
        let stats = self.ctx.stats.grouping_stats(
            &input_estimated.stats,
            self.groupby_exprs.len(),
            row_size,
        );
        Ok(EstimatedProps {
            stats,
            blocks: BlockIoStats {
                self_reads: 0,
                self_writes: 0,
                overall: input_estimated.blocks.overall,
            },
            blocks_extra_init: None,
        })
    }

    fn execute(&self) -> ExecResult<RowStream<'_>> {
        let fns = self.aggr_fns()?;
        let sort_buffers = self.make_sort_buffers()?;
        let input = self.input.execute()?;
        // with no GROUP BY, the single global group starts eagerly so that
        // empty input still produces one init-then-finalize row
        let (cur_group, states) = if self.groupby_exprs.is_empty() {
            (
                Some(Vec::new()),
                self.aggr_exprs.iter().map(AggrExpr::init).collect(),
            )
        } else {
            (None, Vec::new())
        };
        Ok(Box::new(AggrStream {
            input,
            fns,
            aggr_exprs: self.aggr_exprs.clone(),
            sort_buffers,
            cur_group,
            states,
            done: false,
        }))
    }

    fn describe_more(&self) -> Vec<String> {
        let mut lines = vec![format!("AS {}:", self.output_table_name)];
        for (name, expr) in self
            .output_column_names
            .iter()
            .zip(self.groupby_exprs.iter())
        {
            lines.push(format!("  {name}: {expr}"));
        }
        for (name, aggr) in self.output_column_names[self.groupby_exprs.len()..]
            .iter()
            .zip(self.aggr_exprs.iter())
        {
            lines.push(format!("  {name}: {aggr}"));
        }
        lines.push(format!("# memory blocks: {}", self.num_memory_blocks));
        lines
    }
}

struct AggrStream<'a> {
    input: RowStream<'a>,
    fns: Arc<AggrFns>,
    aggr_exprs: Vec<AggrExpr>,
    sort_buffers: Vec<Option<ExtSortBuffer>>,
    cur_group: Option<Vec<Value>>,
    states: Vec<AggrState>,
    done: bool,
}

impl AggrStream<'_> {
    /// Fold one input row into the current group's aggregate states.
    fn fold_row(&mut self, aggr_inputs: Vec<Value>) -> ExecResult<()> {
        for (i, value) in aggr_inputs.into_iter().enumerate() {
            match &mut self.sort_buffers[i] {
                None => self.aggr_exprs[i].add(&mut self.states[i], &value),
                Some(buffer) => buffer.add(Row::new(vec![value]))?,
            }
        }
        Ok(())
    }

    /// Drain the sort buffers into the states, finalize, and emit the row
    /// for the group `group_vals`.
    fn finalize_group(&mut self, group_vals: Vec<Value>) -> ExecResult<Row> {
        for (i, buffer) in self.sort_buffers.iter_mut().enumerate() {
            if let Some(buffer) = buffer {
                for row in buffer.iter_and_clear()? {
                    let row = row?;
                    let value = row.get(0).cloned().unwrap_or(Value::Null);
                    self.aggr_exprs[i].add(&mut self.states[i], &value);
                }
            }
        }
        let mut values = group_vals;
        for (aggr, state) in self.aggr_exprs.iter().zip(self.states.drain(..)) {
            values.push(aggr.finalize(state));
        }
        Ok(Row::new(values))
    }

    fn next_row(&mut self) -> ExecResult<Option<Row>> {
        loop {
            match self.input.next().transpose()? {
                Some(row) => {
                    let input_rows = [&row];
                    let groupby_vals = self
                        .fns
                        .groupby
                        .iter()
                        .map(|f| (**f)(&input_rows))
                        .collect::<Result<Vec<_>, _>>()?;
                    let aggr_inputs = self
                        .fns
                        .aggr_inputs
                        .iter()
                        .map(|f| (**f)(&input_rows))
                        .collect::<Result<Vec<_>, _>>()?;
                    if self.cur_group.as_ref() == Some(&groupby_vals) {
                        self.fold_row(aggr_inputs)?;
                        continue;
                    }
                    // group boundary: finalize the previous group (if any)
                    // before its states are replaced, then start the new
                    // group with this row folded in
                    let finalized = match self.cur_group.take() {
                        Some(prev_vals) => Some(self.finalize_group(prev_vals)?),
                        None => None,
                    };
                    self.cur_group = Some(groupby_vals);
                    self.states = self.aggr_exprs.iter().map(AggrExpr::init).collect();
                    self.fold_row(aggr_inputs)?;
                    if let Some(row) = finalized {
                        return Ok(Some(row));
                    }
                }
                None => {
                    self.done = true;
                    return match self.cur_group.take() {
                        Some(group_vals) => Ok(Some(self.finalize_group(group_vals)?)),
                        None => Ok(None),
                    };
                }
            }
        }
    }
}

impl Iterator for AggrStream<'_> {
    type Item = ExecResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
