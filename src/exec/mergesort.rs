//! External Merge Sort
//!
//! Multi-pass external sort. Pass 0 fills the whole block budget with input
//! rows, sorts them in place (stably), and writes each batch out as a run;
//! merge passes then combine up to `B - 1` runs at a time until no more than
//! the final-pass budget remain, and the final pass merges straight into the
//! output stream. The final-pass budget may differ from `B` so a parent
//! operator (a merge join, say) can reserve blocks of its own.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::expr::eval::compile_key_fn;
use crate::expr::ValExpr;
use crate::storage::HeapFile;
use crate::value::Row;

use super::error::{ExecResult, ExecutorError};
use super::util::{
    key_comparator, merge_runs_until, BufferedReader, KeyCmp, RowKeyFn, RunFileFactory, RunMerge,
};
use super::{
    CompiledProps, EstimatedProps, BlockIoStats, PropsCache, QueryOp, RowStream, StatementContext,
};

/// External merge sort physical operator.
///
/// Uses as many memory blocks as it is given, with an option to use a
/// different number of blocks for the final pass. Intermediate runs are
/// stored as heap files in the tmp space.
pub struct MergeSortOp {
    ctx: StatementContext,
    id: u64,
    input: Arc<dyn QueryOp>,
    exprs: Vec<ValExpr>,
    orders_asc: Vec<bool>,
    num_memory_blocks: usize,
    num_memory_blocks_final: usize,
    cache: PropsCache,
    key_fn: Mutex<Option<RowKeyFn>>,
}

impl MergeSortOp {
    /// Construct a sort on top of `input` using the given sort keys. The
    /// final-pass budget defaults to the overall budget.
    pub fn new(
        input: Arc<dyn QueryOp>,
        exprs: Vec<ValExpr>,
        orders_asc: Vec<bool>,
        num_memory_blocks: usize,
        num_memory_blocks_final: Option<usize>,
    ) -> ExecResult<Self> {
        if num_memory_blocks <= 2 {
            return Err(ExecutorError::Config(
                "merge sort needs at least 3 memory blocks to perform a merge".to_string(),
            ));
        }
        if exprs.len() != orders_asc.len() {
            return Err(ExecutorError::Config(
                "merge sort needs one ascending/descending flag per sort key".to_string(),
            ));
        }
        let ctx = input.context().clone();
        let id = ctx.next_op_id();
        Ok(MergeSortOp {
            ctx,
            id,
            input,
            exprs,
            orders_asc,
            num_memory_blocks,
            num_memory_blocks_final: num_memory_blocks_final.unwrap_or(num_memory_blocks),
            cache: PropsCache::new(),
            key_fn: Mutex::new(None),
        })
    }

    /// Output ordering: the sort keys that resolve to input columns, and,
    /// when every key resolves (no gap), whatever trailing ordering the
    /// input already had. The sort is stable, so previous ordering survives
    /// as a tiebreaker.
    fn infer_ordering(&self) -> ExecResult<(Vec<usize>, Vec<bool>)> {
        let input_props = self.input.compiled()?;
        let mut ordered_columns: Vec<usize> = Vec::new();
        let mut ordered_asc: Vec<bool> = Vec::new();
        for (expr, asc) in self.exprs.iter().zip(self.orders_asc.iter()) {
            if let Some(column) = input_props.column_in_output(expr, 0) {
                ordered_columns.push(column);
                ordered_asc.push(*asc);
            } else {
                // sorting by something that is not an output column; the gap
                // destroys the rest of the ordering
                break;
            }
        }
        if ordered_columns.len() == self.exprs.len() {
            for (column, asc) in input_props
                .ordered_columns
                .iter()
                .zip(input_props.ordered_asc.iter())
            {
                if !ordered_columns.contains(column) {
                    ordered_columns.push(*column);
                    ordered_asc.push(*asc);
                }
            }
        }
        Ok((ordered_columns, ordered_asc))
    }

    fn sort_key_fn(&self) -> ExecResult<RowKeyFn> {
        let mut slot = self.key_fn.lock();
        if let Some(f) = slot.as_ref() {
            return Ok(Arc::clone(f));
        }
        let input_props = self.input.compiled()?;
        let f = compile_key_fn(&self.exprs, &[&input_props.output_lineage])?;
        *slot = Some(Arc::clone(&f));
        Ok(f)
    }

    /// Pass 0 plus all intermediate merge passes; returns the `<= B_f` runs
    /// left for the final pass.
    fn run_passes(
        &self,
        files: &RunFileFactory,
        key_fn: &RowKeyFn,
        cmp: &KeyCmp,
    ) -> ExecResult<Vec<HeapFile>> {
        debug!(op = self.id, "pass 0: sort");
        let mut runs: Vec<HeapFile> = Vec::new();
        let result = (|| -> ExecResult<Vec<HeapFile>> {
            let reader = BufferedReader::new(self.num_memory_blocks, self.ctx.block_size);
            for chunk in reader.iter_buffer(self.input.execute()?) {
                let chunk = chunk?;
                let mut decorated: Vec<(Vec<crate::value::Value>, Row)> = chunk
                    .into_iter()
                    .map(|row| (*key_fn)(&row).map(|keys| (keys, row)))
                    .collect::<Result<_, _>>()?;
                // stable, so ties preserve input order
                decorated.sort_by(|(a, _), (b, _)| (**cmp)(a, b));
                let run = files.create(0, runs.len())?;
                runs.push(run.clone());
                let rows: Vec<Row> = decorated.into_iter().map(|(_, row)| row).collect();
                run.batch_append(&rows)?;
            }
            merge_runs_until(
                std::mem::take(&mut runs),
                files,
                key_fn,
                cmp,
                self.num_memory_blocks - 1,
                self.num_memory_blocks_final,
                false,
                1,
                self.ctx.block_size,
            )
        })();
        if result.is_err() {
            for run in &runs {
                let _ = files.delete(run);
            }
        }
        result
    }
}

impl QueryOp for MergeSortOp {
    fn name(&self) -> &'static str {
        "MergeSortOp"
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
        self.num_memory_blocks.max(self.num_memory_blocks_final)
    }

    fn props_cache(&self) -> &PropsCache {
        &self.cache
    }

    fn clear_op_caches(&self) {
        *self.key_fn.lock() = None;
    }

    fn compile_props(&self) -> ExecResult<CompiledProps> {
        let input_props = self.input.compiled()?;
        let (ordered_columns, ordered_asc) = self.infer_ordering()?;
        // fail early if a sort key cannot be lowered
        self.sort_key_fn()?;
        Ok(CompiledProps {
            ordered_columns,
            ordered_asc,
            ..CompiledProps::from_input(&input_props)
        })
    }

    fn estimate_props(&self) -> ExecResult<EstimatedProps> {
        let input_estimated = self.input.estimated()?;
        let stats = self
            .ctx
            .stats
            .selection_stats(&input_estimated.stats, None);
        let block_count = stats.block_count();
        let mut num_passes: u64 = 1;
        let mut num_runs = block_count.div_ceil(self.num_memory_blocks as u64);
        while num_runs > self.num_memory_blocks_final as u64 {
            num_passes += 1;
            num_runs = num_runs.div_ceil(self.num_memory_blocks as u64 - 1);
        }
        let self_reads = block_count * (num_passes - 1);
        let self_writes = block_count * (num_passes - 1);
        Ok(EstimatedProps {
            stats,
            blocks: BlockIoStats {
                self_reads,
                self_writes,
                overall: input_estimated.blocks.overall + self_reads + self_writes,
            },
            blocks_extra_init: None,
        })
    }

    fn execute(&self) -> ExecResult<RowStream<'_>> {
        let key_fn = self.sort_key_fn()?;
        let cmp = key_comparator(self.orders_asc.clone());
        let files = RunFileFactory::sort_runs(&self.ctx, self.id);
        let runs = self.run_passes(&files, &key_fn, &cmp)?;
        debug!(op = self.id, runs = runs.len(), "final merge pass");
        let merge = match RunMerge::new(&runs, key_fn, cmp) {
            Ok(merge) => merge,
            Err(e) => {
                for run in &runs {
                    let _ = files.delete(run);
                }
                return Err(e);
            }
        };
        Ok(Box::new(MergeSortStream {
            merge,
            files,
            runs,
        }))
    }

    fn describe_more(&self) -> Vec<String> {
        let keys: Vec<String> = self
            .exprs
            .iter()
            .zip(self.orders_asc.iter())
            .map(|(e, asc)| format!("{e} {}", if *asc { "ASC" } else { "DESC" }))
            .collect();
        vec![
            keys.join(", "),
            format!(
                "# memory blocks: {} ({} last pass)",
                self.num_memory_blocks, self.num_memory_blocks_final
            ),
        ]
    }
}

/// Lazy final-pass merge; deletes the remaining runs once exhausted or
/// dropped.
struct MergeSortStream {
    merge: RunMerge,
    files: RunFileFactory,
    runs: Vec<HeapFile>,
}

impl MergeSortStream {
    fn cleanup(&mut self) {
        for run in self.runs.drain(..) {
            let _ = self.files.delete(&run);
        }
    }
}

impl Iterator for MergeSortStream {
    type Item = ExecResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.merge.next_entry() {
            Ok(Some((_, row))) => Some(Ok(row)),
            Ok(None) => {
                self.cleanup();
                None
            }
            Err(e) => {
                self.cleanup();
                Some(Err(e))
            }
        }
    }
}

impl Drop for MergeSortStream {
    fn drop(&mut self) {
        self.cleanup();
    }
}
