//! Block Nested-Loop Join
//!
//! Buffers the outer (left) input one block-budgeted chunk at a time and
//! re-drives the inner (right) input once per chunk, emitting concatenated
//! row pairs that satisfy the join condition (all pairs if none is given).

use parking_lot::Mutex;
use std::sync::Arc;

use crate::expr::eval::{compile_expr, CompiledExpr};
use crate::expr::{CompileError, ValExpr};
use crate::value::{DataType, Row};

use super::super::error::{ExecResult, ExecutorError};
use super::super::util::{BufferedChunks, BufferedReader};
use super::super::{
    BlockIoStats, CompiledProps, EstimatedProps, PropsCache, QueryOp, RowStream, StatementContext,
};

/// Block nested-loop join physical operator.
pub struct BlockNLJoinOp {
    ctx: StatementContext,
    id: u64,
    left: Arc<dyn QueryOp>,
    right: Arc<dyn QueryOp>,
    cond: Option<ValExpr>,
    num_memory_blocks: usize,
    cache: PropsCache,
    cond_fn: Mutex<Option<Option<CompiledExpr>>>,
}

impl BlockNLJoinOp {
    pub fn new(
        left: Arc<dyn QueryOp>,
        right: Arc<dyn QueryOp>,
        cond: Option<ValExpr>,
        num_memory_blocks: usize,
    ) -> ExecResult<Self> {
        if num_memory_blocks < 2 {
            return Err(ExecutorError::Config(
                "block nested-loop join needs at least 2 memory blocks".to_string(),
            ));
        }
        let ctx = left.context().clone();
        let id = ctx.next_op_id();
        Ok(BlockNLJoinOp {
            ctx,
            id,
            left,
            right,
            cond,
            num_memory_blocks,
            cache: PropsCache::new(),
            cond_fn: Mutex::new(None),
        })
    }

    fn compiled_cond(&self) -> ExecResult<Option<CompiledExpr>> {
        let mut slot = self.cond_fn.lock();
        if let Some(f) = slot.as_ref() {
            return Ok(f.clone());
        }
        let compiled = match &self.cond {
            None => None,
            Some(cond) => {
                if cond.datatype()? != DataType::Boolean {
                    return Err(ExecutorError::Compile(CompileError::Unsupported(format!(
                        "join condition {cond} is not boolean"
                    ))));
                }
                let left_props = self.left.compiled()?;
                let right_props = self.right.compiled()?;
                Some(compile_expr(
                    cond,
                    &[&left_props.output_lineage, &right_props.output_lineage],
                )?)
            }
        };
        *slot = Some(compiled.clone());
        Ok(compiled)
    }
}

impl QueryOp for BlockNLJoinOp {
    fn name(&self) -> &'static str {
        "BlockNLJoinOp"
    }

    fn op_id(&self) -> u64 {
        self.id
    }

    fn context(&self) -> &StatementContext {
        &self.ctx
    }

    fn children(&self) -> Vec<&dyn QueryOp> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn memory_blocks_required(&self) -> usize {
        self.num_memory_blocks
    }

    fn props_cache(&self) -> &PropsCache {
        &self.cache
    }

    fn clear_op_caches(&self) {
        *self.cond_fn.lock() = None;
    }

    fn compile_props(&self) -> ExecResult<CompiledProps> {
        let left_props = self.left.compiled()?;
        let right_props = self.right.compiled()?;
        self.compiled_cond()?;
        Ok(CompiledProps::from_inputs(&left_props, &right_props))
    }

    fn estimate_props(&self) -> ExecResult<EstimatedProps> {
        let left_estimated = self.left.estimated()?;
        let right_estimated = self.right.estimated()?;
        let stats = match &self.cond {
            // treat an equality condition as a one-pair equi-join guess
            Some(_) => self.ctx.stats.join_stats(
                &left_estimated.stats,
                &right_estimated.stats,
                1,
            ),
            None => self
                .ctx
                .stats
                .join_stats(&left_estimated.stats, &right_estimated.stats, 0),
        };
        let outer_blocks = left_estimated.stats.block_count();
        let inner_passes = outer_blocks.div_ceil((self.num_memory_blocks - 1) as u64).max(1);
        Ok(EstimatedProps {
            stats,
            blocks: BlockIoStats {
                self_reads: 0,
                self_writes: 0,
                overall: left_estimated.blocks.overall
                    + inner_passes * right_estimated.blocks.overall,
            },
            blocks_extra_init: None,
        })
    }

    fn execute(&self) -> ExecResult<RowStream<'_>> {
        let cond_fn = self.compiled_cond()?;
        // one block is reserved for streaming the inner input
        let reader = BufferedReader::new(self.num_memory_blocks - 1, self.ctx.block_size);
        let chunks = reader.iter_buffer(self.left.execute()?);
        Ok(Box::new(BnlJoinStream {
            right_op: self.right.as_ref(),
            chunks,
            cond_fn,
            outer: Vec::new(),
            outer_index: 0,
            inner: None,
            inner_row: None,
            done: false,
        }))
    }

    fn describe_more(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(cond) = &self.cond {
            lines.push(format!("join condition: {cond}"));
        }
        lines.push(format!("# memory blocks: {}", self.num_memory_blocks));
        lines
    }
}

struct BnlJoinStream<'a> {
    right_op: &'a dyn QueryOp,
    chunks: BufferedChunks<'a>,
    cond_fn: Option<CompiledExpr>,
    outer: Vec<Row>,
    outer_index: usize,
    inner: Option<RowStream<'a>>,
    inner_row: Option<Row>,
    done: bool,
}

impl BnlJoinStream<'_> {
    fn next_row(&mut self) -> ExecResult<Option<Row>> {
        loop {
            if self.outer.is_empty() {
                match self.chunks.next().transpose()? {
                    Some(chunk) => {
                        self.outer = chunk;
                        self.inner = None;
                        self.inner_row = None;
                        self.outer_index = 0;
                    }
                    None => return Ok(None),
                }
            }
            if self.inner.is_none() {
                // re-drive the inner input for this outer chunk
                self.inner = Some(self.right_op.execute()?);
            }
            if self.inner_row.is_none() {
                let fetched = match self.inner.as_mut() {
                    Some(inner) => inner.next().transpose()?,
                    None => None,
                };
                match fetched {
                    Some(row) => {
                        self.inner_row = Some(row);
                        self.outer_index = 0;
                    }
                    None => {
                        // inner exhausted for this chunk; fetch the next one
                        self.outer.clear();
                        self.inner = None;
                        continue;
                    }
                }
            }
            let Some(inner_row) = self.inner_row.clone() else {
                continue;
            };
            while self.outer_index < self.outer.len() {
                let outer_row = &self.outer[self.outer_index];
                self.outer_index += 1;
                let matches = match &self.cond_fn {
                    None => true,
                    Some(f) => (**f)(&[outer_row, &inner_row])?.is_truthy(),
                };
                if matches {
                    return Ok(Some(outer_row.concat(&inner_row)));
                }
            }
            self.inner_row = None;
        }
    }
}

impl Iterator for BnlJoinStream<'_> {
    type Item = ExecResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
