//! Filter
//!
//! Emits the input rows for which the predicate evaluates truthy. No extra
//! memory is needed, and every compiled property of the input is preserved.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::expr::eval::{compile_expr, CompiledExpr};
use crate::expr::{CompileError, ValExpr};
use crate::value::DataType;

use super::error::{ExecResult, ExecutorError};
use super::{
    BlockIoStats, CompiledProps, EstimatedProps, PropsCache, QueryOp, RowStream, StatementContext,
};

/// Filter physical operator.
pub struct FilterOp {
    ctx: StatementContext,
    id: u64,
    input: Arc<dyn QueryOp>,
    cond: ValExpr,
    cache: PropsCache,
    cond_fn: Mutex<Option<CompiledExpr>>,
}

impl FilterOp {
    pub fn new(input: Arc<dyn QueryOp>, cond: ValExpr) -> Self {
        let ctx = input.context().clone();
        let id = ctx.next_op_id();
        FilterOp {
            ctx,
            id,
            input,
            cond,
            cache: PropsCache::new(),
            cond_fn: Mutex::new(None),
        }
    }

    fn compiled_cond(&self) -> ExecResult<CompiledExpr> {
        let mut slot = self.cond_fn.lock();
        if let Some(f) = slot.as_ref() {
            return Ok(Arc::clone(f));
        }
        if self.cond.datatype()? != DataType::Boolean {
            return Err(ExecutorError::Compile(CompileError::Unsupported(format!(
                "filter condition {} is not boolean",
                self.cond
            ))));
        }
        let input_props = self.input.compiled()?;
        let f = compile_expr(&self.cond, &[&input_props.output_lineage])?;
        *slot = Some(Arc::clone(&f));
        Ok(f)
    }
}

impl QueryOp for FilterOp {
    fn name(&self) -> &'static str {
        "FilterOp"
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
        0
    }

    fn props_cache(&self) -> &PropsCache {
        &self.cache
    }

    fn clear_op_caches(&self) {
        *self.cond_fn.lock() = None;
    }

    fn compile_props(&self) -> ExecResult<CompiledProps> {
        let input_props = self.input.compiled()?;
        self.compiled_cond()?;
        Ok(CompiledProps::from_input(&input_props))
    }

    fn estimate_props(&self) -> ExecResult<EstimatedProps> {
        let input_estimated = self.input.estimated()?;
        let stats = self
            .ctx
            .stats
            .selection_stats(&input_estimated.stats, Some(&self.cond));
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
        let cond_fn = self.compiled_cond()?;
        let input = self.input.execute()?;
        Ok(Box::new(input.filter_map(move |item| match item {
            Err(e) => Some(Err(e)),
            Ok(row) => match (*cond_fn)(&[&row]) {
                Err(e) => Some(Err(e.into())),
                Ok(v) => {
                    if v.is_truthy() {
                        Some(Ok(row))
                    } else {
                        None
                    }
                }
            },
        })))
    }

    fn describe_more(&self) -> Vec<String> {
        vec![format!("filter condition: {}", self.cond)]
    }
}
