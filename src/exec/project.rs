//! Projection
//!
//! Evaluates one expression per output column over each input row. Bare
//! column references keep their input column's lineage (plus a fresh self
//! reference); computed expressions get a self reference only. Ordering and
//! uniqueness survive exactly for the input columns the projection preserves.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::expr::eval::{compile_expr, CompiledExpr};
use crate::expr::ValExpr;
use crate::metadata::{anon_column_name, anon_table_name, OutputLineage, TableMetadata};
use crate::statistics::TableStats;
use crate::value::Row;

use super::error::ExecResult;
use super::{
    BlockIoStats, CompiledProps, EstimatedProps, PropsCache, QueryOp, RowStream, StatementContext,
};

/// Projection physical operator.
pub struct ProjectOp {
    ctx: StatementContext,
    id: u64,
    input: Arc<dyn QueryOp>,
    exprs: Vec<ValExpr>,
    output_table_name: String,
    output_column_names: Vec<String>,
    cache: PropsCache,
    expr_fns: Mutex<Option<Arc<Vec<CompiledExpr>>>>,
}

impl ProjectOp {
    /// Construct a projection computing `exprs`; `aliases` may name any of
    /// the output columns (bare column references default to their column
    /// name, everything else gets a positional name).
    pub fn new(
        input: Arc<dyn QueryOp>,
        exprs: Vec<ValExpr>,
        aliases: Vec<Option<String>>,
    ) -> Self {
        let ctx = input.context().clone();
        let id = ctx.next_op_id();
        let output_table_name = anon_table_name("ProjectOp", id);
        let output_column_names = exprs
            .iter()
            .enumerate()
            .map(|(i, expr)| match aliases.get(i).and_then(|a| a.clone()) {
                Some(name) => name,
                None => match expr {
                    ValExpr::NamedColumn { column_name, .. } => column_name.clone(),
                    _ => anon_column_name(i),
                },
            })
            .collect();
        ProjectOp {
            ctx,
            id,
            input,
            exprs,
            output_table_name,
            output_column_names,
            cache: PropsCache::new(),
            expr_fns: Mutex::new(None),
        }
    }

    fn compiled_exprs(&self) -> ExecResult<Arc<Vec<CompiledExpr>>> {
        let mut slot = self.expr_fns.lock();
        if let Some(fns) = slot.as_ref() {
            return Ok(Arc::clone(fns));
        }
        let input_props = self.input.compiled()?;
        let fns: Vec<CompiledExpr> = self
            .exprs
            .iter()
            .map(|e| compile_expr(e, &[&input_props.output_lineage]))
            .collect::<Result<_, _>>()?;
        let fns = Arc::new(fns);
        *slot = Some(Arc::clone(&fns));
        Ok(fns)
    }
}

impl QueryOp for ProjectOp {
    fn name(&self) -> &'static str {
        "ProjectOp"
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
        *self.expr_fns.lock() = None;
    }

    fn compile_props(&self) -> ExecResult<CompiledProps> {
        let input_props = self.input.compiled()?;
        let mut output_types = Vec::with_capacity(self.exprs.len());
        let mut output_lineage: OutputLineage = Vec::with_capacity(self.exprs.len());
        // input column index -> output column index, for surviving columns
        let mut preserved: HashMap<usize, usize> = HashMap::new();
        for (i, (expr, name)) in self
            .exprs
            .iter()
            .zip(self.output_column_names.iter())
            .enumerate()
        {
            output_types.push(expr.datatype()?);
            let mut lineage = crate::metadata::lineage_of(&self.output_table_name, name);
            if let Some(input_column) = input_props.column_in_output(expr, 0) {
                lineage.extend(input_props.output_lineage[input_column].iter().cloned());
                preserved.entry(input_column).or_insert(i);
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
                // a dropped ordering column breaks everything after it
                break;
            }
        }
        let unique_columns = input_props
            .unique_columns
            .iter()
            .filter_map(|c| preserved.get(c).copied())
            .collect();
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
        Ok(EstimatedProps {
            stats: TableStats::new(
                input_estimated.stats.row_count,
                row_size,
                self.ctx.block_size,
            ),
            blocks: BlockIoStats {
                self_reads: 0,
                self_writes: 0,
                overall: input_estimated.blocks.overall,
            },
            blocks_extra_init: None,
        })
    }

    fn execute(&self) -> ExecResult<RowStream<'_>> {
        let fns = self.compiled_exprs()?;
        let input = self.input.execute()?;
        Ok(Box::new(input.map(move |item| {
            let row = item?;
            let values = fns
                .iter()
                .map(|f| (**f)(&[&row]))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Row::new(values))
        })))
    }

    fn describe_more(&self) -> Vec<String> {
        let mut lines = vec![format!("AS {}:", self.output_table_name)];
        for (name, expr) in self.output_column_names.iter().zip(self.exprs.iter()) {
            lines.push(format!("  {name}: {expr}"));
        }
        lines
    }
}
