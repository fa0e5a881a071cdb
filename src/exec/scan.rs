//! Table Scan
//!
//! Leaf operator iterating a base table's heap file under the statement's
//! main transaction. Seeds lineage from the table alias and uniqueness from
//! the table's declared keys.

use crate::metadata::{lineage_of, BaseTableMetadata, OutputLineage};

use super::error::{ExecResult, ExecutorError};
use super::{
    BlockIoStats, CompiledProps, EstimatedProps, PropsCache, QueryOp, RowStream, StatementContext,
};

/// Full scan over a base table.
pub struct TableScanOp {
    ctx: StatementContext,
    id: u64,
    alias: String,
    meta: BaseTableMetadata,
    cache: PropsCache,
}

impl TableScanOp {
    pub fn new(ctx: &StatementContext, alias: &str, meta: BaseTableMetadata) -> Self {
        TableScanOp {
            ctx: ctx.clone(),
            id: ctx.next_op_id(),
            alias: alias.to_string(),
            meta,
            cache: PropsCache::new(),
        }
    }

    /// Construct from the catalog entry for `table_name`.
    pub fn from_catalog(
        ctx: &StatementContext,
        alias: &str,
        table_name: &str,
    ) -> ExecResult<Self> {
        let meta = ctx
            .catalog
            .table(table_name)
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownTable(table_name.to_string()))?;
        Ok(TableScanOp::new(ctx, alias, meta))
    }
}

impl QueryOp for TableScanOp {
    fn name(&self) -> &'static str {
        "TableScanOp"
    }

    fn op_id(&self) -> u64 {
        self.id
    }

    fn context(&self) -> &StatementContext {
        &self.ctx
    }

    fn children(&self) -> Vec<&dyn QueryOp> {
        Vec::new()
    }

    fn memory_blocks_required(&self) -> usize {
        // streams straight off the heap file, one block at a time
        1
    }

    fn props_cache(&self) -> &PropsCache {
        &self.cache
    }

    fn compile_props(&self) -> ExecResult<CompiledProps> {
        let output_lineage: OutputLineage = self
            .meta
            .schema
            .column_names()
            .iter()
            .map(|name| lineage_of(&self.alias, name))
            .collect();
        Ok(CompiledProps {
            output_metadata: self.meta.schema.clone(),
            output_lineage,
            ordered_columns: Vec::new(),
            ordered_asc: Vec::new(),
            unique_columns: self.meta.key_columns(),
        })
    }

    fn estimate_props(&self) -> ExecResult<EstimatedProps> {
        let stats = self.ctx.stats.table_stats(&self.meta);
        let block_count = stats.block_count();
        Ok(EstimatedProps {
            stats,
            blocks: BlockIoStats {
                self_reads: block_count,
                self_writes: 0,
                overall: block_count,
            },
            blocks_extra_init: None,
        })
    }

    fn execute(&self) -> ExecResult<RowStream<'_>> {
        let file = self.ctx.sm.heap_file(
            self.ctx.tx,
            &self.meta.name,
            self.meta.schema.column_types().to_vec(),
            false,
        )?;
        let scan = file.iter_scan()?;
        Ok(Box::new(scan.map(|r| r.map_err(ExecutorError::from))))
    }

    fn describe_more(&self) -> Vec<String> {
        vec![format!("{} AS {}", self.meta.name, self.alias)]
    }
}
