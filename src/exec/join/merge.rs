//! Merge Equi-Join
//!
//! Classic sort-merge join over two inputs pre-sorted on the join keys.
//! The two streams advance in lockstep; on a key match the right side's
//! duplicate group is buffered in memory and crossed with each left row
//! carrying the same key.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::expr::{CompileError, ValExpr};
use crate::value::{Row, Value};

use super::super::error::{ExecResult, ExecutorError};
use super::super::util::{key_comparator, KeyCmp, RowKeyFn};
use super::super::{
    BlockIoStats, CompiledProps, EstimatedProps, PropsCache, QueryOp, RowStream, StatementContext,
};
use super::{joined_unique_columns, side_key_fn, JoinSide};

struct MergeKeyFns {
    left: RowKeyFn,
    right: RowKeyFn,
}

/// Merge equi-join physical operator. Both inputs must already be sorted on
/// the join keys with the given orders.
pub struct MergeEqJoinOp {
    ctx: StatementContext,
    id: u64,
    left: Arc<dyn QueryOp>,
    right: Arc<dyn QueryOp>,
    left_exprs: Vec<ValExpr>,
    right_exprs: Vec<ValExpr>,
    orders_asc: Vec<bool>,
    cache: PropsCache,
    fns: Mutex<Option<Arc<MergeKeyFns>>>,
}

impl MergeEqJoinOp {
    pub fn new(
        left: Arc<dyn QueryOp>,
        right: Arc<dyn QueryOp>,
        left_exprs: Vec<ValExpr>,
        right_exprs: Vec<ValExpr>,
        orders_asc: Vec<bool>,
    ) -> ExecResult<Self> {
        if left_exprs.len() != right_exprs.len() || left_exprs.len() != orders_asc.len() {
            return Err(ExecutorError::Config(
                "merge join needs matching key expression and order lists".to_string(),
            ));
        }
        let ctx = left.context().clone();
        let id = ctx.next_op_id();
        Ok(MergeEqJoinOp {
            ctx,
            id,
            left,
            right,
            left_exprs,
            right_exprs,
            orders_asc,
            cache: PropsCache::new(),
            fns: Mutex::new(None),
        })
    }

    fn key_fns(&self) -> ExecResult<Arc<MergeKeyFns>> {
        let mut slot = self.fns.lock();
        if let Some(fns) = slot.as_ref() {
            return Ok(Arc::clone(fns));
        }
        let left_props = self.left.compiled()?;
        let right_props = self.right.compiled()?;
        let fns = Arc::new(MergeKeyFns {
            left: side_key_fn(
                &self.left_exprs,
                &left_props.output_lineage,
                &right_props.output_lineage,
                JoinSide::Left,
            )?,
            right: side_key_fn(
                &self.right_exprs,
                &left_props.output_lineage,
                &right_props.output_lineage,
                JoinSide::Right,
            )?,
        });
        *slot = Some(Arc::clone(&fns));
        Ok(fns)
    }

    /// Check that a child's guaranteed ordering covers its join keys.
    fn verify_child_sorted(
        &self,
        props: &CompiledProps,
        exprs: &[ValExpr],
        input_index: usize,
    ) -> ExecResult<()> {
        if props.ordered_columns.len() < exprs.len() {
            return Err(ExecutorError::Compile(CompileError::Unsupported(
                "merge join inputs must be sorted on the join keys".to_string(),
            )));
        }
        for ((expr, asc), (column, col_asc)) in exprs.iter().zip(self.orders_asc.iter()).zip(
            props
                .ordered_columns
                .iter()
                .zip(props.ordered_asc.iter()),
        ) {
            let resolved = props.column_in_output(expr, input_index);
            if resolved != Some(*column) || asc != col_asc {
                return Err(ExecutorError::Compile(CompileError::Unsupported(
                    "merge join inputs must be sorted on the join keys".to_string(),
                )));
            }
        }
        Ok(())
    }
}

impl QueryOp for MergeEqJoinOp {
    fn name(&self) -> &'static str {
        "MergeEqJoinOp"
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
        // one block per input plus one to buffer the right duplicate group
        3
    }

    fn props_cache(&self) -> &PropsCache {
        &self.cache
    }

    fn clear_op_caches(&self) {
        *self.fns.lock() = None;
    }

    fn compile_props(&self) -> ExecResult<CompiledProps> {
        let left_props = self.left.compiled()?;
        let right_props = self.right.compiled()?;
        self.verify_child_sorted(&left_props, &self.left_exprs, 0)?;
        self.verify_child_sorted(&right_props, &self.right_exprs, 1)?;
        self.key_fns()?;
        // output comes out ordered by the left join keys
        let mut ordered_columns = Vec::new();
        let mut ordered_asc = Vec::new();
        for (expr, asc) in self.left_exprs.iter().zip(self.orders_asc.iter()) {
            match left_props.column_in_output(expr, 0) {
                Some(column) => {
                    ordered_columns.push(column);
                    ordered_asc.push(*asc);
                }
                None => break,
            }
        }
        let unique_columns = joined_unique_columns(
            &left_props,
            &right_props,
            &self.left_exprs,
            &self.right_exprs,
        );
        Ok(CompiledProps {
            ordered_columns,
            ordered_asc,
            unique_columns,
            ..CompiledProps::from_inputs(&left_props, &right_props)
        })
    }

    fn estimate_props(&self) -> ExecResult<EstimatedProps> {
        let left_estimated = self.left.estimated()?;
        let right_estimated = self.right.estimated()?;
        let stats = self.ctx.stats.join_stats(
            &left_estimated.stats,
            &right_estimated.stats,
            self.left_exprs.len(),
        );
        Ok(EstimatedProps {
            stats,
            blocks: BlockIoStats {
                self_reads: 0,
                self_writes: 0,
                overall: left_estimated.blocks.overall + right_estimated.blocks.overall,
            },
            blocks_extra_init: None,
        })
    }

    fn execute(&self) -> ExecResult<RowStream<'_>> {
        let fns = self.key_fns()?;
        let cmp = key_comparator(self.orders_asc.clone());
        Ok(Box::new(MergeEqJoinStream {
            left: self.left.execute()?,
            right: self.right.execute()?,
            left_key: Arc::clone(&fns.left),
            right_key: Arc::clone(&fns.right),
            cmp,
            cur_left: None,
            cur_right: None,
            started: false,
            group_keys: None,
            right_group: Vec::new(),
            group_index: 0,
            done: false,
        }))
    }

    fn describe_more(&self) -> Vec<String> {
        self.left_exprs
            .iter()
            .zip(self.right_exprs.iter())
            .map(|(l, r)| format!("{l} = {r}"))
            .collect()
    }
}

struct MergeEqJoinStream<'a> {
    left: RowStream<'a>,
    right: RowStream<'a>,
    left_key: RowKeyFn,
    right_key: RowKeyFn,
    cmp: KeyCmp,
    cur_left: Option<(Vec<Value>, Row)>,
    cur_right: Option<(Vec<Value>, Row)>,
    started: bool,
    /// Key of the right duplicate group currently buffered.
    group_keys: Option<Vec<Value>>,
    right_group: Vec<Row>,
    group_index: usize,
    done: bool,
}

impl MergeEqJoinStream<'_> {
    fn advance_left(&mut self) -> ExecResult<()> {
        self.cur_left = match self.left.next().transpose()? {
            Some(row) => Some(((*self.left_key)(&row)?, row)),
            None => None,
        };
        Ok(())
    }

    fn advance_right(&mut self) -> ExecResult<()> {
        self.cur_right = match self.right.next().transpose()? {
            Some(row) => Some(((*self.right_key)(&row)?, row)),
            None => None,
        };
        Ok(())
    }

    fn next_row(&mut self) -> ExecResult<Option<Row>> {
        if !self.started {
            self.started = true;
            self.advance_left()?;
            self.advance_right()?;
        }
        loop {
            // drain the buffered right group against the current left row
            if let Some(group_keys) = &self.group_keys {
                match &self.cur_left {
                    Some((left_keys, left_row))
                        if (*self.cmp)(left_keys, group_keys) == Ordering::Equal =>
                    {
                        if self.group_index < self.right_group.len() {
                            let joined = left_row.concat(&self.right_group[self.group_index]);
                            self.group_index += 1;
                            return Ok(Some(joined));
                        }
                        self.group_index = 0;
                        self.advance_left()?;
                        continue;
                    }
                    _ => {
                        self.group_keys = None;
                        self.right_group.clear();
                        self.group_index = 0;
                    }
                }
            }
            let (Some((left_keys, _)), Some((right_keys, _))) = (&self.cur_left, &self.cur_right)
            else {
                return Ok(None);
            };
            match (*self.cmp)(left_keys, right_keys) {
                Ordering::Less => self.advance_left()?,
                Ordering::Greater => self.advance_right()?,
                Ordering::Equal => {
                    // buffer the whole right duplicate group for this key
                    let group_keys = right_keys.clone();
                    while let Some((keys, row)) = self.cur_right.take() {
                        if (*self.cmp)(&keys, &group_keys) == Ordering::Equal {
                            self.right_group.push(row);
                            self.advance_right()?;
                        } else {
                            self.cur_right = Some((keys, row));
                            break;
                        }
                    }
                    self.group_index = 0;
                    self.group_keys = Some(group_keys);
                }
            }
        }
    }
}

impl Iterator for MergeEqJoinStream<'_> {
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
