//! Join Operators
//!
//! Shared helpers for the binary join operators: per-side key extraction
//! (join key expressions compile against both children, then evaluate over a
//! single side's row) and the uniqueness inference common to equi-joins.

pub mod bnl;
pub mod hash;
pub mod merge;

use std::collections::HashSet;
use std::sync::Arc;

use crate::expr::eval::{compile_expr, CompiledExpr};
use crate::expr::{CompileResult, ValExpr};
use crate::metadata::OutputLineage;
use crate::value::Row;

use super::util::RowKeyFn;
use super::CompiledProps;

/// Which input of a binary join a key function evaluates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    pub(crate) fn label(self) -> &'static str {
        match self {
            JoinSide::Left => "left",
            JoinSide::Right => "right",
        }
    }
}

/// Compile join-key expressions into a key extractor over one side's rows.
///
/// The expressions are compiled against both children's lineages (relative
/// references use input 0 for left, 1 for right); the returned function
/// fills the other side's slot with an empty row.
pub(crate) fn side_key_fn(
    exprs: &[ValExpr],
    left_lineage: &OutputLineage,
    right_lineage: &OutputLineage,
    side: JoinSide,
) -> CompileResult<RowKeyFn> {
    let compiled: Vec<CompiledExpr> = exprs
        .iter()
        .map(|e| compile_expr(e, &[left_lineage, right_lineage]))
        .collect::<CompileResult<_>>()?;
    Ok(Arc::new(move |row: &Row| {
        let empty = Row::empty();
        let rows = match side {
            JoinSide::Left => [row, &empty],
            JoinSide::Right => [&empty, row],
        };
        compiled.iter().map(|f| (**f)(&rows)).collect()
    }))
}

/// Uniqueness through an equi-join: if some join-key pair is unique on both
/// sides, every unique column of both inputs stays unique (each row matches
/// at most one partner); right-side indices shift past the left width.
/// Otherwise nothing is guaranteed.
pub(crate) fn joined_unique_columns(
    left_props: &CompiledProps,
    right_props: &CompiledProps,
    left_exprs: &[ValExpr],
    right_exprs: &[ValExpr],
) -> HashSet<usize> {
    let offset = left_props.output_metadata.arity();
    let some_pair_unique = left_exprs.iter().zip(right_exprs.iter()).any(|(l, r)| {
        let left_unique = left_props
            .column_in_output(l, 0)
            .is_some_and(|c| left_props.unique_columns.contains(&c));
        let right_unique = right_props
            .column_in_output(r, 1)
            .is_some_and(|c| right_props.unique_columns.contains(&c));
        left_unique && right_unique
    });
    if !some_pair_unique {
        return HashSet::new();
    }
    let mut unique: HashSet<usize> = left_props.unique_columns.clone();
    unique.extend(right_props.unique_columns.iter().map(|c| c + offset));
    unique
}
