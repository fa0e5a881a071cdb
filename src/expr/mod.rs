//! # Value Expressions
//!
//! Typed expression trees over row values, as handed to the physical
//! operators by the validator. The tree itself is plain data; `eval` lowers
//! it into evaluator closures at operator-compile time, and `aggregate`
//! describes the aggregate functions layered on top.
//!
//! Column references come in two forms: `NamedColumn` (qualified
//! `alias.column`, resolved through the child operator's output lineage at
//! compile time) and `RelativeColumn` (`(input_index, column_index)`,
//! resolved positionally).

pub mod aggregate;
pub mod eval;

pub use aggregate::{AggrExpr, AggrFunc, AggrState};
pub use eval::{compile_expr, CompiledExpr, EvalError};

use std::fmt;
use thiserror::Error;

use crate::metadata::{find_column_in_lineage, OutputLineage};
use crate::value::{DataType, Value};

/// Errors raised while type-checking or lowering expressions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("column {alias}.{column} cannot be resolved against any input")]
    UnknownColumn { alias: String, column: String },

    #[error("relative column reference (input {input_index}, column {column_index}) is out of range")]
    ColumnOutOfRange {
        input_index: usize,
        column_index: usize,
    },

    #[error("operator {op} cannot combine {left} and {right}")]
    TypeMismatch {
        op: String,
        left: DataType,
        right: DataType,
    },

    #[error("cannot cast {from} to {to}")]
    UnsupportedCast { from: DataType, to: DataType },

    #[error("{0}")]
    Unsupported(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Concat,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Concat => "||",
        }
    }
}

/// A validated expression over one or more input rows.
#[derive(Debug, Clone, PartialEq)]
pub enum ValExpr {
    Literal(Value),
    NamedColumn {
        table_alias: String,
        column_name: String,
        datatype: DataType,
    },
    RelativeColumn {
        input_index: usize,
        column_index: usize,
        datatype: DataType,
    },
    Unary {
        op: UnaryOp,
        expr: Box<ValExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<ValExpr>,
        right: Box<ValExpr>,
    },
    Cast {
        expr: Box<ValExpr>,
        target: DataType,
    },
}

impl ValExpr {
    /// Qualified column reference.
    pub fn column(table_alias: &str, column_name: &str, datatype: DataType) -> ValExpr {
        ValExpr::NamedColumn {
            table_alias: table_alias.to_string(),
            column_name: column_name.to_string(),
            datatype,
        }
    }

    /// Positional column reference against input `input_index`.
    pub fn relative(input_index: usize, column_index: usize, datatype: DataType) -> ValExpr {
        ValExpr::RelativeColumn {
            input_index,
            column_index,
            datatype,
        }
    }

    pub fn literal(value: Value) -> ValExpr {
        ValExpr::Literal(value)
    }

    pub fn binary(op: BinaryOp, left: ValExpr, right: ValExpr) -> ValExpr {
        ValExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: ValExpr, right: ValExpr) -> ValExpr {
        ValExpr::binary(BinaryOp::Eq, left, right)
    }

    /// The static type of this expression.
    pub fn datatype(&self) -> CompileResult<DataType> {
        match self {
            ValExpr::Literal(v) => Ok(v.datatype()),
            ValExpr::NamedColumn { datatype, .. } | ValExpr::RelativeColumn { datatype, .. } => {
                Ok(*datatype)
            }
            ValExpr::Unary { op, expr } => {
                let inner = expr.datatype()?;
                match op {
                    UnaryOp::Neg if matches!(inner, DataType::Integer | DataType::Float) => {
                        Ok(inner)
                    }
                    UnaryOp::Not if inner == DataType::Boolean => Ok(DataType::Boolean),
                    _ => Err(CompileError::TypeMismatch {
                        op: format!("{op:?}"),
                        left: inner,
                        right: inner,
                    }),
                }
            }
            ValExpr::Binary { op, left, right } => {
                let (lt, rt) = (left.datatype()?, right.datatype()?);
                if op.is_comparison() {
                    if lt.unify(rt).is_none() {
                        return Err(CompileError::TypeMismatch {
                            op: op.symbol().to_string(),
                            left: lt,
                            right: rt,
                        });
                    }
                    return Ok(DataType::Boolean);
                }
                match op {
                    BinaryOp::And | BinaryOp::Or => {
                        if lt == DataType::Boolean && rt == DataType::Boolean {
                            Ok(DataType::Boolean)
                        } else {
                            Err(CompileError::TypeMismatch {
                                op: op.symbol().to_string(),
                                left: lt,
                                right: rt,
                            })
                        }
                    }
                    BinaryOp::Concat => Ok(DataType::Varchar),
                    _ => {
                        // arithmetic: unify to the higher-precedence numeric type
                        let unified = lt.unify(rt).ok_or(CompileError::TypeMismatch {
                            op: op.symbol().to_string(),
                            left: lt,
                            right: rt,
                        })?;
                        if matches!(unified, DataType::Integer | DataType::Float) {
                            Ok(unified)
                        } else {
                            Err(CompileError::TypeMismatch {
                                op: op.symbol().to_string(),
                                left: lt,
                                right: rt,
                            })
                        }
                    }
                }
            }
            ValExpr::Cast { expr, target } => {
                let from = expr.datatype()?;
                if from.can_cast_to(*target) {
                    Ok(*target)
                } else {
                    Err(CompileError::UnsupportedCast { from, to: *target })
                }
            }
        }
    }

    /// Child expressions, in evaluation order.
    pub fn children(&self) -> Vec<&ValExpr> {
        match self {
            ValExpr::Literal(_) | ValExpr::NamedColumn { .. } | ValExpr::RelativeColumn { .. } => {
                Vec::new()
            }
            ValExpr::Unary { expr, .. } | ValExpr::Cast { expr, .. } => vec![expr],
            ValExpr::Binary { left, right, .. } => vec![left, right],
        }
    }

    /// If this expression is a bare column reference, resolve it to an
    /// `(input_index, column_index)` pair against the given child lineages.
    pub fn as_column_ref(&self, lineages: &[&OutputLineage]) -> Option<(usize, usize)> {
        match self {
            ValExpr::RelativeColumn {
                input_index,
                column_index,
                ..
            } => Some((*input_index, *column_index)),
            ValExpr::NamedColumn {
                table_alias,
                column_name,
                ..
            } => lineages.iter().enumerate().find_map(|(i, lineage)| {
                find_column_in_lineage(table_alias, column_name, lineage).map(|c| (i, c))
            }),
            _ => None,
        }
    }

    /// Whether any column reference occurs in this expression's subtree.
    pub fn references_columns(&self) -> bool {
        match self {
            ValExpr::NamedColumn { .. } | ValExpr::RelativeColumn { .. } => true,
            other => other.children().iter().any(|c| c.references_columns()),
        }
    }

    /// Decompose into conjunctive parts; a non-AND expression is returned
    /// whole.
    pub fn conjunctive_parts(&self) -> Vec<&ValExpr> {
        match self {
            ValExpr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut parts = left.conjunctive_parts();
                parts.extend(right.conjunctive_parts());
                parts
            }
            other => vec![other],
        }
    }
}

impl fmt::Display for ValExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValExpr::Literal(v) => match v {
                Value::Varchar(s) => write!(f, "'{s}'"),
                other => write!(f, "{other}"),
            },
            ValExpr::NamedColumn {
                table_alias,
                column_name,
                ..
            } => write!(f, "{table_alias}.{column_name}"),
            ValExpr::RelativeColumn {
                input_index,
                column_index,
                ..
            } => write!(f, "#{input_index}.{column_index}"),
            ValExpr::Unary { op, expr } => match op {
                UnaryOp::Neg => write!(f, "-({expr})"),
                UnaryOp::Not => write!(f, "NOT ({expr})"),
            },
            ValExpr::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            ValExpr::Cast { expr, target } => write!(f, "CAST({expr} AS {target})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_type_unification() {
        let e = ValExpr::binary(
            BinaryOp::Add,
            ValExpr::relative(0, 0, DataType::Integer),
            ValExpr::literal(Value::Float(1.5)),
        );
        assert_eq!(e.datatype(), Ok(DataType::Float));
    }

    #[test]
    fn test_comparison_yields_boolean() {
        let e = ValExpr::eq(
            ValExpr::relative(0, 0, DataType::Integer),
            ValExpr::literal(Value::Integer(3)),
        );
        assert_eq!(e.datatype(), Ok(DataType::Boolean));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let e = ValExpr::binary(
            BinaryOp::Add,
            ValExpr::relative(0, 0, DataType::Varchar),
            ValExpr::literal(Value::Integer(3)),
        );
        assert!(matches!(e.datatype(), Err(CompileError::TypeMismatch { .. })));
    }

    #[test]
    fn test_conjunctive_parts() {
        let a = ValExpr::eq(
            ValExpr::relative(0, 0, DataType::Integer),
            ValExpr::literal(Value::Integer(1)),
        );
        let b = ValExpr::eq(
            ValExpr::relative(0, 1, DataType::Integer),
            ValExpr::literal(Value::Integer(2)),
        );
        let both = ValExpr::binary(BinaryOp::And, a.clone(), b.clone());
        let parts = both.conjunctive_parts();
        assert_eq!(parts, vec![&a, &b]);
    }

    #[test]
    fn test_display() {
        let e = ValExpr::eq(
            ValExpr::column("r", "a", DataType::Integer),
            ValExpr::literal(Value::Integer(3)),
        );
        assert_eq!(e.to_string(), "(r.a = 3)");
    }
}
