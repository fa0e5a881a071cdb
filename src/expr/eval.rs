//! Expression Compilation
//!
//! Lowers a validated `ValExpr` tree into an evaluator closure over one row
//! per input. Column references are resolved once, at compile time: named
//! references through the child operators' output lineage, relative
//! references positionally. The resulting closure only indexes into rows and
//! applies value operations.

use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;

use crate::metadata::OutputLineage;
use crate::value::{DataType, Row, Value};

use super::{BinaryOp, CompileError, CompileResult, UnaryOp, ValExpr};

/// Errors raised while evaluating a compiled expression against rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("row {input_index} has no column {column_index}")]
    ColumnOutOfRange {
        input_index: usize,
        column_index: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("runtime cast to {to} failed for value '{value}'")]
    CastFailed { to: DataType, value: String },

    #[error("cannot apply {op} to {left} and {right}")]
    InvalidOperands {
        op: &'static str,
        left: DataType,
        right: DataType,
    },
}

/// A compiled evaluator: given one row per input, produce a value.
pub type CompiledExpr = Arc<dyn Fn(&[&Row]) -> Result<Value, EvalError> + Send + Sync>;

/// Compile `expr` against the output lineages of the operator's children.
///
/// `lineages[i]` describes which qualified names resolve into input `i`; the
/// compiled closure expects exactly one row per input, in the same order.
pub fn compile_expr(expr: &ValExpr, lineages: &[&OutputLineage]) -> CompileResult<CompiledExpr> {
    match expr {
        ValExpr::Literal(v) => {
            let v = v.clone();
            Ok(Arc::new(move |_rows| Ok(v.clone())))
        }
        ValExpr::NamedColumn {
            table_alias,
            column_name,
            ..
        } => {
            let (input_index, column_index) =
                expr.as_column_ref(lineages)
                    .ok_or_else(|| CompileError::UnknownColumn {
                        alias: table_alias.clone(),
                        column: column_name.clone(),
                    })?;
            Ok(column_accessor(input_index, column_index))
        }
        ValExpr::RelativeColumn {
            input_index,
            column_index,
            ..
        } => Ok(column_accessor(*input_index, *column_index)),
        ValExpr::Unary { op, expr: inner } => {
            expr.datatype()?;
            let inner = compile_expr(inner, lineages)?;
            let op = *op;
            Ok(Arc::new(move |rows| apply_unary(op, (*inner)(rows)?)))
        }
        ValExpr::Binary { op, left, right } => {
            // surface type errors at compile time rather than first row
            expr.datatype()?;
            let left = compile_expr(left, lineages)?;
            let right = compile_expr(right, lineages)?;
            let op = *op;
            Ok(Arc::new(move |rows| {
                apply_binary(op, (*left)(rows)?, (*right)(rows)?)
            }))
        }
        ValExpr::Cast { expr: inner, target } => {
            expr.datatype()?;
            let compiled = compile_expr(inner, lineages)?;
            let target = *target;
            Ok(Arc::new(move |rows| {
                let v = (*compiled)(rows)?;
                v.cast_to(target).ok_or_else(|| EvalError::CastFailed {
                    to: target,
                    value: v.to_string(),
                })
            }))
        }
    }
}

/// Compile a list of expressions into a single key-extraction function that
/// evaluates all of them over one row.
pub fn compile_key_fn(
    exprs: &[ValExpr],
    lineages: &[&OutputLineage],
) -> CompileResult<Arc<dyn Fn(&Row) -> Result<Vec<Value>, EvalError> + Send + Sync>> {
    let compiled: Vec<CompiledExpr> = exprs
        .iter()
        .map(|e| compile_expr(e, lineages))
        .collect::<CompileResult<_>>()?;
    Ok(Arc::new(move |row| {
        let rows = [row];
        compiled.iter().map(|f| (**f)(&rows)).collect()
    }))
}

fn column_accessor(input_index: usize, column_index: usize) -> CompiledExpr {
    Arc::new(move |rows| {
        rows.get(input_index)
            .and_then(|row| row.get(column_index))
            .cloned()
            .ok_or(EvalError::ColumnOutOfRange {
                input_index,
                column_index,
            })
    })
}

fn apply_unary(op: UnaryOp, v: Value) -> Result<Value, EvalError> {
    match (op, v) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Neg, Value::Integer(i)) => Ok(Value::Integer(-i)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        (op, v) => Err(EvalError::InvalidOperands {
            op: match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "NOT",
            },
            left: v.datatype(),
            right: v.datatype(),
        }),
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    if op.is_comparison() {
        // nulls participate through the total order (null sorts first)
        let ord = left.cmp_total(&right);
        let result = match op {
            BinaryOp::Eq => ord == Ordering::Equal,
            BinaryOp::Ne => ord != Ordering::Equal,
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::Le => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            BinaryOp::Ge => ord != Ordering::Less,
            _ => unreachable!(),
        };
        return Ok(Value::Boolean(result));
    }
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    match op {
        BinaryOp::And | BinaryOp::Or => match (&left, &right) {
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(if op == BinaryOp::And {
                *a && *b
            } else {
                *a || *b
            })),
            _ => Err(invalid(op, &left, &right)),
        },
        BinaryOp::Concat => Ok(Value::Varchar(format!("{left}{right}"))),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            arithmetic(op, &left, &right)
        }
        _ => unreachable!(),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (numeric(left), numeric(right)) {
        (Some(Numeric::Int(a)), Some(Numeric::Int(b))) => match op {
            BinaryOp::Add => Ok(Value::Integer(a.wrapping_add(b))),
            BinaryOp::Sub => Ok(Value::Integer(a.wrapping_sub(b))),
            BinaryOp::Mul => Ok(Value::Integer(a.wrapping_mul(b))),
            BinaryOp::Div => {
                if b == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(Value::Integer(a / b))
                }
            }
            _ => unreachable!(),
        },
        (Some(a), Some(b)) => {
            let (a, b) = (a.as_float(), b.as_float());
            match op {
                BinaryOp::Add => Ok(Value::Float(a + b)),
                BinaryOp::Sub => Ok(Value::Float(a - b)),
                BinaryOp::Mul => Ok(Value::Float(a * b)),
                BinaryOp::Div => {
                    if b == 0.0 {
                        Err(EvalError::DivisionByZero)
                    } else {
                        Ok(Value::Float(a / b))
                    }
                }
                _ => unreachable!(),
            }
        }
        _ => Err(invalid(op, left, right)),
    }
}

enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    fn as_float(&self) -> f64 {
        match self {
            Numeric::Int(i) => *i as f64,
            Numeric::Float(f) => *f,
        }
    }
}

fn numeric(v: &Value) -> Option<Numeric> {
    match v {
        Value::Integer(i) => Some(Numeric::Int(*i)),
        Value::Float(f) => Some(Numeric::Float(*f)),
        Value::Boolean(b) => Some(Numeric::Int(i64::from(*b))),
        _ => None,
    }
}

fn invalid(op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::InvalidOperands {
        op: match op {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Concat => "||",
            _ => "?",
        },
        left: left.datatype(),
        right: right.datatype(),
    }
}
