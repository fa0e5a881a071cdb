//! Aggregate Function Descriptors
//!
//! Each aggregate declares whether it is incremental (state can be updated
//! per input row) and whether it is DISTINCT, plus the init/add/finalize
//! state machine the aggregation operator drives. Non-incremental aggregates
//! (MEDIAN, and every DISTINCT variant) have their inputs routed through an
//! external sort buffer by the operator; `add` then sees the group's values
//! in sorted, optionally deduplicated, order.

use std::fmt;

use crate::value::{DataType, Value};

use super::{CompileError, CompileResult, ValExpr};

/// The aggregate functions the engine computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggrFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Median,
}

impl AggrFunc {
    fn name(self) -> &'static str {
        match self {
            AggrFunc::Count => "COUNT",
            AggrFunc::Sum => "SUM",
            AggrFunc::Avg => "AVG",
            AggrFunc::Min => "MIN",
            AggrFunc::Max => "MAX",
            AggrFunc::Median => "MEDIAN",
        }
    }
}

/// Running state for one aggregate within one group.
#[derive(Debug, Clone)]
pub enum AggrState {
    Count(i64),
    Sum(Option<Value>),
    Avg { sum: f64, count: i64 },
    Extreme(Option<Value>),
    Collect(Vec<Value>),
}

/// An aggregate expression: function, DISTINCT flag, and the input
/// expression evaluated over each row of the group.
#[derive(Debug, Clone, PartialEq)]
pub struct AggrExpr {
    pub func: AggrFunc,
    pub distinct: bool,
    pub input: Box<ValExpr>,
}

impl AggrExpr {
    pub fn new(func: AggrFunc, input: ValExpr) -> Self {
        AggrExpr {
            func,
            distinct: false,
            input: Box::new(input),
        }
    }

    pub fn new_distinct(func: AggrFunc, input: ValExpr) -> Self {
        AggrExpr {
            func,
            distinct: true,
            input: Box::new(input),
        }
    }

    /// COUNT(*): counts every row of the group.
    pub fn count_star() -> Self {
        AggrExpr::new(AggrFunc::Count, ValExpr::literal(Value::Integer(1)))
    }

    /// Whether the state can be updated online, one input at a time, without
    /// the whole group in hand. DISTINCT always disqualifies: deduplication
    /// needs the group's values sorted first.
    pub fn is_incremental(&self) -> bool {
        !self.distinct && self.func != AggrFunc::Median
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Result type of the aggregate.
    pub fn datatype(&self) -> CompileResult<DataType> {
        let input = self.input.datatype()?;
        match self.func {
            AggrFunc::Count => Ok(DataType::Integer),
            AggrFunc::Avg => Ok(DataType::Float),
            AggrFunc::Sum => {
                if matches!(input, DataType::Integer | DataType::Float | DataType::Boolean) {
                    Ok(if input == DataType::Float {
                        DataType::Float
                    } else {
                        DataType::Integer
                    })
                } else {
                    Err(CompileError::Unsupported(format!(
                        "SUM over {input} is not defined"
                    )))
                }
            }
            AggrFunc::Min | AggrFunc::Max | AggrFunc::Median => Ok(input),
        }
    }

    /// Initial state for a fresh group.
    pub fn init(&self) -> AggrState {
        match self.func {
            AggrFunc::Count => AggrState::Count(0),
            AggrFunc::Sum => AggrState::Sum(None),
            AggrFunc::Avg => AggrState::Avg { sum: 0.0, count: 0 },
            AggrFunc::Min | AggrFunc::Max => AggrState::Extreme(None),
            AggrFunc::Median => AggrState::Collect(Vec::new()),
        }
    }

    /// Fold one input value into the state. Null inputs are skipped, except
    /// by COUNT over a non-null literal (COUNT(*)) which never sees them.
    pub fn add(&self, state: &mut AggrState, value: &Value) {
        if value.is_null() {
            return;
        }
        match (state, self.func) {
            (AggrState::Count(n), AggrFunc::Count) => *n += 1,
            (AggrState::Sum(acc), AggrFunc::Sum) => {
                *acc = Some(match acc.take() {
                    None => value.clone(),
                    Some(prev) => add_values(&prev, value),
                });
            }
            (AggrState::Avg { sum, count }, AggrFunc::Avg) => {
                if let Some(f) = value_as_float(value) {
                    *sum += f;
                    *count += 1;
                }
            }
            (AggrState::Extreme(acc), AggrFunc::Min) => {
                let replace = acc
                    .as_ref()
                    .map(|cur| value.cmp_total(cur) == std::cmp::Ordering::Less)
                    .unwrap_or(true);
                if replace {
                    *acc = Some(value.clone());
                }
            }
            (AggrState::Extreme(acc), AggrFunc::Max) => {
                let replace = acc
                    .as_ref()
                    .map(|cur| value.cmp_total(cur) == std::cmp::Ordering::Greater)
                    .unwrap_or(true);
                if replace {
                    *acc = Some(value.clone());
                }
            }
            (AggrState::Collect(values), AggrFunc::Median) => values.push(value.clone()),
            // state enum always matches the function that created it
            _ => unreachable!("aggregate state does not match function"),
        }
    }

    /// Produce the final value for the group.
    pub fn finalize(&self, state: AggrState) -> Value {
        match state {
            AggrState::Count(n) => Value::Integer(n),
            AggrState::Sum(acc) => acc.unwrap_or(Value::Null),
            AggrState::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Float(sum / count as f64)
                }
            }
            AggrState::Extreme(acc) => acc.unwrap_or(Value::Null),
            AggrState::Collect(values) => {
                if values.is_empty() {
                    Value::Null
                } else {
                    // values arrive sorted from the external sort buffer;
                    // lower-middle keeps the output type equal to the input type
                    values[(values.len() - 1) / 2].clone()
                }
            }
        }
    }
}

impl fmt::Display for AggrExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}{})",
            self.func.name(),
            if self.distinct { "DISTINCT " } else { "" },
            self.input
        )
    }
}

fn add_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Value::Integer(x.wrapping_add(*y)),
        (x, y) => match (value_as_float(x), value_as_float(y)) {
            (Some(x), Some(y)) => Value::Float(x + y),
            _ => Value::Null,
        },
    }
}

fn value_as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Boolean(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DataType;

    fn run(aggr: &AggrExpr, values: &[Value]) -> Value {
        let mut state = aggr.init();
        for v in values {
            aggr.add(&mut state, v);
        }
        aggr.finalize(state)
    }

    #[test]
    fn test_incrementality_classification() {
        let col = ValExpr::relative(0, 0, DataType::Integer);
        assert!(AggrExpr::new(AggrFunc::Sum, col.clone()).is_incremental());
        assert!(AggrExpr::new(AggrFunc::Count, col.clone()).is_incremental());
        assert!(!AggrExpr::new(AggrFunc::Median, col.clone()).is_incremental());
        assert!(!AggrExpr::new_distinct(AggrFunc::Count, col).is_incremental());
    }

    #[test]
    fn test_sum_over_empty_is_null() {
        let aggr = AggrExpr::new(AggrFunc::Sum, ValExpr::relative(0, 0, DataType::Integer));
        assert_eq!(run(&aggr, &[]), Value::Null);
    }

    #[test]
    fn test_count_star_over_empty_is_zero() {
        let aggr = AggrExpr::count_star();
        assert_eq!(run(&aggr, &[]), Value::Integer(0));
    }

    #[test]
    fn test_sum_and_avg() {
        let col = ValExpr::relative(0, 0, DataType::Integer);
        let sum = AggrExpr::new(AggrFunc::Sum, col.clone());
        let avg = AggrExpr::new(AggrFunc::Avg, col);
        let values: Vec<Value> = [10, 20, 30].iter().map(|v| Value::Integer(*v)).collect();
        assert_eq!(run(&sum, &values), Value::Integer(60));
        assert_eq!(run(&avg, &values), Value::Float(20.0));
    }

    #[test]
    fn test_min_max_skip_nulls() {
        let col = ValExpr::relative(0, 0, DataType::Integer);
        let min = AggrExpr::new(AggrFunc::Min, col.clone());
        let max = AggrExpr::new(AggrFunc::Max, col);
        let values = vec![Value::Null, Value::Integer(5), Value::Integer(2)];
        assert_eq!(run(&min, &values), Value::Integer(2));
        assert_eq!(run(&max, &values), Value::Integer(5));
    }

    #[test]
    fn test_median_lower_middle() {
        let col = ValExpr::relative(0, 0, DataType::Integer);
        let median = AggrExpr::new(AggrFunc::Median, col);
        // sorted inputs, as the sort buffer would deliver them
        let odd: Vec<Value> = [1, 2, 3].iter().map(|v| Value::Integer(*v)).collect();
        let even: Vec<Value> = [1, 2, 3, 4].iter().map(|v| Value::Integer(*v)).collect();
        assert_eq!(run(&median, &odd), Value::Integer(2));
        assert_eq!(run(&median, &even), Value::Integer(2));
    }

    #[test]
    fn test_result_types() {
        let int_col = ValExpr::relative(0, 0, DataType::Integer);
        assert_eq!(
            AggrExpr::new(AggrFunc::Count, int_col.clone()).datatype(),
            Ok(DataType::Integer)
        );
        assert_eq!(
            AggrExpr::new(AggrFunc::Avg, int_col.clone()).datatype(),
            Ok(DataType::Float)
        );
        assert_eq!(
            AggrExpr::new(AggrFunc::Median, int_col).datatype(),
            Ok(DataType::Integer)
        );
    }
}
