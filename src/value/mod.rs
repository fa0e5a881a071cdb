//! # Value Type System
//!
//! Core atomic value types: Datetime, Float, Integer, Boolean, Varchar, plus
//! Null. Rows are arbitrary-arity tuples of values with schema-based size
//! estimation, which is what the block-budgeted buffers account against.
//!
//! ## Usage
//!
//! ```rust
//! use rowboat::value::{DataType, Row, Value};
//!
//! let row = Row::new(vec![
//!     Value::Integer(1),
//!     Value::Varchar("hello".into()),
//!     Value::Float(3.14),
//! ]);
//! assert_eq!(row.arity(), 3);
//! assert!(DataType::Integer.implicitly_casts_to(DataType::Float));
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Data types supported by the engine.
///
/// The declaration order reflects type precedence: when an operator combines
/// expressions of different types, the operand whose type has lower precedence
/// is converted to the higher-precedence type (assuming an implicit cast is
/// possible).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Datetime,
    Float,
    Integer,
    Boolean,
    Varchar,
    /// Wildcard type used for untyped temp-file schemas and NULL literals.
    Any,
}

impl DataType {
    /// Check if a value of this type can be implicitly cast to `other`.
    pub fn implicitly_casts_to(self, other: DataType) -> bool {
        if self == other || other == DataType::Any {
            return true;
        }
        matches!(
            (self, other),
            (DataType::Boolean, DataType::Integer | DataType::Float)
                | (DataType::Integer, DataType::Float)
                | (DataType::Varchar, DataType::Datetime)
                | (DataType::Datetime, DataType::Varchar)
        )
    }

    /// Check if a value of this type can be explicitly cast to `other`.
    pub fn can_cast_to(self, other: DataType) -> bool {
        self.implicitly_casts_to(other)
            || self == DataType::Any
            || other == DataType::Varchar
            || (self == DataType::Float && other == DataType::Integer)
    }

    /// The higher-precedence type among `self` and `other`, provided the
    /// lower-precedence one implicitly casts to it.
    pub fn unify(self, other: DataType) -> Option<DataType> {
        let (hi, lo) = if self <= other { (self, other) } else { (other, self) };
        if lo.implicitly_casts_to(hi) {
            Some(hi)
        } else {
            None
        }
    }

    /// Approximate in-memory footprint in bytes of one value of this type.
    ///
    /// Variable-length types report a base cost only; `Value::estimated_size`
    /// adds the actual payload length for Varchar.
    pub fn footprint(self) -> usize {
        match self {
            DataType::Datetime => 12,
            DataType::Float | DataType::Integer => 8,
            DataType::Boolean => 1,
            DataType::Varchar => 24,
            DataType::Any => 16,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Datetime => "DATETIME",
            DataType::Float => "FLOAT",
            DataType::Integer => "INTEGER",
            DataType::Boolean => "BOOLEAN",
            DataType::Varchar => "VARCHAR",
            DataType::Any => "ANY",
        };
        write!(f, "{name}")
    }
}

/// The datetime text format accepted and produced by VARCHAR casts.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single atomic value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Datetime(NaiveDateTime),
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Varchar(String),
    Null,
}

impl Value {
    /// The data type of this value; `Null` reports `Any`.
    pub fn datatype(&self) -> DataType {
        match self {
            Value::Datetime(_) => DataType::Datetime,
            Value::Float(_) => DataType::Float,
            Value::Integer(_) => DataType::Integer,
            Value::Boolean(_) => DataType::Boolean,
            Value::Varchar(_) => DataType::Varchar,
            Value::Null => DataType::Any,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Approximate in-memory footprint of this value in bytes.
    pub fn estimated_size(&self) -> usize {
        match self {
            Value::Varchar(s) => DataType::Varchar.footprint() + s.len(),
            Value::Null => 1,
            other => other.datatype().footprint(),
        }
    }

    /// Cast this value to the target type. Returns `None` when the cast is
    /// unsupported or the payload does not parse.
    pub fn cast_to(&self, target: DataType) -> Option<Value> {
        if self.datatype() == target || target == DataType::Any {
            return Some(self.clone());
        }
        match (self, target) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Boolean(b), DataType::Integer) => Some(Value::Integer(i64::from(*b))),
            (Value::Boolean(b), DataType::Float) => Some(Value::Float(f64::from(u8::from(*b)))),
            (Value::Integer(i), DataType::Float) => Some(Value::Float(*i as f64)),
            (Value::Float(f), DataType::Integer) => Some(Value::Integer(*f as i64)),
            (Value::Varchar(s), DataType::Datetime) => {
                NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
                    .ok()
                    .map(Value::Datetime)
            }
            (v, DataType::Varchar) => Some(Value::Varchar(v.to_string())),
            _ => None,
        }
    }

    /// Truthiness for filter predicates: `Boolean(true)` only.
    pub fn is_truthy(&self) -> bool {
        matches!(self, Value::Boolean(true))
    }

    /// Total ordering across values.
    ///
    /// Nulls sort first; numeric values compare after promotion to float.
    /// Values of incomparable types fall back to type-precedence order so the
    /// ordering stays total (validated plans never compare across types).
    pub fn cmp_total(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            (Value::Datetime(a), Value::Datetime(b)) => a.cmp(b),
            (a, b) => a.datatype().cmp(&b.datatype()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_total(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Datetime(dt) => {
                state.write_u8(0);
                dt.hash(state);
            }
            // integers hash through their float image so that 2 and 2.0,
            // which compare equal, also hash equal
            Value::Float(f) => {
                state.write_u8(1);
                state.write_u64(f.to_bits());
            }
            Value::Integer(i) => {
                state.write_u8(1);
                state.write_u64((*i as f64).to_bits());
            }
            Value::Boolean(b) => {
                state.write_u8(2);
                state.write_u8(u8::from(*b));
            }
            Value::Varchar(s) => {
                state.write_u8(3);
                s.hash(state);
            }
            Value::Null => state.write_u8(4),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Datetime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::Float(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Varchar(v) => write!(f, "{v}"),
            Value::Null => write!(f, "NULL"),
        }
    }
}

/// A row: an ordered tuple of atomic values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    pub fn empty() -> Self {
        Row { values: Vec::new() }
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Concatenate two rows, left values first.
    pub fn concat(&self, other: &Row) -> Row {
        let mut values = Vec::with_capacity(self.values.len() + other.values.len());
        values.extend_from_slice(&self.values);
        values.extend_from_slice(&other.values);
        Row { values }
    }

    /// Approximate in-memory footprint of this row in bytes.
    pub fn estimated_size(&self) -> usize {
        // small fixed overhead for the tuple allocation itself
        24 + self.values.iter().map(Value::estimated_size).sum::<usize>()
    }

    /// Lexicographic total ordering over the value tuple.
    pub fn cmp_total(&self, other: &Row) -> Ordering {
        for (a, b) in self.values.iter().zip(other.values.iter()) {
            match a.cmp_total(b) {
                Ordering::Equal => {}
                non_eq => return non_eq,
            }
        }
        self.values.len().cmp(&other.values.len())
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_precedence_order() {
        assert!(DataType::Datetime < DataType::Float);
        assert!(DataType::Float < DataType::Integer);
        assert!(DataType::Integer < DataType::Boolean);
        assert!(DataType::Boolean < DataType::Varchar);
        assert!(DataType::Varchar < DataType::Any);
    }

    #[test]
    fn test_implicit_casts() {
        assert!(DataType::Boolean.implicitly_casts_to(DataType::Integer));
        assert!(DataType::Boolean.implicitly_casts_to(DataType::Float));
        assert!(DataType::Integer.implicitly_casts_to(DataType::Float));
        assert!(DataType::Varchar.implicitly_casts_to(DataType::Datetime));
        assert!(DataType::Datetime.implicitly_casts_to(DataType::Varchar));
        assert!(!DataType::Float.implicitly_casts_to(DataType::Integer));
        assert!(!DataType::Integer.implicitly_casts_to(DataType::Boolean));
    }

    #[test]
    fn test_explicit_casts() {
        assert!(DataType::Float.can_cast_to(DataType::Integer));
        assert!(DataType::Integer.can_cast_to(DataType::Varchar));
        assert!(DataType::Any.can_cast_to(DataType::Boolean));
        assert!(!DataType::Boolean.can_cast_to(DataType::Datetime));
    }

    #[test]
    fn test_unify_picks_higher_precedence() {
        assert_eq!(DataType::Integer.unify(DataType::Float), Some(DataType::Float));
        assert_eq!(DataType::Boolean.unify(DataType::Integer), Some(DataType::Integer));
        assert_eq!(DataType::Varchar.unify(DataType::Integer), None);
    }

    #[test]
    fn test_numeric_comparison_promotes() {
        assert_eq!(Value::Integer(2).cmp_total(&Value::Float(2.0)), Ordering::Equal);
        assert_eq!(Value::Integer(3).cmp_total(&Value::Float(2.5)), Ordering::Greater);
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(Value::Null.cmp_total(&Value::Integer(i64::MIN)), Ordering::Less);
    }

    #[test]
    fn test_varchar_datetime_cast_roundtrip() {
        let v = Value::Varchar("2024-05-01 12:30:00".to_string());
        let dt = v.cast_to(DataType::Datetime).expect("parses");
        assert_eq!(dt.datatype(), DataType::Datetime);
        let back = dt.cast_to(DataType::Varchar).expect("formats");
        assert_eq!(back, v);
    }

    #[test]
    fn test_row_size_counts_varchar_payload() {
        let short = Row::new(vec![Value::Varchar("a".into())]);
        let long = Row::new(vec![Value::Varchar("a".repeat(100))]);
        assert!(long.estimated_size() > short.estimated_size() + 90);
    }

    #[test]
    fn test_row_concat() {
        let left = Row::new(vec![Value::Integer(1)]);
        let right = Row::new(vec![Value::Integer(2), Value::Integer(3)]);
        let joined = left.concat(&right);
        assert_eq!(joined.arity(), 3);
        assert_eq!(joined.get(2), Some(&Value::Integer(3)));
    }
}
