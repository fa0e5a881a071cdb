//! Executor Error Types
//!
//! Three categories surface to callers:
//! - configuration errors, raised by operator constructors (illegal memory
//!   budget, incompatible inputs);
//! - compile errors, raised on first access to compiled properties;
//! - execution errors, raised from the row stream and aborting the pipeline.

use thiserror::Error;

use crate::expr::{CompileError, EvalError};
use crate::storage::StorageError;

/// Errors raised while constructing, compiling, or executing a physical plan.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Operator constructed with an illegal configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Expression could not be type-checked or lowered.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// A single row exceeds the buffer byte budget.
    #[error("row of {size} bytes does not fit in {blocks} memory block(s) ({budget} bytes)")]
    RowTooLarge {
        size: usize,
        blocks: usize,
        budget: usize,
    },

    /// Expression evaluation failed at run time.
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Storage layer failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A referenced base table is missing from the catalog.
    #[error("unknown table '{0}'")]
    UnknownTable(String),
}

/// Result type for executor operations.
pub type ExecResult<T> = Result<T, ExecutorError>;
