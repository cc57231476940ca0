//! Public error types.
//!
//! `CompileError` covers everything `compile()` can reject (bad syntax,
//! malformed macros, non-lowerable shapes); `CelError` is the single error
//! kind `evaluate()` surfaces when the expression's result is the error
//! sentinel. The sentinel itself never escapes the runtime.

use thiserror::Error;

use crate::eval::{EvalError, EvalErrorKind};
use crate::lower::LowerError;

/// Compilation failure.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// Invalid syntax, bad literal, or malformed macro.
    #[error("parse error: {0}")]
    Parse(#[from] cel_compile_parser::ParseError),

    /// The parsed expression cannot be lowered to IR.
    #[error("compile error: {0}")]
    Lower(#[from] LowerError),
}

/// Runtime evaluation failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CelError {
    /// Human-readable message.
    pub message: String,
    /// The originating error category.
    pub kind: EvalErrorKind,
}

impl From<&EvalError> for CelError {
    fn from(e: &EvalError) -> Self {
        Self {
            message: e.message.clone(),
            kind: e.kind,
        }
    }
}
