//! Errors raised while compiling a function body
//!
//! Every variant carries the source line of the offending node. An error
//! aborts the whole function's compilation; partially emitted opcodes may be
//! inspected for debugging but must never be executed.

use thiserror::Error;

use crate::program::DataType;

/// Errors raised by the backend function compiler.
///
/// The optimizer and the runtime dispatcher never produce errors on
/// well-formed input; everything that can go wrong with valid frontend
/// output surfaces here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    /// `return expr` inside a function declared `void`
    #[error("function '{name}' with void return type cannot return a value (line {line})")]
    VoidFunctionReturnsValue {
        /// Function name
        name: String,
        /// Source line of the return statement
        line: u32,
    },

    /// `return` without an expression inside a non-void function
    #[error("function '{name}' must return a {return_type} value (line {line})")]
    NonVoidFunctionMissingReturn {
        /// Function name
        name: String,
        /// Declared return type
        return_type: DataType,
        /// Source line of the return statement or function end
        line: u32,
    },

    /// No supported conversion between the requested types
    #[error("cannot cast from {from_type} to {target} (line {line})")]
    InvalidCast {
        /// Type of the value
        from_type: DataType,
        /// Requested type
        target: DataType,
        /// Source line of the cast
        line: u32,
    },

    /// A jump names a label that is not defined in the function
    #[error("jump target label '{label}' not found (line {line})")]
    UnknownLabel {
        /// Label name
        label: String,
        /// Source line of the jump
        line: u32,
    },

    /// Two labels share a name
    #[error("label '{label}' is defined more than once (line {line})")]
    DuplicateLabel {
        /// Label name
        label: String,
        /// Source line of the second definition
        line: u32,
    },

    /// Two local variables share a name
    #[error("variable '{name}' already exists (line {line})")]
    DuplicateVariable {
        /// Variable name
        name: String,
        /// Source line of the second definition
        line: u32,
    },

    /// `break` outside a while or for loop
    #[error("keyword 'break' is only allowed inside a while or for loop (line {line})")]
    BreakOutsideLoop {
        /// Source line
        line: u32,
    },

    /// `continue` outside a while or for loop
    #[error("keyword 'continue' is only allowed inside a while or for loop (line {line})")]
    ContinueOutsideLoop {
        /// Source line
        line: u32,
    },

    /// External call or jump without an address expression
    #[error("call/jump must have an integer argument (line {line})")]
    MissingIndex {
        /// Source line
        line: u32,
    },

    /// Write requested for an expression that is not assignable
    #[error("cannot assign a value to {what} (line {line})")]
    BadReadOnlyWrite {
        /// Description of the non-assignable expression
        what: &'static str,
        /// Source line
        line: u32,
    },

    /// `:` without an enclosing `?`
    #[error("found ':' without outer '?' operator (line {line})")]
    UseOfColonOutsideTernary {
        /// Source line
        line: u32,
    },

    /// Bracket access without the required getter or setter
    #[error("{access} access is not possible for bracket operator [] (line {line})")]
    BracketOperatorUnsupported {
        /// "read" or "write"
        access: &'static str,
        /// Source line
        line: u32,
    },

    /// Comparison whose result is discarded (script feature level 2+)
    #[error("result of comparison is not used, this is certainly a mistake in the script (line {line})")]
    UnusedComparisonResult {
        /// Source line
        line: u32,
    },

    /// Frontend output violated the emitter's input contract
    #[error("internal error: {message} (line {line})")]
    Internal {
        /// Description of the violated expectation
        message: &'static str,
        /// Source line
        line: u32,
    },
}

impl CompileError {
    /// Source line the error is attached to.
    pub fn line(&self) -> u32 {
        match self {
            Self::VoidFunctionReturnsValue { line, .. }
            | Self::NonVoidFunctionMissingReturn { line, .. }
            | Self::InvalidCast { line, .. }
            | Self::UnknownLabel { line, .. }
            | Self::DuplicateLabel { line, .. }
            | Self::DuplicateVariable { line, .. }
            | Self::BreakOutsideLoop { line }
            | Self::ContinueOutsideLoop { line }
            | Self::MissingIndex { line }
            | Self::BadReadOnlyWrite { line, .. }
            | Self::UseOfColonOutsideTernary { line }
            | Self::BracketOperatorUnsupported { line, .. }
            | Self::UnusedComparisonResult { line }
            | Self::Internal { line, .. } => *line,
        }
    }
}
