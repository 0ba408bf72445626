//! Backend function compiler
//!
//! Consumes the frontend's per-function syntax tree and produces the
//! optimized, flagged opcode vector on the [`crate::program::ScriptFunction`].

pub mod ast;
mod emitter;
mod error;
mod optimizer;

pub use emitter::compile_function_body;
pub use error::CompileError;
pub use optimizer::{assign_opcode_flags, optimize_opcodes};
