//! Lemonscript Engine Core
//!
//! This crate provides the core of the lemonscript embedded scripting
//! language:
//! - **Program**: opcodes, base types, casts, variables, functions
//!   (`program` module)
//! - **Compiler**: the backend function compiler and opcode optimizer
//!   (`compiler` module)
//! - **Runtime**: the opcode dispatcher and stack VM (`runtime` module)
//! - **Translator**: opcode disassembly for debugging (`translator` module)
//!
//! The frontend (tokenizer, parser, type checker) is an external
//! collaborator: it produces the syntax tree consumed by
//! [`compiler::compile_function_body`]. Data flows from that tree through
//! the emitter and optimizer into a [`program::ScriptFunction`]'s opcode
//! vector, which the runtime dispatcher translates into specialized
//! execution functions for the interpreter loop.
//!
//! # Example
//!
//! ```rust,ignore
//! use lemon_engine::compiler::{ast, compile_function_body};
//! use lemon_engine::program::{CompileOptions, DataType, Program, ScriptFunction};
//! use lemon_engine::runtime::{FlatMemory, Runtime};
//!
//! let mut function = ScriptFunction::new("main", Vec::new(), DataType::Void);
//! compile_function_body(&mut function, &body, &globals, &options)?;
//!
//! let mut program = Program::new(CompileOptions::default());
//! let hash = function.name_and_signature_hash();
//! program.add_function(Function::Script(function));
//!
//! let mut runtime = Runtime::new(Arc::new(program), Box::new(FlatMemory::new(0x1000)))?;
//! runtime.call_function(hash)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Program module: the data model shared by compiler and runtime
pub mod program;

/// Compiler module: backend function compiler and opcode optimizer
pub mod compiler;

/// Runtime module: opcode dispatcher and stack VM
pub mod runtime;

/// Translator module: opcode disassembly
pub mod translator;

pub use compiler::{compile_function_body, CompileError};
pub use program::{
    BaseCastType, BaseType, CompileOptions, DataType, Function, GlobalsLookup, Opcode,
    OpcodeFlags, OpcodeKind, Program, ScriptFunction,
};
pub use runtime::{DispatchOptions, FlatMemory, Runtime, RuntimeError};
pub use translator::disassemble_function;
