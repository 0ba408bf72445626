//! Runtime: opcode dispatch and the stack VM

mod control_flow;
mod dispatcher;
mod error;
mod memory;
mod opcode_processor;
mod runtime_opcode;
mod vm;

pub use control_flow::{
    CallFrame, ControlFlow, NativeCallContext, CALL_STACK_LIMIT, VALUE_STACK_LIMIT,
    VAR_STACK_LIMIT,
};
pub use dispatcher::{build_runtime_opcode, DispatchOptions};
pub use error::RuntimeError;
pub use memory::{FlatMemory, MemoryAccessHandler, SafeArithmetic};
pub use opcode_processor::{build_opcode_data, OpcodeData};
pub use runtime_opcode::{ExecFunc, OpcodeExecContext, RuntimeOpcode, RuntimeOpcodeBuffer};
pub use vm::{Runtime, RuntimeEnvironment, RuntimeFunction};
