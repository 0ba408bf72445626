//! Specialized runtime representation of opcodes
//!
//! The dispatcher pairs every compiled opcode with a monomorphized
//! execution function and an inline parameter buffer. The interpreter loop
//! invokes the function for "handled" opcodes and performs control flow
//! itself for the rest.

use super::control_flow::ControlFlow;
use super::error::RuntimeError;
use super::vm::RuntimeEnvironment;
use crate::program::{OpcodeFlags, OpcodeKind, Program};

/// State handed to every execution function.
pub struct OpcodeExecContext<'a> {
    /// Execution stacks
    pub control_flow: &'a mut ControlFlow,
    /// Host environment: memory, globals, external hooks
    pub environment: &'a mut RuntimeEnvironment,
    /// The loaded program
    pub program: &'a Program,
    /// The runtime opcode being executed
    pub opcode: &'a RuntimeOpcode,
    /// Set by jump handlers to redirect the interpreter
    pub jump_to: Option<usize>,
    /// Set by handlers that hit a runtime fault
    pub error: Option<RuntimeError>,
}

/// Monomorphized execution function of one runtime opcode.
pub type ExecFunc = fn(&mut OpcodeExecContext<'_>);

/// One opcode in its runtime representation.
pub struct RuntimeOpcode {
    /// Specialized execution function
    pub exec_func: ExecFunc,
    parameter: [u8; 16],
    /// How many of the inline parameter bytes are meaningful (0, 8, or 16)
    pub parameter_size: u8,
    /// Kind of the source opcode
    pub kind: OpcodeKind,
    /// Flags copied from the source opcode
    pub flags: OpcodeFlags,
    /// Whether a call opcode is a base call into the overridden overload
    pub is_base_call: bool,
    /// Length of the linear handled run starting here; zero means the
    /// interpreter loop must perform this opcode's control flow itself
    pub successive_handled_opcodes: u32,
}

impl RuntimeOpcode {
    /// Read the parameter as a signed 64-bit value.
    pub fn parameter_i64(&self) -> i64 {
        i64::from_le_bytes(self.parameter[0..8].try_into().unwrap())
    }

    /// Read the parameter as an unsigned 64-bit value.
    pub fn parameter_u64(&self) -> u64 {
        self.parameter_i64() as u64
    }

    /// Read 4 parameter bytes at the given offset.
    pub fn parameter_u32_at(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.parameter[offset..offset + 4].try_into().unwrap())
    }

    /// Store the parameter as a signed 64-bit value.
    pub fn set_parameter_i64(&mut self, value: i64) {
        self.parameter[0..8].copy_from_slice(&value.to_le_bytes());
    }

    /// Store the parameter as an unsigned 64-bit value.
    pub fn set_parameter_u64(&mut self, value: u64) {
        self.set_parameter_i64(value as i64);
    }

    /// Store 4 parameter bytes at the given offset.
    pub fn set_parameter_u32_at(&mut self, offset: usize, value: u32) {
        self.parameter[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl std::fmt::Debug for RuntimeOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeOpcode")
            .field("kind", &self.kind)
            .field("parameter", &self.parameter_i64())
            .field("successive_handled_opcodes", &self.successive_handled_opcodes)
            .finish_non_exhaustive()
    }
}

/// Growable buffer of runtime opcodes, owned by a runtime function and
/// rebuilt whenever its module is loaded.
#[derive(Debug, Default)]
pub struct RuntimeOpcodeBuffer {
    opcodes: Vec<RuntimeOpcode>,
}

impl RuntimeOpcodeBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fresh opcode with the given inline parameter size and
    /// return it for initialization.
    pub fn add_opcode(&mut self, parameter_size: usize) -> &mut RuntimeOpcode {
        self.opcodes.push(RuntimeOpcode {
            exec_func: |_context| {},
            parameter: [0; 16],
            parameter_size: parameter_size as u8,
            kind: OpcodeKind::Nop,
            flags: OpcodeFlags::empty(),
            is_base_call: false,
            successive_handled_opcodes: 1,
        });
        self.opcodes.last_mut().unwrap()
    }

    /// Number of runtime opcodes.
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Opcode at the given index.
    pub fn get(&self, index: usize) -> Option<&RuntimeOpcode> {
        self.opcodes.get(index)
    }

    /// All opcodes.
    pub fn opcodes(&self) -> &[RuntimeOpcode] {
        &self.opcodes
    }
}
