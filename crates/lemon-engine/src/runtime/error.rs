//! Errors raised while building runtime opcodes or executing them

use thiserror::Error;

use crate::program::{BaseType, OpcodeKind};

/// Errors from the runtime dispatcher and the interpreter loop.
///
/// On well-formed compiler output the dispatcher never fails; these surface
/// corrupted opcode streams, missing registrations, and resource limits.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    /// The local-variable stack limit was exceeded
    #[error("reached the var stack limit, probably due to recursive function calls")]
    StackOverflow,

    /// The value stack limit was exceeded
    #[error("reached the value stack limit")]
    ValueStackOverflow,

    /// A call opcode names a function that is not registered
    #[error("no function registered for signature hash {hash:#018x}")]
    UnknownFunction {
        /// The unresolved name-and-signature hash
        hash: u64,
    },

    /// A variable id does not resolve in its registry
    #[error("no variable registered for id {id:#010x}")]
    UnknownVariable {
        /// The unresolved variable id
        id: u32,
    },

    /// An opcode carries a data type its kind cannot execute with
    #[error("invalid data type {data_type} for opcode {}", kind.name())]
    InvalidOpcodeDataType {
        /// Opcode kind
        kind: OpcodeKind,
        /// Offending data type
        data_type: BaseType,
    },

    /// A cast opcode carries an unknown cast selector
    #[error("unrecognized cast type {parameter:#04x}")]
    UnrecognizedCastType {
        /// The raw cast selector
        parameter: i64,
    },

    /// A duplicate opcode asks for an unsupported slot count
    #[error("unsupported duplicate count {count}")]
    UnsupportedDuplicateCount {
        /// Requested count
        count: i64,
    },

    /// The interpreter hit an opcode it cannot execute
    #[error("unhandled opcode {}", kind.name())]
    UnhandledOpcode {
        /// Opcode kind
        kind: OpcodeKind,
    },

    /// An external call or jump ran without a registered host handler
    #[error("no host handler registered for external control transfers")]
    MissingExternalHandler,

    /// The program counter left the opcode buffer
    #[error("program counter {program_counter} out of bounds")]
    ProgramCounterOutOfBounds {
        /// Offending position
        program_counter: usize,
    },
}
