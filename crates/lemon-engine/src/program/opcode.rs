//! Compiled instruction representation
//!
//! The backend compiler produces a flat vector of [`Opcode`]s per function.
//! Each opcode pairs a kind with a data type and a polymorphic 64-bit
//! parameter whose interpretation depends on the kind (constant value,
//! variable id, jump target index, cast selector, signature hash).

use bitflags::bitflags;

use super::base_type::BaseType;

/// Instruction kind.
///
/// Discriminants feed the compiled-function hash and must stay stable.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeKind {
    /// No operation; removed by optimization
    Nop = 0x00,
    /// Adjust the value stack by `parameter` slots (positive slots are zeroed)
    MoveStack = 0x01,
    /// Adjust the local-variable stack by `parameter` slots
    MoveVarStack = 0x02,
    /// Push the constant in `parameter`
    PushConstant = 0x03,
    /// Push the value of the variable identified by `parameter`
    GetVariableValue = 0x04,
    /// Write the top of stack into the variable identified by `parameter`
    /// (the value stays on the stack)
    SetVariableValue = 0x05,
    /// Pop an address, push the memory value there; `parameter == 1` keeps
    /// the address on the stack
    ReadMemory = 0x06,
    /// Pop a value and an address, write the value, leave it on the stack
    WriteMemory = 0x07,
    /// Convert the top of stack; `parameter` selects the cast kind
    CastValue = 0x08,
    /// Normalize the top of stack to 0 or 1
    MakeBool = 0x09,

    /// Binary addition
    ArithmAdd = 0x10,
    /// Binary subtraction
    ArithmSub = 0x11,
    /// Binary multiplication
    ArithmMul = 0x12,
    /// Binary division (zero divisor yields zero)
    ArithmDiv = 0x13,
    /// Binary modulo (zero divisor yields zero)
    ArithmMod = 0x14,
    /// Bitwise and
    ArithmAnd = 0x15,
    /// Bitwise or
    ArithmOr = 0x16,
    /// Bitwise xor
    ArithmXor = 0x17,
    /// Shift left
    ArithmShl = 0x18,
    /// Shift right
    ArithmShr = 0x19,

    /// Equality comparison
    CompareEq = 0x20,
    /// Inequality comparison
    CompareNeq = 0x21,
    /// Less-than comparison
    CompareLt = 0x22,
    /// Less-or-equal comparison
    CompareLe = 0x23,
    /// Greater-than comparison
    CompareGt = 0x24,
    /// Greater-or-equal comparison
    CompareGe = 0x25,

    /// Unary negation
    ArithmNeg = 0x30,
    /// Logical not
    ArithmNot = 0x31,
    /// Bitwise not
    ArithmBitnot = 0x32,

    /// Unconditional jump to opcode index `parameter`
    Jump = 0x40,
    /// Pop the condition; jump to `parameter` when it is zero
    JumpConditional = 0x41,
    /// Pop-less switch step: jump and consume when the top of stack is zero,
    /// otherwise decrement it and fall through
    JumpSwitch = 0x42,
    /// Call the function whose name-and-signature hash is `parameter`;
    /// a non-zero data type marks a base call
    Call = 0x43,
    /// Return from the current function
    Return = 0x44,
    /// Pop an address and call into the host
    ExternalCall = 0x45,
    /// Pop an address and jump into the host, ending this function
    ExternalJump = 0x46,

    /// Duplicate the top `parameter` stack slots
    Duplicate = 0x50,
}

impl OpcodeKind {
    /// Human-readable name of the opcode kind.
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::MoveStack => "MOVE_STACK",
            Self::MoveVarStack => "MOVE_VAR_STACK",
            Self::PushConstant => "PUSH_CONSTANT",
            Self::GetVariableValue => "GET_VARIABLE_VALUE",
            Self::SetVariableValue => "SET_VARIABLE_VALUE",
            Self::ReadMemory => "READ_MEMORY",
            Self::WriteMemory => "WRITE_MEMORY",
            Self::CastValue => "CAST_VALUE",
            Self::MakeBool => "MAKE_BOOL",
            Self::ArithmAdd => "ARITHM_ADD",
            Self::ArithmSub => "ARITHM_SUB",
            Self::ArithmMul => "ARITHM_MUL",
            Self::ArithmDiv => "ARITHM_DIV",
            Self::ArithmMod => "ARITHM_MOD",
            Self::ArithmAnd => "ARITHM_AND",
            Self::ArithmOr => "ARITHM_OR",
            Self::ArithmXor => "ARITHM_XOR",
            Self::ArithmShl => "ARITHM_SHL",
            Self::ArithmShr => "ARITHM_SHR",
            Self::CompareEq => "COMPARE_EQ",
            Self::CompareNeq => "COMPARE_NEQ",
            Self::CompareLt => "COMPARE_LT",
            Self::CompareLe => "COMPARE_LE",
            Self::CompareGt => "COMPARE_GT",
            Self::CompareGe => "COMPARE_GE",
            Self::ArithmNeg => "ARITHM_NEG",
            Self::ArithmNot => "ARITHM_NOT",
            Self::ArithmBitnot => "ARITHM_BITNOT",
            Self::Jump => "JUMP",
            Self::JumpConditional => "JUMP_CONDITIONAL",
            Self::JumpSwitch => "JUMP_SWITCH",
            Self::Call => "CALL",
            Self::Return => "RETURN",
            Self::ExternalCall => "EXTERNAL_CALL",
            Self::ExternalJump => "EXTERNAL_JUMP",
            Self::Duplicate => "DUPLICATE",
        }
    }

    /// Whether this opcode carries a jump-target parameter.
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jump | Self::JumpConditional)
    }

    /// Whether this opcode is a comparison producing a bool.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::CompareEq
                | Self::CompareNeq
                | Self::CompareLt
                | Self::CompareLe
                | Self::CompareGt
                | Self::CompareGe
        )
    }

    /// Whether this opcode breaks the linear flow of execution.
    pub fn is_control_flow(self) -> bool {
        matches!(
            self,
            Self::Jump
                | Self::JumpConditional
                | Self::Call
                | Self::Return
                | Self::ExternalCall
                | Self::ExternalJump
        )
    }

    /// Whether execution never continues past this opcode.
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Return | Self::ExternalJump)
    }

    /// Opcode kinds where signedness makes no semantic difference; the
    /// emitter re-flags their data type as unsigned to halve the number of
    /// specialized runtime handlers. Floating-point types are unaffected.
    pub fn ignores_signedness(self) -> bool {
        matches!(
            self,
            Self::GetVariableValue
                | Self::SetVariableValue
                | Self::ReadMemory
                | Self::WriteMemory
                | Self::ArithmAdd
                | Self::ArithmSub
                | Self::ArithmAnd
                | Self::ArithmOr
                | Self::ArithmXor
                | Self::ArithmShl
                | Self::ArithmNeg
                | Self::ArithmNot
                | Self::ArithmBitnot
                | Self::CompareEq
                | Self::CompareNeq
        )
    }
}

bitflags! {
    /// Per-opcode flags computed after optimization.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpcodeFlags: u8 {
        /// Control-flow opcode (jumps, calls, returns, external transfers)
        const CTRLFLOW = 0x01;
        /// Jump opcode whose parameter is an opcode index
        const JUMP = 0x02;
        /// Some jump opcode targets this opcode
        const JUMP_TARGET = 0x04;
        /// A label is bound to this opcode's offset
        const LABEL = 0x08;
        /// First opcode emitted for its source line
        const NEW_LINE = 0x10;
        /// Last opcode of a basic block
        const SEQ_BREAK = 0x20;
        /// Scratch marker used by the dead-code trace
        const TEMP_FLAG = 0x80;
    }
}

/// One compiled instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    /// Instruction kind
    pub kind: OpcodeKind,
    /// Scalar representation the instruction operates on
    pub data_type: BaseType,
    /// Polymorphic parameter; interpretation depends on `kind`
    pub parameter: i64,
    /// Source line this opcode was emitted for
    pub line_number: u32,
    /// Flags computed by the post-optimization pass
    pub flags: OpcodeFlags,
}

impl Opcode {
    /// Create an opcode with empty flags.
    pub fn new(kind: OpcodeKind, data_type: BaseType, parameter: i64, line_number: u32) -> Self {
        Self {
            kind,
            data_type,
            parameter,
            line_number,
            flags: OpcodeFlags::empty(),
        }
    }

    /// Jump-target index carried by jump opcodes.
    pub fn jump_target(&self) -> usize {
        self.parameter as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_flow_classification() {
        assert!(OpcodeKind::Jump.is_control_flow());
        assert!(OpcodeKind::JumpConditional.is_control_flow());
        assert!(OpcodeKind::Call.is_control_flow());
        assert!(OpcodeKind::Return.is_control_flow());
        assert!(OpcodeKind::ExternalCall.is_control_flow());
        assert!(OpcodeKind::ExternalJump.is_control_flow());
        assert!(!OpcodeKind::JumpSwitch.is_jump());
        assert!(!OpcodeKind::ArithmAdd.is_control_flow());
        assert!(!OpcodeKind::PushConstant.is_control_flow());
    }

    #[test]
    fn test_signedness_normalization_set() {
        assert!(OpcodeKind::ArithmAdd.ignores_signedness());
        assert!(OpcodeKind::CompareEq.ignores_signedness());
        assert!(OpcodeKind::ReadMemory.ignores_signedness());
        // Ordered comparisons, multiplication, division and shifts right do care.
        assert!(!OpcodeKind::CompareLt.ignores_signedness());
        assert!(!OpcodeKind::ArithmMul.ignores_signedness());
        assert!(!OpcodeKind::ArithmDiv.ignores_signedness());
        assert!(!OpcodeKind::ArithmShr.ignores_signedness());
    }

    #[test]
    fn test_flags_are_const_evaluable() {
        const BLOCK_END: OpcodeFlags = OpcodeFlags::CTRLFLOW.union(OpcodeFlags::SEQ_BREAK);
        assert!(BLOCK_END.contains(OpcodeFlags::SEQ_BREAK));
        assert!(!BLOCK_END.contains(OpcodeFlags::JUMP_TARGET));
    }
}
