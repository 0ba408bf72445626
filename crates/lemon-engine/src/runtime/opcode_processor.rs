//! Per-opcode sequence metadata
//!
//! Computes, for every opcode of a compiled function, how many opcodes
//! remain in its linear run before the next control-flow break. Runtime
//! providers use this to batch handled opcodes.

use crate::program::{OpcodeFlags, ScriptFunction};

/// Sequence metadata for one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeData {
    /// Opcodes left in the linear run starting here, saturating at 255;
    /// zero on control-flow opcodes
    pub remaining_sequence_length: u8,
}

/// Build the sequence metadata for a function by walking its opcodes
/// backwards.
pub fn build_opcode_data(function: &ScriptFunction) -> Vec<OpcodeData> {
    let opcodes = &function.opcodes;
    let mut opcode_data = vec![
        OpcodeData {
            remaining_sequence_length: 1
        };
        opcodes.len()
    ];

    let mut sequence_length: u8 = 1;
    for (i, opcode) in opcodes.iter().enumerate().rev() {
        if opcode.flags.contains(OpcodeFlags::CTRLFLOW) {
            sequence_length = 0;
        } else if opcode.flags.contains(OpcodeFlags::SEQ_BREAK) {
            sequence_length = 1;
        } else {
            sequence_length = sequence_length.saturating_add(1);
        }
        opcode_data[i].remaining_sequence_length = sequence_length;
    }

    opcode_data
}
