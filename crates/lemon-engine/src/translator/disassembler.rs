//! Opcode listing for debugging
//!
//! Renders a compiled function as a plain-text listing: one line per
//! opcode with its index, kind, data type, parameter, source line, and
//! flags, plus the function's labels.

use std::fmt::Write;

use crate::program::{OpcodeFlags, OpcodeKind, ScriptFunction};

/// Render a compiled function's opcodes as a human-readable listing.
pub fn disassemble_function(function: &ScriptFunction) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "function {} ({} opcodes, {} bytes of locals)",
        function.name,
        function.opcodes.len(),
        function.local_variables_memory_size
    );

    for (index, opcode) in function.opcodes.iter().enumerate() {
        if let Some(label) = function.find_label_by_offset(index) {
            let _ = writeln!(output, "{}:", label.name);
        }

        let parameter = match opcode.kind {
            OpcodeKind::Jump | OpcodeKind::JumpConditional | OpcodeKind::JumpSwitch => {
                format!("-> {}", opcode.parameter)
            }
            OpcodeKind::Call => format!("{:#018x}", opcode.parameter as u64),
            OpcodeKind::GetVariableValue | OpcodeKind::SetVariableValue => {
                format!("var {:#010x}", opcode.parameter as u32)
            }
            _ => format!("{}", opcode.parameter),
        };

        let _ = writeln!(
            output,
            "{:>5}  {:<20} {:<10} {:<22} ; line {:<5} {}",
            index,
            opcode.kind.name(),
            opcode.data_type.name(),
            parameter,
            opcode.line_number,
            flags_string(opcode.flags)
        );
    }
    output
}

fn flags_string(flags: OpcodeFlags) -> String {
    let mut names: Vec<&str> = Vec::new();
    if flags.contains(OpcodeFlags::CTRLFLOW) {
        names.push("ctrlflow");
    }
    if flags.contains(OpcodeFlags::JUMP) {
        names.push("jump");
    }
    if flags.contains(OpcodeFlags::JUMP_TARGET) {
        names.push("target");
    }
    if flags.contains(OpcodeFlags::LABEL) {
        names.push("label");
    }
    if flags.contains(OpcodeFlags::NEW_LINE) {
        names.push("line");
    }
    if flags.contains(OpcodeFlags::SEQ_BREAK) {
        names.push("seqbreak");
    }
    if names.is_empty() {
        String::new()
    } else {
        format!("[{}]", names.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{BaseType, DataType, Opcode};

    #[test]
    fn test_disassembly_lists_opcodes_and_labels() {
        let mut function = ScriptFunction::new("update", Vec::new(), DataType::Void);
        function.opcodes = vec![
            Opcode::new(OpcodeKind::PushConstant, BaseType::IntConst, 7, 3),
            Opcode::new(OpcodeKind::Return, BaseType::Void, 0, 4),
        ];
        function.add_label("start", 0);

        let listing = disassemble_function(&function);
        assert!(listing.contains("function update"));
        assert!(listing.contains("start:"));
        assert!(listing.contains("PUSH_CONSTANT"));
        assert!(listing.contains("RETURN"));
    }
}
