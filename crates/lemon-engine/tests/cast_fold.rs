//! Constant-cast folding agrees with the runtime cast handlers
//!
//! For every integer-to-integer cast kind and a spread of canonical source
//! values, folding the cast into the constant at compile time must produce
//! the same stack value the runtime `CAST_VALUE` handler would.

mod common;

use std::sync::Arc;

use lemon_engine::compiler::optimize_opcodes;
use lemon_engine::program::{
    BaseCastType, BaseType, DataType, Function, Opcode, OpcodeKind, Program, ScriptFunction,
};
use lemon_engine::runtime::{FlatMemory, Runtime};

const INTEGER_CASTS: [BaseCastType; 18] = [
    BaseCastType::Int16To8,
    BaseCastType::Int32To8,
    BaseCastType::Int64To8,
    BaseCastType::Int32To16,
    BaseCastType::Int64To16,
    BaseCastType::Int64To32,
    BaseCastType::Uint8To16,
    BaseCastType::Uint8To32,
    BaseCastType::Uint8To64,
    BaseCastType::Uint16To32,
    BaseCastType::Uint16To64,
    BaseCastType::Uint32To64,
    BaseCastType::Sint8To16,
    BaseCastType::Sint8To32,
    BaseCastType::Sint8To64,
    BaseCastType::Sint16To32,
    BaseCastType::Sint16To64,
    BaseCastType::Sint32To64,
];

const SAMPLE_VALUES: [i64; 10] = [0, 1, -1, 37, 0x7f, 0x80, 0xff, 0x7fff, -128, 12345];

/// Reduce a raw sample to the canonical stack representation of a value of
/// the given source type: truncated and zero- or sign-extended to 64 bits.
fn canonical(source: BaseType, raw: i64) -> i64 {
    match source {
        BaseType::Uint8 => raw as u8 as i64,
        BaseType::Uint16 => raw as u16 as i64,
        BaseType::Uint32 => raw as u32 as i64,
        BaseType::Uint64 => raw,
        BaseType::Int8 => raw as i8 as i64,
        BaseType::Int16 => raw as i16 as i64,
        BaseType::Int32 => raw as i32 as i64,
        BaseType::Int64 => raw,
        other => panic!("not an integer source type: {:?}", other),
    }
}

fn probe_opcodes(constant: i64, cast: BaseCastType) -> Vec<Opcode> {
    vec![
        Opcode::new(OpcodeKind::PushConstant, BaseType::IntConst, constant, 1),
        Opcode::new(OpcodeKind::CastValue, BaseType::Void, cast as u8 as i64, 1),
        Opcode::new(OpcodeKind::Return, BaseType::Void, 0, 1),
    ]
}

fn fold(constant: i64, cast: BaseCastType) -> i64 {
    let mut opcodes = probe_opcodes(constant, cast);
    let mut labels = Vec::new();
    optimize_opcodes(&mut opcodes, &mut labels);
    assert_eq!(opcodes[0].kind, OpcodeKind::PushConstant);
    assert!(
        !opcodes.iter().any(|opcode| opcode.kind == OpcodeKind::CastValue),
        "cast after constant must fold away"
    );
    opcodes[0].parameter
}

fn execute(constant: i64, cast: BaseCastType) -> i64 {
    let mut function = ScriptFunction::new("probe", Vec::new(), DataType::Base(BaseType::Uint64));
    function.opcodes = probe_opcodes(constant, cast);

    let mut program = Program::default();
    let hash = function.name_and_signature_hash();
    program.add_function(Function::Script(function));

    let mut runtime = Runtime::new(Arc::new(program), Box::new(FlatMemory::new(0))).unwrap();
    runtime.call_function(hash).unwrap();
    runtime.pop_value()
}

#[test]
fn test_fold_matches_runtime_for_integer_casts() {
    for cast in INTEGER_CASTS {
        for raw in SAMPLE_VALUES {
            let constant = canonical(cast.source_type(), raw);
            let folded = fold(constant, cast);
            let executed = execute(constant, cast);
            assert_eq!(
                folded, executed,
                "fold disagrees with runtime for {:?} of {:#x}",
                cast, constant
            );
        }
    }
}
