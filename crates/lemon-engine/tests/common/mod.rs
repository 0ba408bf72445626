//! Shared helpers for building syntax trees and compiling test functions
#![allow(dead_code)]

use lemon_engine::compiler::ast::{BlockNode, Node, Operator, Token, TokenKind};
use lemon_engine::compiler::{compile_function_body, CompileError};
use lemon_engine::program::{
    BaseType, CompileOptions, DataType, Function, GlobalsLookup, OpcodeFlags, OpcodeKind,
    Program, ScriptFunction,
};

pub fn base(base_type: BaseType) -> DataType {
    DataType::Base(base_type)
}

pub fn int_literal(value: i64) -> Token {
    Token::new(TokenKind::Constant { value }, base(BaseType::IntConst))
}

pub fn constant(value: i64, data_type: DataType) -> Token {
    Token::new(TokenKind::Constant { value }, data_type)
}

pub fn variable(id: u32, data_type: DataType) -> Token {
    Token::new(TokenKind::Variable { id }, data_type)
}

pub fn binary(op: Operator, left: Token, right: Token, data_type: DataType) -> Token {
    Token::new(
        TokenKind::BinaryOperation {
            op,
            left: Box::new(left),
            right: Box::new(right),
            bound_function: None,
        },
        data_type,
    )
}

pub fn unary(op: Operator, argument: Token, data_type: DataType) -> Token {
    Token::new(
        TokenKind::UnaryOperation {
            op,
            argument: Box::new(argument),
        },
        data_type,
    )
}

pub fn assign(left: Token, right: Token, data_type: DataType) -> Token {
    binary(Operator::Assign, left, right, data_type)
}

pub fn memory_access(address: Token, data_type: DataType) -> Token {
    Token::new(
        TokenKind::MemoryAccess {
            address: Box::new(address),
        },
        data_type,
    )
}

pub fn call(function: u64, arguments: Vec<Token>, data_type: DataType) -> Token {
    Token::new(
        TokenKind::FunctionCall {
            function,
            is_base_call: false,
            arguments,
        },
        data_type,
    )
}

pub fn base_call(function: u64, arguments: Vec<Token>, data_type: DataType) -> Token {
    Token::new(
        TokenKind::FunctionCall {
            function,
            is_base_call: true,
            arguments,
        },
        data_type,
    )
}

pub fn statement(token: Token, line: u32) -> Node {
    Node::Statement { token, line }
}

pub fn block(nodes: Vec<Node>) -> BlockNode {
    BlockNode { nodes, line: 1 }
}

/// Compile a body against empty globals with default options.
pub fn compile(function: &mut ScriptFunction, nodes: Vec<Node>) {
    compile_function_body(
        function,
        &block(nodes),
        &GlobalsLookup::default(),
        &CompileOptions::default(),
    )
    .unwrap();
}

/// Compile a body against empty globals, returning the error.
pub fn compile_err(function: &mut ScriptFunction, nodes: Vec<Node>) -> CompileError {
    compile_function_body(
        function,
        &block(nodes),
        &GlobalsLookup::default(),
        &CompileOptions::default(),
    )
    .unwrap_err()
}

/// Compile a body against a program's registered signatures, then register
/// the function. Returns its call identity.
pub fn compile_into(program: &mut Program, mut function: ScriptFunction, nodes: Vec<Node>) -> u64 {
    let globals = program.globals_lookup();
    let options = program.compile_options.clone();
    compile_function_body(&mut function, &block(nodes), &globals, &options).unwrap();
    let hash = function.name_and_signature_hash();
    program.add_function(Function::Script(function));
    hash
}

/// Check the universal post-optimization invariants of a compiled function.
pub fn assert_invariants(function: &ScriptFunction) {
    let opcodes = &function.opcodes;
    assert!(!opcodes.is_empty(), "{}: no opcodes", function.name);

    let last = opcodes.last().unwrap();
    assert!(
        matches!(last.kind, OpcodeKind::Return | OpcodeKind::ExternalJump),
        "{}: does not end in a terminator",
        function.name
    );

    for (index, opcode) in opcodes.iter().enumerate() {
        assert_ne!(
            opcode.kind,
            OpcodeKind::Nop,
            "{}: NOP left at {}",
            function.name,
            index
        );
        assert!(
            !opcode.flags.contains(OpcodeFlags::TEMP_FLAG),
            "{}: scratch flag left at {}",
            function.name,
            index
        );
        if matches!(
            opcode.kind,
            OpcodeKind::Jump | OpcodeKind::JumpConditional | OpcodeKind::JumpSwitch
        ) {
            let target = opcode.parameter as usize;
            assert!(
                target < opcodes.len(),
                "{}: jump at {} targets {} out of {}",
                function.name,
                index,
                target,
                opcodes.len()
            );
        }
    }

    for label in &function.labels {
        assert!(
            (label.offset as usize) < opcodes.len(),
            "{}: label '{}' out of range",
            function.name,
            label.name
        );
    }

    // SEQ_BREAK holds exactly for control-flow opcodes and for opcodes whose
    // successor starts a basic block.
    let block_start = OpcodeFlags::LABEL
        | OpcodeFlags::JUMP_TARGET
        | OpcodeFlags::NEW_LINE
        | OpcodeFlags::CTRLFLOW;
    for index in 0..opcodes.len() {
        let expected = opcodes[index].flags.contains(OpcodeFlags::CTRLFLOW)
            || (index + 1 < opcodes.len() && opcodes[index + 1].flags.intersects(block_start));
        assert_eq!(
            opcodes[index].flags.contains(OpcodeFlags::SEQ_BREAK),
            expected,
            "{}: SEQ_BREAK mismatch at {}",
            function.name,
            index
        );
    }
}

/// Opcode kinds in order, for compact comparisons.
pub fn kinds(function: &ScriptFunction) -> Vec<OpcodeKind> {
    function.opcodes.iter().map(|opcode| opcode.kind).collect()
}
