//! End-to-end compilation scenarios: syntax tree to optimized opcodes

mod common;

use common::*;
use lemon_engine::compiler::ast::{BlockNode, ExternalKind, Node, Operator, Token, TokenKind};
use lemon_engine::compiler::{compile_function_body, CompileError};
use lemon_engine::program::{
    BaseType, CompileOptions, DataType, GlobalsLookup, OpcodeKind, Parameter, ScriptFunction,
};

fn void_function(name: &str) -> ScriptFunction {
    ScriptFunction::new(name, Vec::new(), DataType::Void)
}

#[test]
fn test_void_function_with_early_return_collapses_to_single_return() {
    // function void f() { if (true) return; return; }
    let mut function = void_function("f");
    compile(
        &mut function,
        vec![
            Node::If {
                condition: constant(1, base(BaseType::Bool)),
                then_branch: Box::new(Node::Return {
                    value: None,
                    line: 2,
                }),
                else_branch: None,
                line: 2,
            },
            Node::Return {
                value: None,
                line: 3,
            },
        ],
    );

    // The constant condition makes the jump unconditional, the trailing
    // return becomes unreachable, and compaction leaves a single return.
    assert_eq!(kinds(&function), vec![OpcodeKind::Return]);
    assert_invariants(&function);
}

#[test]
fn test_constant_condition_keeps_only_taken_branch() {
    // if (0) a = 1; else a = 2;
    let mut function = void_function("f");
    let a = function
        .add_local_variable("a", base(BaseType::Uint8), 1)
        .unwrap();
    let a_token = || variable(a, base(BaseType::Uint8));
    compile(
        &mut function,
        vec![Node::If {
            condition: constant(0, base(BaseType::IntConst)),
            then_branch: Box::new(statement(
                assign(a_token(), int_literal(1), base(BaseType::Uint8)),
                2,
            )),
            else_branch: Some(Box::new(statement(
                assign(a_token(), int_literal(2), base(BaseType::Uint8)),
                3,
            ))),
            line: 2,
        }],
    );

    assert_invariants(&function);
    assert!(
        !function
            .opcodes
            .iter()
            .any(|opcode| opcode.kind == OpcodeKind::JumpConditional),
        "conditional jump survived a constant condition"
    );
    let pushed: Vec<i64> = function
        .opcodes
        .iter()
        .filter(|opcode| opcode.kind == OpcodeKind::PushConstant)
        .map(|opcode| opcode.parameter)
        .collect();
    assert_eq!(pushed, vec![2], "only the else path must survive");
    assert_eq!(
        function
            .opcodes
            .iter()
            .filter(|opcode| opcode.kind == OpcodeKind::SetVariableValue)
            .count(),
        1
    );
}

#[test]
fn test_short_circuit_and_branches_around_right_side() {
    // b = (x > 0) && (y > 0);
    let mut function = void_function("f");
    let x = function
        .add_local_variable("x", base(BaseType::Uint32), 1)
        .unwrap();
    let y = function
        .add_local_variable("y", base(BaseType::Uint32), 1)
        .unwrap();
    let b = function
        .add_local_variable("b", base(BaseType::Uint8), 1)
        .unwrap();

    let greater = |id| {
        binary(
            Operator::CompareGreater,
            variable(id, base(BaseType::Uint32)),
            int_literal(0),
            base(BaseType::Bool),
        )
    };
    let and_token = binary(
        Operator::LogicalAnd,
        greater(x),
        greater(y),
        base(BaseType::Bool),
    );
    compile(
        &mut function,
        vec![statement(
            assign(variable(b, base(BaseType::Uint8)), and_token, base(BaseType::Uint8)),
            2,
        )],
    );

    assert_invariants(&function);

    // Exactly one conditional jump, right after the first comparison; its
    // target pushes the constant false.
    let conditional_positions: Vec<usize> = function
        .opcodes
        .iter()
        .enumerate()
        .filter(|(_, opcode)| opcode.kind == OpcodeKind::JumpConditional)
        .map(|(index, _)| index)
        .collect();
    assert_eq!(conditional_positions.len(), 1);
    let conditional_position = conditional_positions[0];
    assert_eq!(
        function.opcodes[conditional_position - 1].kind,
        OpcodeKind::CompareGt
    );

    let target = function.opcodes[conditional_position].parameter as usize;
    assert_eq!(function.opcodes[target].kind, OpcodeKind::PushConstant);
    assert_eq!(function.opcodes[target].parameter, 0);
    assert_eq!(function.opcodes[target].data_type, BaseType::IntConst);

    // The right-side comparison lies strictly between the conditional jump
    // and the false branch, so it is skipped when the left side fails.
    let right_side_compares = function.opcodes[conditional_position + 1..target]
        .iter()
        .filter(|opcode| opcode.kind == OpcodeKind::CompareGt)
        .count();
    assert_eq!(right_side_compares, 1);
}

#[test]
fn test_compound_assignment_to_memory_evaluates_address_once() {
    // u8[a0++] += 8;
    let mut function = void_function("f");
    let a0 = function
        .add_local_variable("a0", base(BaseType::Uint32), 1)
        .unwrap();

    let address = unary(
        Operator::UnaryIncrement,
        variable(a0, base(BaseType::Uint32)),
        base(BaseType::Uint32),
    );
    let target = memory_access(address, base(BaseType::Uint8));
    compile(
        &mut function,
        vec![statement(
            binary(Operator::AssignPlus, target, int_literal(8), base(BaseType::Uint8)),
            2,
        )],
    );

    assert_invariants(&function);

    // The address (with its side effect) is computed exactly once.
    assert_eq!(
        function
            .opcodes
            .iter()
            .filter(|opcode| opcode.kind == OpcodeKind::GetVariableValue)
            .count(),
        1
    );

    // Skeleton: non-consuming read, constant, add, write.
    let read_position = function
        .opcodes
        .iter()
        .position(|opcode| opcode.kind == OpcodeKind::ReadMemory)
        .unwrap();
    assert_eq!(function.opcodes[read_position].parameter, 1);
    assert_eq!(function.opcodes[read_position].data_type, BaseType::Uint8);

    let tail: Vec<OpcodeKind> = function.opcodes[read_position + 1..read_position + 4]
        .iter()
        .map(|opcode| opcode.kind)
        .collect();
    assert_eq!(
        tail,
        vec![
            OpcodeKind::PushConstant,
            OpcodeKind::ArithmAdd,
            OpcodeKind::WriteMemory
        ]
    );
    assert_eq!(function.opcodes[read_position + 2].data_type, BaseType::Uint8);
}

#[test]
fn test_jump_chain_collapses_into_return() {
    // goto L1; L1: goto L2; L2: goto L3; L3: return;
    let mut function = void_function("f");
    compile(
        &mut function,
        vec![
            Node::Jump {
                label: "L1".to_string(),
                line: 1,
            },
            Node::Label {
                name: "L1".to_string(),
                line: 2,
            },
            Node::Jump {
                label: "L2".to_string(),
                line: 2,
            },
            Node::Label {
                name: "L2".to_string(),
                line: 3,
            },
            Node::Jump {
                label: "L3".to_string(),
                line: 3,
            },
            Node::Label {
                name: "L3".to_string(),
                line: 4,
            },
            Node::Return {
                value: None,
                line: 4,
            },
        ],
    );

    assert_invariants(&function);
    // The entry jump was propagated into a direct return; no jump remains.
    assert_eq!(function.opcodes[0].kind, OpcodeKind::Return);
    assert!(!function
        .opcodes
        .iter()
        .any(|opcode| opcode.kind == OpcodeKind::Jump));
}

#[test]
fn test_break_inside_while_targets_loop_exit() {
    // while (x > 0) { if (x == 5) break; x -= 1; }  x = 0;
    let mut function = void_function("f");
    let x = function
        .add_local_variable("x", base(BaseType::Uint32), 1)
        .unwrap();
    let x_token = || variable(x, base(BaseType::Uint32));

    let body = Node::Block(BlockNode {
        nodes: vec![
            Node::If {
                condition: binary(
                    Operator::CompareEqual,
                    x_token(),
                    int_literal(5),
                    base(BaseType::Bool),
                ),
                then_branch: Box::new(Node::Break { line: 3 }),
                else_branch: None,
                line: 3,
            },
            statement(
                binary(Operator::AssignMinus, x_token(), int_literal(1), base(BaseType::Uint32)),
                4,
            ),
        ],
        line: 2,
    });
    compile(
        &mut function,
        vec![
            Node::While {
                condition: binary(
                    Operator::CompareGreater,
                    x_token(),
                    int_literal(0),
                    base(BaseType::Bool),
                ),
                body: Box::new(body),
                line: 2,
            },
            statement(assign(x_token(), int_literal(0), base(BaseType::Uint32)), 6),
        ],
    );

    assert_invariants(&function);

    // Find the backward loop jump; the break jump lands right after it.
    let backward = function
        .opcodes
        .iter()
        .enumerate()
        .find(|(index, opcode)| {
            opcode.kind == OpcodeKind::Jump && (opcode.parameter as usize) < *index
        })
        .map(|(index, _)| index)
        .expect("loop must keep its backward jump");
    let break_jump = function
        .opcodes
        .iter()
        .enumerate()
        .find(|(index, opcode)| {
            opcode.kind == OpcodeKind::Jump && *index != backward
        })
        .map(|(_, opcode)| opcode.parameter as usize)
        .expect("break must survive as a forward jump");
    assert_eq!(break_jump, backward + 1);
}

#[test]
fn test_parameter_prologue_pops_in_reverse_order() {
    let parameters = vec![
        Parameter {
            name: "a".to_string(),
            data_type: base(BaseType::Uint32),
        },
        Parameter {
            name: "b".to_string(),
            data_type: base(BaseType::Uint16),
        },
    ];
    let mut function = ScriptFunction::new("f", parameters, DataType::Void);
    let a = function
        .add_local_variable("a", base(BaseType::Uint32), 1)
        .unwrap();
    let b = function
        .add_local_variable("b", base(BaseType::Uint16), 1)
        .unwrap();
    compile(&mut function, Vec::new());

    assert_invariants(&function);
    assert_eq!(
        kinds(&function),
        vec![
            OpcodeKind::MoveVarStack,
            OpcodeKind::SetVariableValue,
            OpcodeKind::MoveStack,
            OpcodeKind::SetVariableValue,
            OpcodeKind::MoveStack,
            OpcodeKind::Return,
        ]
    );
    // Two 8-byte-aligned locals reserve two slots.
    assert_eq!(function.opcodes[0].parameter, 2);
    // The caller pushed left to right, so the last parameter pops first.
    assert_eq!(function.opcodes[1].parameter, b as i64);
    assert_eq!(function.opcodes[3].parameter, a as i64);
    assert_eq!(function.opcodes[2].parameter, -1);
}

#[test]
fn test_ternary_compiles_to_conditional_branches() {
    // b = x ? 10 : 20;
    let mut function = void_function("f");
    let x = function
        .add_local_variable("x", base(BaseType::Uint32), 1)
        .unwrap();
    let b = function
        .add_local_variable("b", base(BaseType::Uint32), 1)
        .unwrap();

    let colon = binary(
        Operator::Colon,
        int_literal(10),
        int_literal(20),
        base(BaseType::IntConst),
    );
    let ternary = binary(
        Operator::QuestionMark,
        variable(x, base(BaseType::Uint32)),
        colon,
        base(BaseType::IntConst),
    );
    compile(
        &mut function,
        vec![statement(
            assign(variable(b, base(BaseType::Uint32)), ternary, base(BaseType::Uint32)),
            2,
        )],
    );

    assert_invariants(&function);
    let conditionals = function
        .opcodes
        .iter()
        .filter(|opcode| opcode.kind == OpcodeKind::JumpConditional)
        .count();
    let jumps = function
        .opcodes
        .iter()
        .filter(|opcode| opcode.kind == OpcodeKind::Jump)
        .count();
    assert_eq!(conditionals, 1);
    assert_eq!(jumps, 1);
}

#[test]
fn test_optimizer_rerun_is_identity_and_hash_stable() {
    let mut function = void_function("f");
    let x = function
        .add_local_variable("x", base(BaseType::Uint32), 1)
        .unwrap();
    let x_token = || variable(x, base(BaseType::Uint32));
    compile(
        &mut function,
        vec![Node::While {
            condition: binary(
                Operator::CompareGreater,
                x_token(),
                int_literal(0),
                base(BaseType::Bool),
            ),
            body: Box::new(statement(
                binary(Operator::AssignMinus, x_token(), int_literal(1), base(BaseType::Uint32)),
                3,
            )),
            line: 2,
        }],
    );

    let opcodes_before = function.opcodes.clone();
    let labels_before = function.labels.clone();
    let hash_before = function.compiled_hash();

    lemon_engine::compiler::optimize_opcodes(&mut function.opcodes, &mut function.labels);
    lemon_engine::compiler::assign_opcode_flags(&mut function.opcodes, &function.labels);

    assert_eq!(function.opcodes, opcodes_before);
    assert_eq!(function.labels, labels_before);
    assert_eq!(function.compiled_hash(), hash_before);
}

#[test]
fn test_return_value_in_void_function_is_rejected() {
    let mut function = void_function("f");
    let error = compile_err(
        &mut function,
        vec![Node::Return {
            value: Some(int_literal(1)),
            line: 2,
        }],
    );
    assert!(matches!(error, CompileError::VoidFunctionReturnsValue { line: 2, .. }));
}

#[test]
fn test_missing_return_value_is_rejected() {
    let mut function = ScriptFunction::new("f", Vec::new(), base(BaseType::Uint32));
    let error = compile_err(&mut function, Vec::new());
    assert!(matches!(error, CompileError::NonVoidFunctionMissingReturn { .. }));

    let mut function = ScriptFunction::new("g", Vec::new(), base(BaseType::Uint32));
    let error = compile_err(
        &mut function,
        vec![Node::Return {
            value: None,
            line: 2,
        }],
    );
    assert!(matches!(error, CompileError::NonVoidFunctionMissingReturn { line: 2, .. }));
}

#[test]
fn test_break_and_continue_outside_loops_are_rejected() {
    let mut function = void_function("f");
    let error = compile_err(&mut function, vec![Node::Break { line: 2 }]);
    assert!(matches!(error, CompileError::BreakOutsideLoop { line: 2 }));

    let mut function = void_function("g");
    let error = compile_err(&mut function, vec![Node::Continue { line: 3 }]);
    assert!(matches!(error, CompileError::ContinueOutsideLoop { line: 3 }));
}

#[test]
fn test_label_errors() {
    let mut function = void_function("f");
    let error = compile_err(
        &mut function,
        vec![
            Node::Label {
                name: "spot".to_string(),
                line: 1,
            },
            Node::Label {
                name: "spot".to_string(),
                line: 2,
            },
        ],
    );
    assert!(matches!(error, CompileError::DuplicateLabel { line: 2, .. }));

    let mut function = void_function("g");
    let error = compile_err(
        &mut function,
        vec![Node::Jump {
            label: "nowhere".to_string(),
            line: 4,
        }],
    );
    assert!(matches!(error, CompileError::UnknownLabel { line: 4, .. }));
}

#[test]
fn test_write_to_read_only_expressions_is_rejected() {
    let mut function = void_function("f");
    let error = compile_err(
        &mut function,
        vec![statement(
            assign(int_literal(1), int_literal(2), base(BaseType::IntConst)),
            2,
        )],
    );
    assert!(matches!(error, CompileError::BadReadOnlyWrite { .. }));
}

#[test]
fn test_colon_without_question_mark_is_rejected() {
    let mut function = void_function("f");
    let error = compile_err(
        &mut function,
        vec![statement(
            binary(Operator::Colon, int_literal(1), int_literal(2), base(BaseType::IntConst)),
            2,
        )],
    );
    assert!(matches!(error, CompileError::UseOfColonOutsideTernary { line: 2 }));
}

#[test]
fn test_external_without_address_is_rejected() {
    let mut function = void_function("f");
    let error = compile_err(
        &mut function,
        vec![Node::External {
            kind: ExternalKind::Call,
            address: None,
            line: 2,
        }],
    );
    assert!(matches!(error, CompileError::MissingIndex { line: 2 }));
}

#[test]
fn test_invalid_cast_is_rejected() {
    let mut function = void_function("f");
    let cast = Token::new(
        TokenKind::ValueCast {
            argument: Box::new(variable(0x1234, DataType::Array { id: 0 })),
        },
        base(BaseType::Uint8),
    );
    let error = compile_err(&mut function, vec![statement(cast, 2)]);
    assert!(matches!(error, CompileError::InvalidCast { .. }));
}

#[test]
fn test_discarded_comparison_is_rejected_at_feature_level_two() {
    let mut function = void_function("f");
    let x = function
        .add_local_variable("x", base(BaseType::Uint32), 1)
        .unwrap();
    let options = CompileOptions {
        script_feature_level: 2,
        ..CompileOptions::default()
    };
    let error = compile_function_body(
        &mut function,
        &block(vec![statement(
            binary(
                Operator::CompareEqual,
                variable(x, base(BaseType::Uint32)),
                int_literal(5),
                base(BaseType::Bool),
            ),
            2,
        )]),
        &GlobalsLookup::default(),
        &options,
    )
    .unwrap_err();
    assert!(matches!(error, CompileError::UnusedComparisonResult { line: 2 }));
}

#[test]
fn test_constant_cast_folds_preserve_value() {
    // u8 a = <large literal>: the literal is masked at compile time.
    let mut function = void_function("f");
    let a = function
        .add_local_variable("a", base(BaseType::Uint8), 1)
        .unwrap();
    compile(
        &mut function,
        vec![statement(
            assign(variable(a, base(BaseType::Uint8)), int_literal(0x1ff), base(BaseType::Uint8)),
            2,
        )],
    );

    assert_invariants(&function);
    assert!(
        !function
            .opcodes
            .iter()
            .any(|opcode| opcode.kind == OpcodeKind::CastValue),
        "cast must fold into the constant"
    );
    let push = function
        .opcodes
        .iter()
        .find(|opcode| opcode.kind == OpcodeKind::PushConstant)
        .unwrap();
    assert_eq!(push.parameter, 0xff);
}
