//! Backend function compiler: syntax tree to raw opcodes
//!
//! [`compile_function_body`] walks a function's statement tree and emits the
//! flat opcode vector, resolving label jumps, inserting the casts the
//! frontend requested, and distinguishing read from write contexts. The
//! result is handed to the optimizer and finally gets its flags assigned.

use rustc_hash::FxHashMap;

use super::ast::{BlockNode, ExternalKind, Node, Operator, Token, TokenKind};
use super::error::CompileError;
use super::optimizer;
use crate::program::{
    get_cast_handling, BaseType, BracketOperator, CastHandling, CompileOptions, DataType,
    GlobalsLookup, Opcode, OpcodeKind, ScriptFunction,
};

/// Compile a function body into `function.opcodes`.
///
/// The function's parameters must already be registered as its first local
/// variables. On success the opcode vector is optimized and flagged; on
/// error it may hold partial output that must not be executed.
pub fn compile_function_body(
    function: &mut ScriptFunction,
    body: &BlockNode,
    globals: &GlobalsLookup,
    options: &CompileOptions,
) -> Result<(), CompileError> {
    let mut emitter = FunctionEmitter {
        function,
        globals,
        options,
        line_number: 0,
        collected_labels: FxHashMap::default(),
    };
    emitter.process_parameters()?;
    emitter.build_opcodes_for_function(body)
}

#[derive(Default)]
struct CollectedLabel {
    jump_locations: Vec<u32>,
}

/// Loop-tracking state threaded through statement emission.
#[derive(Default)]
struct NodeContext {
    is_loop_block: bool,
    break_locations: Vec<u32>,
    continue_locations: Vec<u32>,
}

struct FunctionEmitter<'a> {
    function: &'a mut ScriptFunction,
    globals: &'a GlobalsLookup,
    options: &'a CompileOptions,
    line_number: u32,
    collected_labels: FxHashMap<String, CollectedLabel>,
}

/// Tracks one open conditional: the pending jump past the then-branch and,
/// once an else-branch starts, the pending jump past it.
struct BranchBuilder {
    if_jump_index: usize,
    else_jump_index: Option<usize>,
}

impl BranchBuilder {
    fn begin_if(emitter: &mut FunctionEmitter<'_>) -> Self {
        // Target position is set once the then-branch is complete.
        let if_jump_index = emitter.opcode_count();
        emitter.add_opcode(OpcodeKind::JumpConditional, BaseType::Void, 0);
        Self {
            if_jump_index,
            else_jump_index: None,
        }
    }

    fn begin_else(&mut self, emitter: &mut FunctionEmitter<'_>) {
        // Unconditional jump to the end of the else-branch; target is set
        // once that branch is complete.
        self.else_jump_index = Some(emitter.opcode_count());
        emitter.add_opcode(OpcodeKind::Jump, BaseType::Void, 0);

        let after_then = emitter.opcode_count();
        emitter.patch_jump_target(self.if_jump_index, after_then);
    }

    fn end_if(&self, emitter: &mut FunctionEmitter<'_>) {
        let end = emitter.opcode_count();
        match self.else_jump_index {
            Some(else_jump_index) => emitter.patch_jump_target(else_jump_index, end),
            None => emitter.patch_jump_target(self.if_jump_index, end),
        }
    }
}

impl<'a> FunctionEmitter<'a> {
    fn opcode_count(&self) -> usize {
        self.function.opcodes.len()
    }

    fn patch_jump_target(&mut self, opcode_index: usize, target: usize) {
        self.function.opcodes[opcode_index].parameter = target as i64;
    }

    fn add_opcode(&mut self, kind: OpcodeKind, mut data_type: BaseType, parameter: i64) -> usize {
        // Signedness makes no difference for these opcodes; normalizing
        // halves the number of specialized runtime handlers. Floating-point
        // types are unaffected.
        if kind.ignores_signedness() {
            data_type = data_type.make_unsigned();
        }
        let index = self.function.opcodes.len();
        self.function
            .opcodes
            .push(Opcode::new(kind, data_type, parameter, self.line_number));
        index
    }

    fn add_opcode_simple(&mut self, kind: OpcodeKind, parameter: i64) -> usize {
        self.add_opcode(kind, BaseType::Void, parameter)
    }

    fn add_opcode_typed(&mut self, kind: OpcodeKind, data_type: DataType, parameter: i64) -> usize {
        self.add_opcode(kind, data_type.base_type(), parameter)
    }

    /// Merge stack adjustments into a preceding `MOVE_STACK`, dropping the
    /// opcode entirely when the net change reaches zero.
    fn add_move_stack_opcode(&mut self, stack_change: i32) {
        if let Some(last) = self.function.opcodes.last_mut() {
            if last.kind == OpcodeKind::MoveStack {
                last.parameter += stack_change as i64;
                if last.parameter == 0 {
                    self.function.opcodes.pop();
                }
                return;
            }
        }
        self.add_opcode_simple(OpcodeKind::MoveStack, stack_change as i64);
    }

    fn add_cast_opcode_if_necessary(
        &mut self,
        source: DataType,
        target: DataType,
    ) -> Result<(), CompileError> {
        match get_cast_handling(source, target) {
            Some(CastHandling::NoCast) => {}
            Some(CastHandling::BaseCast(cast)) => {
                self.add_opcode_simple(OpcodeKind::CastValue, cast as u8 as i64);
            }
            Some(CastHandling::AnyCast) => {
                // Tag the value with its runtime type for variant-typed
                // parameters.
                self.add_opcode(
                    OpcodeKind::PushConstant,
                    BaseType::IntConst,
                    source.type_id() as i64,
                );
            }
            None => {
                return Err(CompileError::InvalidCast {
                    from_type: source,
                    target,
                    line: self.line_number,
                })
            }
        }
        Ok(())
    }

    fn add_jump_to_label(
        &mut self,
        kind: OpcodeKind,
        label: &str,
    ) -> Result<usize, CompileError> {
        let location = self.opcode_count() as u32;
        let line = self.line_number;
        let collected = self
            .collected_labels
            .get_mut(label)
            .ok_or_else(|| CompileError::UnknownLabel {
                label: label.to_string(),
                line,
            })?;
        collected.jump_locations.push(location);

        // Target position is resolved once the whole body is emitted.
        Ok(self.add_opcode(kind, BaseType::Void, 0))
    }

    /// Parameter prologue: reserve the frame, then pop the caller-pushed
    /// arguments into their local slots in reverse order (the caller pushed
    /// them left to right).
    fn process_parameters(&mut self) -> Result<(), CompileError> {
        // Parameters are local variables too, so an empty local table means
        // nothing to do.
        if self.function.local_variables.is_empty() {
            return Ok(());
        }

        self.line_number = self.function.start_line_number;

        debug_assert_eq!(
            self.function.local_variables_memory_size % 8,
            0,
            "local variables total size must be a multiple of 8 bytes"
        );
        let frame_slots = (self.function.local_variables_memory_size / 8) as i64;
        self.add_opcode_simple(OpcodeKind::MoveVarStack, frame_slots);

        for index in (0..self.function.parameters.len()).rev() {
            let parameter = self.function.parameters[index].clone();
            let variable = self
                .function
                .local_variable_by_name_hash(crate::program::fnv1a_64(parameter.name.as_bytes()))
                .ok_or(CompileError::Internal {
                    message: "parameter is not registered as a local variable",
                    line: self.line_number,
                })?;
            if variable.data_type != parameter.data_type {
                return Err(CompileError::Internal {
                    message: "parameter variable has wrong data type",
                    line: self.line_number,
                });
            }
            let id = variable.id;
            let data_type = variable.data_type;

            // The argument value is on the stack; store it, then pop it
            // (SET_VARIABLE_VALUE does not consume).
            self.add_opcode_typed(OpcodeKind::SetVariableValue, data_type, id as i64);

            let size_on_stack = data_type.size_on_stack() as i32;
            if size_on_stack == 0 {
                return Err(CompileError::Internal {
                    message: "invalid stack size of parameter type",
                    line: self.line_number,
                });
            }
            self.add_move_stack_opcode(-size_on_stack);
        }
        Ok(())
    }

    fn build_opcodes_for_function(&mut self, body: &BlockNode) -> Result<(), CompileError> {
        let mut context = NodeContext::default();
        self.build_opcodes_from_nodes(body, &mut context)?;

        // Resolve all jumps to labels.
        let mut patches: Vec<(u32, u32)> = Vec::new();
        for (name, collected) in &self.collected_labels {
            if collected.jump_locations.is_empty() {
                continue;
            }
            match self.function.find_label_by_name(name) {
                Some(label) => {
                    for &location in &collected.jump_locations {
                        patches.push((location, label.offset));
                    }
                }
                None => {
                    let line = self.function.opcodes[collected.jump_locations[0] as usize]
                        .line_number;
                    return Err(CompileError::UnknownLabel {
                        label: name.clone(),
                        line,
                    });
                }
            }
        }
        for (location, offset) in patches {
            self.function.opcodes[location as usize].parameter = offset as i64;
        }

        // Make sure the function ends with a return in any case.
        let ends_with_return = self
            .function
            .opcodes
            .last()
            .is_some_and(|opcode| opcode.kind == OpcodeKind::Return);
        if !ends_with_return {
            if !self.function.return_type.is_void() {
                return Err(CompileError::NonVoidFunctionMissingReturn {
                    name: self.function.name.clone(),
                    return_type: self.function.return_type,
                    line: body.line,
                });
            }
            self.add_opcode_simple(OpcodeKind::Return, 0);
        } else {
            // There can be jumps leading to the position after the final
            // return, e.g. when the function ends with an if-block that
            // itself ends with a return. Retarget them.
            let last_index = (self.function.opcodes.len() - 1) as i64;
            let count = self.function.opcodes.len() as i64;
            for opcode in &mut self.function.opcodes {
                if opcode.kind.is_jump() && opcode.parameter >= count {
                    opcode.parameter = last_index;
                }
            }
        }

        // Optimize in place, then compute the final flags.
        let ScriptFunction {
            opcodes, labels, ..
        } = &mut *self.function;
        optimizer::optimize_opcodes(opcodes, labels);
        optimizer::assign_opcode_flags(opcodes, labels);
        Ok(())
    }

    fn build_opcodes_from_nodes(
        &mut self,
        block: &BlockNode,
        context: &mut NodeContext,
    ) -> Result<(), CompileError> {
        // First collect the labels of this block, so forward jumps inside it
        // resolve.
        for node in &block.nodes {
            if let Node::Label { name, line } = node {
                if self.collected_labels.contains_key(name) {
                    return Err(CompileError::DuplicateLabel {
                        label: name.clone(),
                        line: *line,
                    });
                }
                self.collected_labels.insert(name.clone(), CollectedLabel::default());
            }
        }

        for node in &block.nodes {
            self.build_opcodes_for_node(node, context)?;
        }
        Ok(())
    }

    fn build_opcodes_for_node(
        &mut self,
        node: &Node,
        context: &mut NodeContext,
    ) -> Result<(), CompileError> {
        self.line_number = node.line_number();
        match node {
            Node::Block(block) => {
                // All locals are function-scoped; inner blocks reserve no
                // additional frame memory.
                let memory_size = 0;
                self.scope_begin(memory_size);
                self.build_opcodes_from_nodes(block, context)?;
                self.scope_end(memory_size);
            }

            Node::Label { name, .. } => {
                let offset = self.opcode_count();
                self.function.add_label(name, offset);
            }

            Node::Statement { token, .. } => {
                self.compile_token_tree(token, true, false)?;
            }

            Node::Jump { label, .. } => {
                self.add_jump_to_label(OpcodeKind::Jump, label)?;
            }

            Node::JumpIndirect { index, labels, .. } => {
                if labels.is_empty() {
                    return Err(CompileError::Internal {
                        message: "indirect jump node must have at least one label",
                        line: self.line_number,
                    });
                }

                self.compile_token_tree(index, false, false)?;

                for label in labels {
                    self.add_jump_to_label(OpcodeKind::JumpSwitch, label)?;
                }
                // Consume the selector if none of the jumps did.
                self.add_opcode_simple(OpcodeKind::MoveVarStack, -1);
            }

            Node::Break { line } => {
                if !context.is_loop_block {
                    return Err(CompileError::BreakOutsideLoop { line: *line });
                }
                context.break_locations.push(self.opcode_count() as u32);
                // Target position is set once the loop is complete.
                self.add_opcode_simple(OpcodeKind::Jump, 0);
            }

            Node::Continue { line } => {
                if !context.is_loop_block {
                    return Err(CompileError::ContinueOutsideLoop { line: *line });
                }
                context.continue_locations.push(self.opcode_count() as u32);
                self.add_opcode_simple(OpcodeKind::Jump, 0);
            }

            Node::Return { value, line } => {
                match value {
                    Some(token) => {
                        if self.function.return_type.is_void() {
                            return Err(CompileError::VoidFunctionReturnsValue {
                                name: self.function.name.clone(),
                                line: *line,
                            });
                        }
                        self.compile_token_tree(token, false, false)?;
                        let return_type = self.function.return_type;
                        self.add_cast_opcode_if_necessary(token.data_type, return_type)?;
                    }
                    None => {
                        if !self.function.return_type.is_void() {
                            return Err(CompileError::NonVoidFunctionMissingReturn {
                                name: self.function.name.clone(),
                                return_type: self.function.return_type,
                                line: *line,
                            });
                        }
                    }
                }
                self.add_opcode_simple(OpcodeKind::Return, 0);
            }

            Node::External { kind, address, line } => {
                let token = address
                    .as_ref()
                    .ok_or(CompileError::MissingIndex { line: *line })?;
                self.compile_token_tree(token, false, false)?;
                let address_type = self.options.external_address_type;
                self.add_cast_opcode_if_necessary(token.data_type, address_type)?;
                let opcode_kind = match kind {
                    ExternalKind::Call => OpcodeKind::ExternalCall,
                    ExternalKind::Jump => OpcodeKind::ExternalJump,
                };
                self.add_opcode_simple(opcode_kind, 0);
            }

            Node::If { .. } => {
                // Linear else-if chains keep a stack of open branches and
                // close them all at the end, avoiding recursion per link.
                let mut open_branches: Vec<BranchBuilder> = Vec::new();
                let mut current = node;
                loop {
                    let Node::If {
                        condition,
                        then_branch,
                        else_branch,
                        ..
                    } = current
                    else {
                        unreachable!("loop only iterates over if nodes");
                    };

                    self.compile_token_tree(condition, false, false)?;

                    let mut branch = BranchBuilder::begin_if(self);
                    self.build_opcodes_for_node(then_branch, context)?;

                    if let Some(else_node) = else_branch {
                        branch.begin_else(self);
                        open_branches.push(branch);

                        self.line_number = node.line_number();
                        if matches!(**else_node, Node::If { .. }) {
                            current = else_node;
                            continue;
                        }
                        self.build_opcodes_for_node(else_node, context)?;
                    } else {
                        open_branches.push(branch);
                    }
                    break;
                }

                for branch in open_branches.iter().rev() {
                    branch.end_if(self);
                }
            }

            Node::While {
                condition, body, ..
            } => {
                let start_position = self.opcode_count();

                self.compile_token_tree(condition, false, false)?;

                let if_jump_index = self.opcode_count();
                self.add_opcode_simple(OpcodeKind::JumpConditional, 0);

                let mut inner_context = NodeContext {
                    is_loop_block: true,
                    ..NodeContext::default()
                };
                self.build_opcodes_for_node(body, &mut inner_context)?;

                // Jump back to the condition evaluation.
                self.add_opcode_simple(OpcodeKind::Jump, start_position as i64);

                let end = self.opcode_count();
                self.patch_jump_target(if_jump_index, end);
                for &location in &inner_context.break_locations {
                    self.patch_jump_target(location as usize, end);
                }
                for &location in &inner_context.continue_locations {
                    self.patch_jump_target(location as usize, start_position);
                }
            }

            Node::For {
                init,
                condition,
                iteration,
                body,
                ..
            } => {
                if let Some(token) = init {
                    self.compile_token_tree(token, true, false)?;
                }

                let start_position = self.opcode_count();
                let mut if_jump_index = None;

                if let Some(token) = condition {
                    self.compile_token_tree(token, false, false)?;
                    if_jump_index = Some(self.opcode_count());
                    self.add_opcode_simple(OpcodeKind::JumpConditional, 0);
                }

                let mut inner_context = NodeContext {
                    is_loop_block: true,
                    ..NodeContext::default()
                };
                self.build_opcodes_for_node(body, &mut inner_context)?;

                let continue_position = self.opcode_count();

                if let Some(token) = iteration {
                    self.compile_token_tree(token, true, false)?;
                }

                // Jump back to the condition evaluation.
                self.add_opcode_simple(OpcodeKind::Jump, start_position as i64);

                let end = self.opcode_count();
                if let Some(index) = if_jump_index {
                    self.patch_jump_target(index, end);
                }
                for &location in &inner_context.break_locations {
                    self.patch_jump_target(location as usize, end);
                }
                for &location in &inner_context.continue_locations {
                    self.patch_jump_target(location as usize, continue_position);
                }
            }
        }
        Ok(())
    }

    fn compile_token_tree(
        &mut self,
        token: &Token,
        consume_result: bool,
        is_lvalue: bool,
    ) -> Result<(), CompileError> {
        match &token.kind {
            TokenKind::UnaryOperation { op, argument } => {
                if is_lvalue {
                    return Err(self.read_only_write("a unary operation"));
                }
                match op {
                    Operator::BinaryMinus => {
                        self.compile_token_tree(argument, false, false)?;
                        self.add_opcode_typed(OpcodeKind::ArithmNeg, token.data_type, 0);
                    }
                    Operator::UnaryNot => {
                        self.compile_token_tree(argument, false, false)?;
                        self.add_opcode_typed(OpcodeKind::ArithmNot, token.data_type, 0);
                    }
                    Operator::UnaryBitnot => {
                        self.compile_token_tree(argument, false, false)?;
                        self.add_opcode_typed(OpcodeKind::ArithmBitnot, token.data_type, 0);
                    }
                    Operator::UnaryIncrement | Operator::UnaryDecrement => {
                        self.compile_unary_dec_inc(token, *op, argument)?;
                    }
                    _ => {
                        return Err(CompileError::Internal {
                            message: "unrecognized unary operator",
                            line: self.line_number,
                        })
                    }
                }
            }

            TokenKind::BinaryOperation {
                op,
                left,
                right,
                bound_function,
            } => {
                if is_lvalue {
                    return Err(self.read_only_write("a binary operation"));
                }
                if let Some(function) = bound_function {
                    // The frontend bound this operation to a function; treat
                    // it like a call.
                    self.compile_token_tree(left, false, false)?;
                    self.compile_token_tree(right, false, false)?;
                    self.add_opcode(OpcodeKind::Call, BaseType::Void, *function as i64);
                } else {
                    self.compile_binary_operator(token, *op, left, right, consume_result)?;
                }
            }

            TokenKind::Parenthesis { content } => {
                if is_lvalue {
                    return Err(self.read_only_write("an expression in parentheses"));
                }
                if let Some(inner) = content {
                    self.compile_token_tree(inner, false, false)?;
                }
            }

            TokenKind::Constant { value } => {
                if is_lvalue {
                    return Err(self.read_only_write("a constant"));
                }
                self.add_opcode_typed(OpcodeKind::PushConstant, token.data_type, *value);
            }

            TokenKind::Variable { id } => {
                if let DataType::Array { .. } = token.data_type {
                    // Arrays are accessed through their bracket operator;
                    // the variable itself contributes only its id.
                    self.add_opcode_simple(OpcodeKind::PushConstant, *id as i64);
                } else {
                    let kind = if is_lvalue {
                        OpcodeKind::SetVariableValue
                    } else {
                        OpcodeKind::GetVariableValue
                    };
                    self.add_opcode_typed(kind, token.data_type, *id as i64);
                }
            }

            TokenKind::FunctionCall {
                function,
                is_base_call,
                arguments,
            } => {
                if is_lvalue {
                    return Err(self.read_only_write("a function call"));
                }
                let signature = self
                    .globals
                    .function_signature(*function)
                    .ok_or(CompileError::Internal {
                        message: "call target has no registered signature",
                        line: self.line_number,
                    })?
                    .clone();
                if signature.parameter_types.len() != arguments.len() {
                    return Err(CompileError::Internal {
                        message: "call argument count does not match the signature",
                        line: self.line_number,
                    });
                }
                for (argument, parameter_type) in
                    arguments.iter().zip(signature.parameter_types.iter())
                {
                    self.compile_token_tree(argument, false, false)?;
                    self.add_cast_opcode_if_necessary(argument.data_type, *parameter_type)?;
                }

                // The data type slot encodes whether this is a base call.
                let marker = if *is_base_call {
                    BaseType::Uint8
                } else {
                    BaseType::Void
                };
                self.add_opcode(OpcodeKind::Call, marker, *function as i64);
            }

            TokenKind::MemoryAccess { address } => {
                if is_lvalue {
                    // Memory writes are resolved by the assignment paths.
                    return Err(CompileError::Internal {
                        message: "memory write should have been resolved differently",
                        line: self.line_number,
                    });
                }
                self.compile_token_tree(address, false, false)?;
                self.add_opcode_typed(OpcodeKind::ReadMemory, token.data_type, 0);
            }

            TokenKind::BracketAccess {
                variable_id,
                variable_type,
                index,
            } => {
                let bracket = self.bracket_operator_of(*variable_type)?;
                if is_lvalue {
                    // The value to assign was already pushed; it becomes the
                    // setter's first parameter.
                    let setter = bracket
                        .setter
                        .ok_or_else(|| self.bracket_unsupported("write"))?;

                    self.add_opcode(
                        OpcodeKind::PushConstant,
                        BaseType::IntConst,
                        *variable_id as i64,
                    );
                    self.compile_token_tree(index, false, false)?;
                    self.add_cast_opcode_if_necessary(index.data_type, bracket.parameter_type)?;

                    self.add_opcode_simple(OpcodeKind::Call, setter as i64);

                    if self.callee_returns_void(setter) {
                        // Push a dummy value to keep the stack balance
                        // identical to a value-returning setter.
                        self.add_move_stack_opcode(1);
                    }
                } else {
                    let getter = bracket
                        .getter
                        .ok_or_else(|| self.bracket_unsupported("read"))?;

                    self.add_opcode(
                        OpcodeKind::PushConstant,
                        BaseType::IntConst,
                        *variable_id as i64,
                    );
                    self.compile_token_tree(index, false, false)?;
                    self.add_cast_opcode_if_necessary(index.data_type, bracket.parameter_type)?;

                    self.add_opcode_simple(OpcodeKind::Call, getter as i64);
                }
            }

            TokenKind::ValueCast { argument } => {
                if is_lvalue {
                    return Err(self.read_only_write("a type cast"));
                }
                self.compile_token_tree(argument, false, false)?;
                self.add_cast_opcode_if_necessary(argument.data_type, token.data_type)?;
            }
        }

        if consume_result && !token.data_type.is_void() {
            let size_on_stack = token.data_type.size_on_stack() as i32;
            // Pop the unused result of the statement.
            self.add_move_stack_opcode(-size_on_stack);
        }
        Ok(())
    }

    fn compile_binary_operator(
        &mut self,
        token: &Token,
        op: Operator,
        left: &Token,
        right: &Token,
        consume_result: bool,
    ) -> Result<(), CompileError> {
        match op {
            Operator::Assign => self.compile_assignment(left, right)?,

            Operator::AssignPlus => {
                self.compile_binary_assignment(token, left, right, OpcodeKind::ArithmAdd)?
            }
            Operator::AssignMinus => {
                self.compile_binary_assignment(token, left, right, OpcodeKind::ArithmSub)?
            }
            Operator::AssignMultiply => {
                self.compile_binary_assignment(token, left, right, OpcodeKind::ArithmMul)?
            }
            Operator::AssignDivide => {
                self.compile_binary_assignment(token, left, right, OpcodeKind::ArithmDiv)?
            }
            Operator::AssignModulo => {
                self.compile_binary_assignment(token, left, right, OpcodeKind::ArithmMod)?
            }
            Operator::AssignAnd => {
                self.compile_binary_assignment(token, left, right, OpcodeKind::ArithmAnd)?
            }
            Operator::AssignOr => {
                self.compile_binary_assignment(token, left, right, OpcodeKind::ArithmOr)?
            }
            Operator::AssignXor => {
                self.compile_binary_assignment(token, left, right, OpcodeKind::ArithmXor)?
            }
            Operator::AssignShiftLeft => {
                self.compile_binary_assignment(token, left, right, OpcodeKind::ArithmShl)?
            }
            Operator::AssignShiftRight => {
                self.compile_binary_assignment(token, left, right, OpcodeKind::ArithmShr)?
            }

            Operator::BinaryPlus => self.compile_binary_operation(op, left, right, OpcodeKind::ArithmAdd)?,
            Operator::BinaryMinus => self.compile_binary_operation(op, left, right, OpcodeKind::ArithmSub)?,
            Operator::BinaryMultiply => self.compile_binary_operation(op, left, right, OpcodeKind::ArithmMul)?,
            Operator::BinaryDivide => self.compile_binary_operation(op, left, right, OpcodeKind::ArithmDiv)?,
            Operator::BinaryModulo => self.compile_binary_operation(op, left, right, OpcodeKind::ArithmMod)?,
            Operator::BinaryShiftLeft => self.compile_binary_operation(op, left, right, OpcodeKind::ArithmShl)?,
            Operator::BinaryShiftRight => self.compile_binary_operation(op, left, right, OpcodeKind::ArithmShr)?,
            Operator::BinaryAnd => self.compile_binary_operation(op, left, right, OpcodeKind::ArithmAnd)?,
            Operator::BinaryOr => self.compile_binary_operation(op, left, right, OpcodeKind::ArithmOr)?,
            Operator::BinaryXor => self.compile_binary_operation(op, left, right, OpcodeKind::ArithmXor)?,

            Operator::CompareEqual => {
                self.compile_binary_operation(op, left, right, OpcodeKind::CompareEq)?;
                if consume_result && self.options.script_feature_level >= 2 {
                    return Err(CompileError::UnusedComparisonResult {
                        line: self.line_number,
                    });
                }
            }
            Operator::CompareNotEqual => {
                self.compile_binary_operation(op, left, right, OpcodeKind::CompareNeq)?
            }
            Operator::CompareLess => {
                self.compile_binary_operation(op, left, right, OpcodeKind::CompareLt)?
            }
            Operator::CompareLessOrEqual => {
                self.compile_binary_operation(op, left, right, OpcodeKind::CompareLe)?
            }
            Operator::CompareGreater => {
                self.compile_binary_operation(op, left, right, OpcodeKind::CompareGt)?
            }
            Operator::CompareGreaterOrEqual => {
                self.compile_binary_operation(op, left, right, OpcodeKind::CompareGe)?
            }

            Operator::LogicalAnd => {
                // Short-circuit evaluation: "A && B" is treated as
                // "A ? B : false".
                self.compile_token_tree(left, false, false)?;

                let mut branch = BranchBuilder::begin_if(self);
                self.compile_token_tree(right, false, false)?;
                branch.begin_else(self);
                self.add_opcode(OpcodeKind::PushConstant, BaseType::IntConst, 0);
                branch.end_if(self);
            }

            Operator::LogicalOr => {
                // Short-circuit evaluation: "A || B" is treated as
                // "A ? true : B".
                self.compile_token_tree(left, false, false)?;

                let mut branch = BranchBuilder::begin_if(self);
                self.add_opcode(OpcodeKind::PushConstant, BaseType::IntConst, 1);
                branch.begin_else(self);
                self.compile_token_tree(right, false, false)?;
                branch.end_if(self);
            }

            Operator::QuestionMark => {
                let TokenKind::BinaryOperation {
                    op: Operator::Colon,
                    left: first_alternative,
                    right: second_alternative,
                    ..
                } = &right.kind
                else {
                    return Err(CompileError::Internal {
                        message: "expected ':' after '?' operator",
                        line: self.line_number,
                    });
                };

                self.compile_token_tree(left, false, false)?;

                let mut branch = BranchBuilder::begin_if(self);
                self.compile_token_tree(first_alternative, false, false)?;
                branch.begin_else(self);
                self.compile_token_tree(second_alternative, false, false)?;
                branch.end_if(self);
            }

            Operator::Colon => {
                return Err(CompileError::UseOfColonOutsideTernary {
                    line: self.line_number,
                })
            }

            _ => {
                return Err(CompileError::Internal {
                    message: "unrecognized binary operator",
                    line: self.line_number,
                })
            }
        }
        Ok(())
    }

    fn compile_unary_dec_inc(
        &mut self,
        token: &Token,
        op: Operator,
        argument: &Token,
    ) -> Result<(), CompileError> {
        // TODO: Differentiate between pre- and post-fix.
        let delta: i64 = if op == Operator::UnaryDecrement { -1 } else { 1 };

        match &argument.kind {
            // The memory address calculation must only run once, especially
            // when it has side effects.
            TokenKind::MemoryAccess { address } => {
                self.compile_token_tree(address, false, false)?;

                // READ_MEMORY that keeps the address on the stack; it is
                // needed again by the WRITE_MEMORY below.
                self.add_opcode_typed(OpcodeKind::ReadMemory, argument.data_type, 1);

                self.add_opcode(OpcodeKind::PushConstant, BaseType::IntConst, delta);
                self.add_opcode_typed(OpcodeKind::ArithmAdd, token.data_type, 0);

                self.add_opcode_typed(OpcodeKind::WriteMemory, argument.data_type, 0);
            }

            TokenKind::BracketAccess {
                variable_id,
                variable_type,
                index,
            } => {
                let bracket = self.bracket_operator_of(*variable_type)?;
                let getter = bracket
                    .getter
                    .ok_or_else(|| self.bracket_unsupported("read"))?;
                let setter = bracket
                    .setter
                    .ok_or_else(|| self.bracket_unsupported("write"))?;

                self.add_opcode(
                    OpcodeKind::PushConstant,
                    BaseType::IntConst,
                    *variable_id as i64,
                );
                self.compile_token_tree(index, false, false)?;
                self.add_cast_opcode_if_necessary(index.data_type, bracket.parameter_type)?;

                // The setter needs both parameters again after the getter
                // consumed them.
                self.add_opcode_simple(OpcodeKind::Duplicate, 2);

                self.add_opcode_simple(OpcodeKind::Call, getter as i64);

                self.add_opcode(OpcodeKind::PushConstant, BaseType::IntConst, delta);
                self.add_opcode_typed(OpcodeKind::ArithmAdd, token.data_type, 0);

                self.add_opcode_simple(OpcodeKind::Call, setter as i64);

                if self.callee_returns_void(setter) {
                    self.add_move_stack_opcode(1);
                }
            }

            _ => {
                self.compile_token_tree(argument, false, false)?;

                self.add_opcode(OpcodeKind::PushConstant, BaseType::IntConst, delta);
                self.add_opcode_typed(OpcodeKind::ArithmAdd, token.data_type, 0);

                // Compile the argument again, this time for assignment.
                self.compile_token_tree(argument, false, true)?;
            }
        }
        Ok(())
    }

    fn compile_assignment(&mut self, left: &Token, right: &Token) -> Result<(), CompileError> {
        match &left.kind {
            // The memory address must be pushed before the right side.
            TokenKind::MemoryAccess { address } => {
                self.compile_token_tree(address, false, false)?;

                self.compile_token_tree(right, false, false)?;
                self.add_cast_opcode_if_necessary(right.data_type, left.data_type)?;

                self.add_opcode_typed(OpcodeKind::WriteMemory, left.data_type, 0);
            }

            TokenKind::BracketAccess {
                variable_id,
                variable_type,
                index,
            } => {
                let bracket = self.bracket_operator_of(*variable_type)?;
                let setter = bracket
                    .setter
                    .ok_or_else(|| self.bracket_unsupported("write"))?;

                self.add_opcode(
                    OpcodeKind::PushConstant,
                    BaseType::IntConst,
                    *variable_id as i64,
                );
                self.compile_token_tree(index, false, false)?;
                self.add_cast_opcode_if_necessary(index.data_type, bracket.parameter_type)?;

                // Third parameter is the value to assign.
                self.compile_token_tree(right, false, false)?;
                self.add_cast_opcode_if_necessary(right.data_type, left.data_type)?;

                self.add_opcode_simple(OpcodeKind::Call, setter as i64);

                if self.callee_returns_void(setter) {
                    self.add_move_stack_opcode(1);
                }
            }

            _ => {
                self.compile_token_tree(right, false, false)?;
                self.add_cast_opcode_if_necessary(right.data_type, left.data_type)?;

                // Compile the left side for assignment.
                self.compile_token_tree(left, false, true)?;
            }
        }
        Ok(())
    }

    fn compile_binary_assignment(
        &mut self,
        token: &Token,
        left: &Token,
        right: &Token,
        opcode_kind: OpcodeKind,
    ) -> Result<(), CompileError> {
        match &left.kind {
            // The memory address calculation must only run once, especially
            // when it has side effects.
            TokenKind::MemoryAccess { address } => {
                self.compile_token_tree(address, false, false)?;

                // READ_MEMORY that keeps the address on the stack; it is
                // needed again by the WRITE_MEMORY below.
                self.add_opcode_typed(OpcodeKind::ReadMemory, left.data_type, 1);

                self.compile_token_tree(right, false, false)?;

                self.add_opcode_typed(opcode_kind, token.data_type, 0);

                self.add_opcode_typed(OpcodeKind::WriteMemory, left.data_type, 0);
            }

            TokenKind::BracketAccess {
                variable_id,
                variable_type,
                index,
            } => {
                let bracket = self.bracket_operator_of(*variable_type)?;
                let getter = bracket
                    .getter
                    .ok_or_else(|| self.bracket_unsupported("read"))?;
                let setter = bracket
                    .setter
                    .ok_or_else(|| self.bracket_unsupported("write"))?;

                self.add_opcode(
                    OpcodeKind::PushConstant,
                    BaseType::IntConst,
                    *variable_id as i64,
                );
                self.compile_token_tree(index, false, false)?;
                self.add_cast_opcode_if_necessary(index.data_type, bracket.parameter_type)?;

                // The setter needs both parameters again after the getter
                // consumed them.
                self.add_opcode_simple(OpcodeKind::Duplicate, 2);

                self.add_opcode_simple(OpcodeKind::Call, getter as i64);

                self.compile_token_tree(right, false, false)?;

                self.add_opcode_typed(opcode_kind, token.data_type, 0);

                self.add_opcode_simple(OpcodeKind::Call, setter as i64);

                if self.callee_returns_void(setter) {
                    self.add_move_stack_opcode(1);
                }
            }

            _ => {
                self.compile_token_tree(left, false, false)?;
                self.compile_token_tree(right, false, false)?;

                self.add_opcode_typed(opcode_kind, token.data_type, 0);

                // Compile the left side again for assignment.
                self.compile_token_tree(left, false, true)?;
            }
        }
        Ok(())
    }

    fn compile_binary_operation(
        &mut self,
        op: Operator,
        left: &Token,
        right: &Token,
        opcode_kind: OpcodeKind,
    ) -> Result<(), CompileError> {
        // Move constants to the right for easier optimization later on.
        let (left_token, right_token) =
            if left.is_constant() && !right.is_constant() && op.is_commutative() {
                (right, left)
            } else {
                (left, right)
            };

        self.compile_token_tree(left_token, false, false)?;
        self.compile_token_tree(right_token, false, false)?;

        // Not the operation's own data type; that does not work for
        // comparisons.
        self.add_opcode_typed(opcode_kind, left_token.data_type, 0);
        Ok(())
    }

    fn scope_begin(&mut self, memory_to_reserve: i64) {
        if memory_to_reserve > 0 {
            self.add_opcode_simple(OpcodeKind::MoveVarStack, memory_to_reserve);
        }
    }

    fn scope_end(&mut self, memory_to_free: i64) {
        if memory_to_free > 0 {
            self.add_opcode_simple(OpcodeKind::MoveVarStack, -memory_to_free);
        }
    }

    fn bracket_operator_of(
        &self,
        variable_type: DataType,
    ) -> Result<BracketOperator, CompileError> {
        let DataType::Array { id } = variable_type else {
            return Err(CompileError::Internal {
                message: "bracket access on a non-array variable",
                line: self.line_number,
            });
        };
        self.globals
            .bracket_operator(id)
            .copied()
            .ok_or(CompileError::BracketOperatorUnsupported {
                access: "read",
                line: self.line_number,
            })
    }

    fn callee_returns_void(&self, function_hash: u64) -> bool {
        self.globals
            .function_signature(function_hash)
            .map(|signature| signature.return_type.is_void())
            .unwrap_or(false)
    }

    fn read_only_write(&self, what: &'static str) -> CompileError {
        CompileError::BadReadOnlyWrite {
            what,
            line: self.line_number,
        }
    }

    fn bracket_unsupported(&self, access: &'static str) -> CompileError {
        CompileError::BracketOperatorUnsupported {
            access,
            line: self.line_number,
        }
    }
}
