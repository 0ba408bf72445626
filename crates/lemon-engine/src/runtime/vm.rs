//! Runtime: translated functions and the interpreter loop
//!
//! A [`Runtime`] owns the runtime representation of every script function in
//! its program, rebuilt whenever the program is loaded, plus the execution
//! stacks and the host environment. The main loop dispatches handled
//! opcodes through their execution functions and performs control flow for
//! the rest.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::control_flow::{CallFrame, ControlFlow, NativeCallContext, CALL_STACK_LIMIT};
use super::dispatcher::{build_runtime_opcode, DispatchOptions};
use super::error::RuntimeError;
use super::memory::MemoryAccessHandler;
use super::runtime_opcode::{OpcodeExecContext, RuntimeOpcodeBuffer};
use crate::program::{Function, OpcodeKind, Program};

/// Host-facing state shared with execution functions and native calls.
pub struct RuntimeEnvironment {
    /// Raw memory the scripts address
    pub memory: Box<dyn MemoryAccessHandler>,
    /// One 64-bit slot per registered program variable
    pub global_memory: Vec<i64>,
    /// Invoked by `EXTERNAL_CALL` with the popped address
    pub external_call_handler: Option<Box<dyn FnMut(u64)>>,
    /// Invoked by `EXTERNAL_JUMP` with the popped address
    pub external_jump_handler: Option<Box<dyn FnMut(u64)>>,
}

/// A script function in its runtime representation.
pub struct RuntimeFunction {
    /// Index of the source function in the program's function list
    pub program_function_index: u32,
    /// Translated opcodes with resolved execution functions
    pub opcode_buffer: RuntimeOpcodeBuffer,
}

/// Executes a loaded program.
pub struct Runtime {
    program: Arc<Program>,
    options: DispatchOptions,
    runtime_functions: Vec<RuntimeFunction>,
    runtime_function_by_program_index: FxHashMap<u32, u32>,
    runtime_function_by_hash: FxHashMap<u64, u32>,
    control_flow: ControlFlow,
    environment: RuntimeEnvironment,
}

impl Runtime {
    /// Load a program with the default dispatch options.
    pub fn new(
        program: Arc<Program>,
        memory: Box<dyn MemoryAccessHandler>,
    ) -> Result<Self, RuntimeError> {
        Self::with_options(program, memory, DispatchOptions::default())
    }

    /// Load a program, translating every script function into runtime
    /// opcodes.
    pub fn with_options(
        program: Arc<Program>,
        memory: Box<dyn MemoryAccessHandler>,
        options: DispatchOptions,
    ) -> Result<Self, RuntimeError> {
        let environment = RuntimeEnvironment {
            memory,
            global_memory: program.initial_global_memory(),
            external_call_handler: None,
            external_jump_handler: None,
        };
        let mut runtime = Self {
            program,
            options,
            runtime_functions: Vec::new(),
            runtime_function_by_program_index: FxHashMap::default(),
            runtime_function_by_hash: FxHashMap::default(),
            control_flow: ControlFlow::new(),
            environment,
        };
        runtime.build_runtime_functions()?;
        Ok(runtime)
    }

    fn build_runtime_functions(&mut self) -> Result<(), RuntimeError> {
        for (index, function) in self.program.functions().iter().enumerate() {
            let Function::Script(script) = function else {
                continue;
            };

            let mut buffer = RuntimeOpcodeBuffer::new();
            let mut position = 0;
            while position < script.opcodes.len() {
                let consumed = build_runtime_opcode(
                    &mut buffer,
                    &script.opcodes,
                    position,
                    &self.program,
                    script,
                    &self.options,
                )?;
                position += consumed;
            }

            let runtime_index = self.runtime_functions.len() as u32;
            self.runtime_functions.push(RuntimeFunction {
                program_function_index: index as u32,
                opcode_buffer: buffer,
            });
            self.runtime_function_by_program_index
                .insert(index as u32, runtime_index);
            self.runtime_function_by_hash
                .insert(script.name_and_signature_hash(), runtime_index);
        }
        Ok(())
    }

    /// The loaded program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Host environment (memory, globals, external hooks).
    pub fn environment(&self) -> &RuntimeEnvironment {
        &self.environment
    }

    /// Mutable host environment.
    pub fn environment_mut(&mut self) -> &mut RuntimeEnvironment {
        &mut self.environment
    }

    /// Translated runtime function for a script function's call identity.
    pub fn runtime_function_by_hash(&self, hash: u64) -> Option<&RuntimeFunction> {
        self.runtime_function_by_hash
            .get(&hash)
            .map(|&index| &self.runtime_functions[index as usize])
    }

    /// Push an argument slot before a call.
    pub fn push_value(&mut self, value: i64) {
        self.control_flow.push_value(value);
    }

    /// Pop a result slot after a call.
    pub fn pop_value(&mut self) -> i64 {
        self.control_flow.pop_value()
    }

    /// Number of occupied value-stack slots.
    pub fn value_stack_size(&self) -> usize {
        self.control_flow.value_stack_size()
    }

    /// Drop all execution state.
    pub fn reset(&mut self) {
        self.control_flow.reset();
    }

    /// Call a function by its name-and-signature hash and run it to
    /// completion. Arguments must have been pushed left to right; the
    /// return value (if any) is left on the value stack.
    pub fn call_function(&mut self, hash: u64) -> Result<(), RuntimeError> {
        let program_index = self
            .program
            .function_index_by_signature(hash)
            .ok_or(RuntimeError::UnknownFunction { hash })?;
        self.enter_function(program_index, hash)?;
        self.run()
    }

    fn enter_function(&mut self, program_index: u32, hash: u64) -> Result<(), RuntimeError> {
        match self.program.function_by_index(program_index) {
            Some(Function::Script(_)) => {
                let runtime_index = *self
                    .runtime_function_by_program_index
                    .get(&program_index)
                    .ok_or(RuntimeError::UnknownFunction { hash })?;
                let locals_base = self.control_flow.local_variables_size();
                self.control_flow.frames.push(CallFrame {
                    program_function_index: program_index,
                    runtime_function_index: runtime_index,
                    program_counter: 0,
                    locals_base,
                });
                self.control_flow.set_current_locals_base(locals_base);
                Ok(())
            }
            Some(Function::Native(native)) => {
                let mut context = NativeCallContext {
                    control_flow: &mut self.control_flow,
                    environment: &mut self.environment,
                };
                (native.handler)(&mut context);
                Ok(())
            }
            None => Err(RuntimeError::UnknownFunction { hash }),
        }
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        while !self.control_flow.frames.is_empty() {
            self.step()?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), RuntimeError> {
        let Self {
            program,
            runtime_functions,
            runtime_function_by_program_index,
            control_flow,
            environment,
            ..
        } = self;
        let program: &Program = program;

        let Some(frame) = control_flow.frames.last().copied() else {
            return Ok(());
        };
        let runtime_function = &runtime_functions[frame.runtime_function_index as usize];
        let opcode = runtime_function
            .opcode_buffer
            .get(frame.program_counter)
            .ok_or(RuntimeError::ProgramCounterOutOfBounds {
                program_counter: frame.program_counter,
            })?;

        if opcode.successive_handled_opcodes > 0 {
            let mut context = OpcodeExecContext {
                control_flow,
                environment,
                program,
                opcode,
                jump_to: None,
                error: None,
            };
            (opcode.exec_func)(&mut context);
            let jump_to = context.jump_to;
            if let Some(error) = context.error {
                return Err(error);
            }
            let next = jump_to.unwrap_or(frame.program_counter + 1);
            control_flow.frames.last_mut().unwrap().program_counter = next;
            return Ok(());
        }

        // Non-handled opcodes: the loop performs control flow itself.
        match opcode.kind {
            OpcodeKind::Jump => {
                let target = opcode.parameter_u64() as usize;
                control_flow.frames.last_mut().unwrap().program_counter = target;
            }

            OpcodeKind::JumpConditional => {
                let condition = control_flow.pop_value();
                let next = if condition == 0 {
                    opcode.parameter_u64() as usize
                } else {
                    frame.program_counter + 1
                };
                control_flow.frames.last_mut().unwrap().program_counter = next;
            }

            OpcodeKind::JumpSwitch => {
                // Selector counts down one case per switch opcode; the
                // matching case consumes it and jumps.
                let selector = control_flow.value(-1);
                let next = if selector == 0 {
                    control_flow.pop_value();
                    opcode.parameter_u64() as usize
                } else {
                    control_flow.set_value(-1, selector - 1);
                    frame.program_counter + 1
                };
                control_flow.frames.last_mut().unwrap().program_counter = next;
            }

            OpcodeKind::Call => {
                let hash = opcode.parameter_u64();
                let callee_index = if opcode.is_base_call {
                    program
                        .resolve_base_function(hash, frame.program_function_index)
                        .ok_or(RuntimeError::UnknownFunction { hash })?
                } else {
                    program
                        .function_index_by_signature(hash)
                        .ok_or(RuntimeError::UnknownFunction { hash })?
                };

                // Resume after the call once the callee returns.
                control_flow.frames.last_mut().unwrap().program_counter =
                    frame.program_counter + 1;

                match program.function_by_index(callee_index) {
                    Some(Function::Script(_)) => {
                        if control_flow.frames.len() >= CALL_STACK_LIMIT {
                            return Err(RuntimeError::StackOverflow);
                        }
                        let runtime_index = *runtime_function_by_program_index
                            .get(&callee_index)
                            .ok_or(RuntimeError::UnknownFunction { hash })?;
                        let locals_base = control_flow.local_variables_size();
                        control_flow.frames.push(CallFrame {
                            program_function_index: callee_index,
                            runtime_function_index: runtime_index,
                            program_counter: 0,
                            locals_base,
                        });
                        control_flow.set_current_locals_base(locals_base);
                    }
                    Some(Function::Native(native)) => {
                        let mut context = NativeCallContext {
                            control_flow,
                            environment,
                        };
                        (native.handler)(&mut context);
                    }
                    None => return Err(RuntimeError::UnknownFunction { hash }),
                }
            }

            OpcodeKind::Return => {
                Self::tear_down_frame(control_flow);
            }

            OpcodeKind::ExternalCall => {
                let address = control_flow.pop_value() as u64;
                let handler = environment
                    .external_call_handler
                    .as_mut()
                    .ok_or(RuntimeError::MissingExternalHandler)?;
                handler(address);
                control_flow.frames.last_mut().unwrap().program_counter =
                    frame.program_counter + 1;
            }

            OpcodeKind::ExternalJump => {
                let address = control_flow.pop_value() as u64;
                let handler = environment
                    .external_jump_handler
                    .as_mut()
                    .ok_or(RuntimeError::MissingExternalHandler)?;
                handler(address);
                // The script function ends here.
                Self::tear_down_frame(control_flow);
            }

            kind => return Err(RuntimeError::UnhandledOpcode { kind }),
        }
        Ok(())
    }

    fn tear_down_frame(control_flow: &mut ControlFlow) {
        if let Some(frame) = control_flow.frames.pop() {
            control_flow.truncate_var_stack(frame.locals_base);
        }
        let base = control_flow
            .frames
            .last()
            .map(|frame| frame.locals_base)
            .unwrap_or(0);
        control_flow.set_current_locals_base(base);
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("runtime_functions", &self.runtime_functions.len())
            .field("control_flow", &self.control_flow)
            .finish_non_exhaustive()
    }
}
