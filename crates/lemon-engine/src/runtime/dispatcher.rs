//! Default opcode provider: pairs opcodes with execution functions
//!
//! [`build_runtime_opcode`] translates one compiled opcode into its runtime
//! representation, choosing a monomorphized execution function by opcode
//! kind, data type, and variant, and resolving variable ids into direct
//! offsets, global slots, or host pointers.

use super::control_flow::NativeCallContext;
use super::error::RuntimeError;
use super::memory::SafeArithmetic;
use super::runtime_opcode::{ExecFunc, OpcodeExecContext, RuntimeOpcodeBuffer};
use crate::program::{
    storage_class_of, variable_index_of, BaseCastType, BaseType, Function, FunctionFlags, Opcode,
    OpcodeKind, Program, ProgramVariable, ScriptFunction, StorageClass,
};

/// Dispatch-time configuration.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Execute conditional jumps through a dedicated handler that stores
    /// both branch targets inline, instead of leaving them to the
    /// interpreter loop.
    pub inline_jump_conditional: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            inline_jump_conditional: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Value traits backing the monomorphized handlers
// ---------------------------------------------------------------------------

/// Conversion between a typed value and its 64-bit stack slot.
trait StackValue: Copy {
    fn from_slot(slot: i64) -> Self;
    fn to_slot(self) -> i64;
}

/// Arithmetic shared by integer and floating-point representations.
trait ArithmeticValue: StackValue + SafeArithmetic + PartialEq + PartialOrd {
    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
    fn is_zero(self) -> bool;
}

/// Bit operations, integers only.
trait IntegerValue: ArithmeticValue {
    fn bit_and(self, other: Self) -> Self;
    fn bit_or(self, other: Self) -> Self;
    fn bit_xor(self, other: Self) -> Self;
    fn shift_left(self, amount: Self) -> Self;
    fn shift_right(self, amount: Self) -> Self;
    fn bit_not(self) -> Self;
}

/// Negation, for signed and floating-point representations.
trait NegatableValue: StackValue {
    fn negate(self) -> Self;
}

macro_rules! impl_int_value {
    ($($ty:ty),*) => {
        $(
            impl StackValue for $ty {
                #[inline]
                fn from_slot(slot: i64) -> Self {
                    slot as $ty
                }
                #[inline]
                fn to_slot(self) -> i64 {
                    self as i64
                }
            }

            impl ArithmeticValue for $ty {
                #[inline]
                fn add(self, other: Self) -> Self {
                    self.wrapping_add(other)
                }
                #[inline]
                fn sub(self, other: Self) -> Self {
                    self.wrapping_sub(other)
                }
                #[inline]
                fn mul(self, other: Self) -> Self {
                    self.wrapping_mul(other)
                }
                #[inline]
                fn is_zero(self) -> bool {
                    self == 0
                }
            }

            impl IntegerValue for $ty {
                #[inline]
                fn bit_and(self, other: Self) -> Self {
                    self & other
                }
                #[inline]
                fn bit_or(self, other: Self) -> Self {
                    self | other
                }
                #[inline]
                fn bit_xor(self, other: Self) -> Self {
                    self ^ other
                }
                #[inline]
                fn shift_left(self, amount: Self) -> Self {
                    // Shift amounts wrap at the type width, as the hardware
                    // the scripts model does.
                    let bits = (core::mem::size_of::<$ty>() * 8 - 1) as u64;
                    self << ((amount.to_slot() as u64 & bits) as u32)
                }
                #[inline]
                fn shift_right(self, amount: Self) -> Self {
                    let bits = (core::mem::size_of::<$ty>() * 8 - 1) as u64;
                    self >> ((amount.to_slot() as u64 & bits) as u32)
                }
                #[inline]
                fn bit_not(self) -> Self {
                    !self
                }
            }
        )*
    };
}

impl_int_value!(u8, u16, u32, u64, i8, i16, i32, i64);

impl StackValue for f32 {
    #[inline]
    fn from_slot(slot: i64) -> Self {
        f32::from_bits(slot as u32)
    }
    #[inline]
    fn to_slot(self) -> i64 {
        self.to_bits() as i64
    }
}

impl StackValue for f64 {
    #[inline]
    fn from_slot(slot: i64) -> Self {
        f64::from_bits(slot as u64)
    }
    #[inline]
    fn to_slot(self) -> i64 {
        self.to_bits() as i64
    }
}

macro_rules! impl_float_value {
    ($($ty:ty),*) => {
        $(
            impl ArithmeticValue for $ty {
                #[inline]
                fn add(self, other: Self) -> Self {
                    self + other
                }
                #[inline]
                fn sub(self, other: Self) -> Self {
                    self - other
                }
                #[inline]
                fn mul(self, other: Self) -> Self {
                    self * other
                }
                #[inline]
                fn is_zero(self) -> bool {
                    self == 0.0
                }
            }
        )*
    };
}

impl_float_value!(f32, f64);

macro_rules! impl_negatable {
    ($($ty:ty),*) => {
        $(
            impl NegatableValue for $ty {
                #[inline]
                fn negate(self) -> Self {
                    self.wrapping_neg()
                }
            }
        )*
    };
}

impl_negatable!(i8, i16, i32, i64);

impl NegatableValue for f32 {
    #[inline]
    fn negate(self) -> Self {
        -self
    }
}

impl NegatableValue for f64 {
    #[inline]
    fn negate(self) -> Self {
        -self
    }
}

/// Numeric conversion between stack value types.
trait CastTo<T> {
    fn cast(self) -> T;
}

macro_rules! impl_cast_to {
    ($to:ty) => {
        impl_cast_to!(@impl $to: u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);
    };
    (@impl $to:ty: $($from:ty),*) => {
        $(
            impl CastTo<$to> for $from {
                #[inline]
                fn cast(self) -> $to {
                    self as $to
                }
            }
        )*
    };
}

impl_cast_to!(u8);
impl_cast_to!(u16);
impl_cast_to!(u32);
impl_cast_to!(u64);
impl_cast_to!(i8);
impl_cast_to!(i16);
impl_cast_to!(i32);
impl_cast_to!(i64);
impl_cast_to!(f32);
impl_cast_to!(f64);

// ---------------------------------------------------------------------------
// Execution functions
// ---------------------------------------------------------------------------

fn exec_nop(_context: &mut OpcodeExecContext<'_>) {}

fn exec_not_handled(context: &mut OpcodeExecContext<'_>) {
    context.error = Some(RuntimeError::UnhandledOpcode {
        kind: context.opcode.kind,
    });
}

fn exec_move_stack_positive(context: &mut OpcodeExecContext<'_>) {
    let count = context.opcode.parameter_i64() as isize;
    if let Err(error) = context.control_flow.move_value_stack(count) {
        context.error = Some(error);
    }
}

fn exec_move_stack_negative(context: &mut OpcodeExecContext<'_>) {
    let count = context.opcode.parameter_i64() as isize;
    let _ = context.control_flow.move_value_stack(count);
}

fn exec_move_stack_m1(context: &mut OpcodeExecContext<'_>) {
    context.control_flow.pop_value();
}

fn exec_move_var_stack_positive(context: &mut OpcodeExecContext<'_>) {
    let count = context.opcode.parameter_i64() as usize;
    if let Err(error) = context.control_flow.grow_var_stack(count) {
        context.error = Some(error);
    }
}

fn exec_move_var_stack_negative(context: &mut OpcodeExecContext<'_>) {
    let count = context.opcode.parameter_i64() as isize;
    context.control_flow.move_var_stack(count);
}

fn exec_push_constant(context: &mut OpcodeExecContext<'_>) {
    context
        .control_flow
        .push_value(context.opcode.parameter_i64());
}

fn exec_get_variable_value_local(context: &mut OpcodeExecContext<'_>) {
    let variable_offset = context.opcode.parameter_u64() as u32;
    let value = context.control_flow.read_local_variable(variable_offset);
    context.control_flow.push_value(value);
}

fn exec_set_variable_value_local(context: &mut OpcodeExecContext<'_>) {
    let value = context.control_flow.value(-1);
    let variable_offset = context.opcode.parameter_u64() as u32;
    context
        .control_flow
        .write_local_variable(variable_offset, value);
}

fn exec_get_variable_value_global<T: StackValue>(context: &mut OpcodeExecContext<'_>) {
    let slot_index = context.opcode.parameter_u64() as usize;
    let slot = context.environment.global_memory[slot_index];
    context.control_flow.push_value(T::from_slot(slot).to_slot());
}

fn exec_set_variable_value_global<T: StackValue>(context: &mut OpcodeExecContext<'_>) {
    let value = context.control_flow.value(-1);
    let slot_index = context.opcode.parameter_u64() as usize;
    context.environment.global_memory[slot_index] = T::from_slot(value).to_slot();
}

fn exec_get_variable_value_user(context: &mut OpcodeExecContext<'_>) {
    let variable_id = context.opcode.parameter_u64() as u32;
    match context.program.variable_by_id(variable_id) {
        Some(ProgramVariable::User { getter, .. }) => {
            let value = getter();
            context.control_flow.push_value(value);
        }
        _ => {
            context.error = Some(RuntimeError::UnknownVariable { id: variable_id });
        }
    }
}

fn exec_set_variable_value_user(context: &mut OpcodeExecContext<'_>) {
    let variable_id = context.opcode.parameter_u64() as u32;
    match context.program.variable_by_id(variable_id) {
        Some(ProgramVariable::User { setter, .. }) => {
            // The written value stays on the stack, like any SET.
            setter(context.control_flow.value(-1));
        }
        _ => {
            context.error = Some(RuntimeError::UnknownVariable { id: variable_id });
        }
    }
}

macro_rules! external_variable_accessors {
    ($($get_name:ident / $set_name:ident: $ty:ty),*) => {
        $(
            fn $get_name(context: &mut OpcodeExecContext<'_>) {
                let pointer = context.opcode.parameter_u64() as *const $ty;
                // SAFETY: the host accessor produced this pointer when the
                // runtime opcodes were built and guarantees it stays valid
                // while they are in use.
                let value = unsafe { pointer.read_unaligned() };
                context.control_flow.push_value(value as i64);
            }

            fn $set_name(context: &mut OpcodeExecContext<'_>) {
                let value = context.control_flow.value(-1);
                let pointer = context.opcode.parameter_u64() as *mut $ty;
                // SAFETY: see the matching getter.
                unsafe { pointer.write_unaligned(value as $ty) };
            }
        )*
    };
}

external_variable_accessors!(
    exec_get_variable_value_external_u8 / exec_set_variable_value_external_u8: u8,
    exec_get_variable_value_external_u16 / exec_set_variable_value_external_u16: u16,
    exec_get_variable_value_external_u32 / exec_set_variable_value_external_u32: u32,
    exec_get_variable_value_external_u64 / exec_set_variable_value_external_u64: u64
);

fn exec_read_memory<T: StackValue>(context: &mut OpcodeExecContext<'_>) {
    let address = context.control_flow.value(-1) as u64;
    let raw = context
        .environment
        .memory
        .read(address, core::mem::size_of::<T>());
    context
        .control_flow
        .set_value(-1, T::from_slot(raw as i64).to_slot());
}

fn exec_read_memory_no_consume<T: StackValue>(context: &mut OpcodeExecContext<'_>) {
    let address = context.control_flow.value(-1) as u64;
    let raw = context
        .environment
        .memory
        .read(address, core::mem::size_of::<T>());
    context
        .control_flow
        .push_value(T::from_slot(raw as i64).to_slot());
}

fn exec_write_memory<T: StackValue>(context: &mut OpcodeExecContext<'_>) {
    let value = T::from_slot(context.control_flow.pop_value());
    let address = context.control_flow.value(-1) as u64;
    context
        .environment
        .memory
        .write(address, core::mem::size_of::<T>(), value.to_slot() as u64);
    // Replace the address (now top of stack) with the written value.
    context.control_flow.set_value(-1, value.to_slot());
}

fn exec_cast_value<S, T>(context: &mut OpcodeExecContext<'_>)
where
    S: StackValue + CastTo<T>,
    T: StackValue,
{
    let value = S::from_slot(context.control_flow.value(-1));
    context.control_flow.set_value(-1, value.cast().to_slot());
}

fn exec_make_bool(context: &mut OpcodeExecContext<'_>) {
    let value = context.control_flow.value(-1);
    context
        .control_flow
        .set_value(-1, if value != 0 { 1 } else { 0 });
}

macro_rules! binary_arithmetic_exec {
    ($($name:ident => $bound:ident :: $method:ident),*) => {
        $(
            fn $name<T: $bound>(context: &mut OpcodeExecContext<'_>) {
                let right = T::from_slot(context.control_flow.pop_value());
                let left = T::from_slot(context.control_flow.value(-1));
                context
                    .control_flow
                    .set_value(-1, T::$method(left, right).to_slot());
            }
        )*
    };
}

binary_arithmetic_exec!(
    exec_arithm_binary_add => ArithmeticValue::add,
    exec_arithm_binary_sub => ArithmeticValue::sub,
    exec_arithm_binary_mul => ArithmeticValue::mul,
    exec_arithm_binary_div => ArithmeticValue::safe_divide,
    exec_arithm_binary_mod => ArithmeticValue::safe_modulo,
    exec_arithm_binary_and => IntegerValue::bit_and,
    exec_arithm_binary_or => IntegerValue::bit_or,
    exec_arithm_binary_xor => IntegerValue::bit_xor,
    exec_arithm_binary_shl => IntegerValue::shift_left,
    exec_arithm_binary_shr => IntegerValue::shift_right
);

macro_rules! binary_comparison_exec {
    ($($name:ident => $op:tt),*) => {
        $(
            fn $name<T: ArithmeticValue>(context: &mut OpcodeExecContext<'_>) {
                let right = T::from_slot(context.control_flow.pop_value());
                let left = T::from_slot(context.control_flow.value(-1));
                context
                    .control_flow
                    .set_value(-1, if left $op right { 1 } else { 0 });
            }
        )*
    };
}

binary_comparison_exec!(
    exec_arithm_binary_cmp_eq => ==,
    exec_arithm_binary_cmp_neq => !=,
    exec_arithm_binary_cmp_lt => <,
    exec_arithm_binary_cmp_le => <=,
    exec_arithm_binary_cmp_gt => >,
    exec_arithm_binary_cmp_ge => >=
);

fn exec_arithm_unary_neg<T: NegatableValue>(context: &mut OpcodeExecContext<'_>) {
    let value = T::from_slot(context.control_flow.value(-1));
    context.control_flow.set_value(-1, value.negate().to_slot());
}

fn exec_arithm_unary_not<T: ArithmeticValue>(context: &mut OpcodeExecContext<'_>) {
    let value = T::from_slot(context.control_flow.value(-1));
    context
        .control_flow
        .set_value(-1, if value.is_zero() { 1 } else { 0 });
}

fn exec_arithm_unary_bitnot<T: IntegerValue>(context: &mut OpcodeExecContext<'_>) {
    let value = T::from_slot(context.control_flow.value(-1));
    context.control_flow.set_value(-1, value.bit_not().to_slot());
}

fn exec_jump_conditional(context: &mut OpcodeExecContext<'_>) {
    let condition = context.control_flow.pop_value();
    // Offset 0 holds the branch target (taken when the condition is zero),
    // offset 8 the fallthrough.
    let target = if condition == 0 {
        context.opcode.parameter_u32_at(0)
    } else {
        context.opcode.parameter_u32_at(8)
    };
    context.jump_to = Some(target as usize);
}

fn exec_inline_native_call(context: &mut OpcodeExecContext<'_>) {
    let function_index = context.opcode.parameter_u64() as u32;
    let program = context.program;
    let Some(Function::Native(native)) = program.function_by_index(function_index) else {
        context.error = Some(RuntimeError::UnknownFunction {
            hash: context.opcode.parameter_u64(),
        });
        return;
    };
    let OpcodeExecContext {
        control_flow,
        environment,
        ..
    } = context;
    let mut native_context = NativeCallContext {
        control_flow,
        environment,
    };
    (native.handler)(&mut native_context);
}

fn exec_duplicate_1(context: &mut OpcodeExecContext<'_>) {
    let value = context.control_flow.value(-1);
    context.control_flow.push_value(value);
}

fn exec_duplicate_2(context: &mut OpcodeExecContext<'_>) {
    let lower = context.control_flow.value(-2);
    let upper = context.control_flow.value(-1);
    context.control_flow.push_value(lower);
    context.control_flow.push_value(upper);
}

// ---------------------------------------------------------------------------
// Execution-function selection
// ---------------------------------------------------------------------------

macro_rules! select_exec_func_by_data_type {
    ($function:ident, $opcode:expr) => {
        match $opcode.data_type {
            BaseType::Int8 => $function::<i8> as ExecFunc,
            BaseType::Int16 => $function::<i16> as ExecFunc,
            BaseType::Int32 => $function::<i32> as ExecFunc,
            BaseType::Int64 => $function::<i64> as ExecFunc,
            BaseType::Uint8 | BaseType::Bool => $function::<u8> as ExecFunc,
            BaseType::Uint16 => $function::<u16> as ExecFunc,
            BaseType::Uint32 => $function::<u32> as ExecFunc,
            BaseType::Uint64 | BaseType::IntConst => $function::<u64> as ExecFunc,
            BaseType::Float => $function::<f32> as ExecFunc,
            BaseType::Double => $function::<f64> as ExecFunc,
            BaseType::Void => {
                return Err(RuntimeError::InvalidOpcodeDataType {
                    kind: $opcode.kind,
                    data_type: $opcode.data_type,
                })
            }
        }
    };
}

macro_rules! select_exec_func_by_data_type_int {
    ($function:ident, $opcode:expr) => {
        match $opcode.data_type {
            BaseType::Int8 => $function::<i8> as ExecFunc,
            BaseType::Int16 => $function::<i16> as ExecFunc,
            BaseType::Int32 => $function::<i32> as ExecFunc,
            BaseType::Int64 => $function::<i64> as ExecFunc,
            BaseType::Uint8 | BaseType::Bool => $function::<u8> as ExecFunc,
            BaseType::Uint16 => $function::<u16> as ExecFunc,
            BaseType::Uint32 => $function::<u32> as ExecFunc,
            BaseType::Uint64 | BaseType::IntConst => $function::<u64> as ExecFunc,
            BaseType::Void | BaseType::Float | BaseType::Double => {
                return Err(RuntimeError::InvalidOpcodeDataType {
                    kind: $opcode.kind,
                    data_type: $opcode.data_type,
                })
            }
        }
    };
}

macro_rules! select_exec_func_by_data_type_signed {
    ($function:ident, $opcode:expr) => {
        match $opcode.data_type.make_signed() {
            BaseType::Int8 => $function::<i8> as ExecFunc,
            BaseType::Int16 => $function::<i16> as ExecFunc,
            BaseType::Int32 => $function::<i32> as ExecFunc,
            BaseType::Int64 => $function::<i64> as ExecFunc,
            BaseType::Float => $function::<f32> as ExecFunc,
            BaseType::Double => $function::<f64> as ExecFunc,
            _ => {
                return Err(RuntimeError::InvalidOpcodeDataType {
                    kind: $opcode.kind,
                    data_type: $opcode.data_type,
                })
            }
        }
    };
}

fn select_width_exec_func(
    bytes: usize,
    by_width: [ExecFunc; 4],
    kind: OpcodeKind,
    data_type: BaseType,
) -> Result<ExecFunc, RuntimeError> {
    match bytes {
        1 => Ok(by_width[0]),
        2 => Ok(by_width[1]),
        4 => Ok(by_width[2]),
        8 => Ok(by_width[3]),
        _ => Err(RuntimeError::InvalidOpcodeDataType { kind, data_type }),
    }
}

// ---------------------------------------------------------------------------
// Runtime opcode construction
// ---------------------------------------------------------------------------

/// Translate the opcode at `first_opcode_index` into a runtime opcode
/// appended to `buffer`. Returns the number of source opcodes consumed
/// (always one for the default provider).
pub fn build_runtime_opcode(
    buffer: &mut RuntimeOpcodeBuffer,
    opcodes: &[Opcode],
    first_opcode_index: usize,
    program: &Program,
    function: &ScriptFunction,
    options: &DispatchOptions,
) -> Result<usize, RuntimeError> {
    let opcode = &opcodes[first_opcode_index];

    // Inline parameter size; most opcodes use a single 8-byte parameter,
    // but parameterless ones carry nothing at all.
    let parameter_size = match opcode.kind {
        OpcodeKind::MoveStack => {
            if opcode.parameter == -1 {
                0
            } else {
                8
            }
        }
        OpcodeKind::Nop
        | OpcodeKind::ReadMemory
        | OpcodeKind::WriteMemory
        | OpcodeKind::MakeBool
        | OpcodeKind::ArithmAdd
        | OpcodeKind::ArithmSub
        | OpcodeKind::ArithmMul
        | OpcodeKind::ArithmDiv
        | OpcodeKind::ArithmMod
        | OpcodeKind::ArithmAnd
        | OpcodeKind::ArithmOr
        | OpcodeKind::ArithmXor
        | OpcodeKind::ArithmShl
        | OpcodeKind::ArithmShr
        | OpcodeKind::CompareEq
        | OpcodeKind::CompareNeq
        | OpcodeKind::CompareLt
        | OpcodeKind::CompareLe
        | OpcodeKind::CompareGt
        | OpcodeKind::CompareGe
        | OpcodeKind::ArithmNeg
        | OpcodeKind::ArithmNot
        | OpcodeKind::ArithmBitnot
        | OpcodeKind::Return
        | OpcodeKind::ExternalCall
        | OpcodeKind::ExternalJump => 0,
        OpcodeKind::JumpConditional if options.inline_jump_conditional => 16,
        _ => 8,
    };

    let runtime_opcode = buffer.add_opcode(parameter_size);
    if parameter_size >= 8 {
        // Default usage; several kinds overwrite this with resolved data.
        runtime_opcode.set_parameter_i64(opcode.parameter);
    }
    runtime_opcode.exec_func = exec_not_handled;
    runtime_opcode.kind = opcode.kind;
    runtime_opcode.flags = opcode.flags;

    match opcode.kind {
        OpcodeKind::Nop => {
            runtime_opcode.exec_func = exec_nop;
        }

        OpcodeKind::MoveStack => {
            runtime_opcode.exec_func = if opcode.parameter >= 0 {
                exec_move_stack_positive
            } else if opcode.parameter == -1 {
                exec_move_stack_m1
            } else {
                exec_move_stack_negative
            };
        }

        OpcodeKind::MoveVarStack => {
            runtime_opcode.exec_func = if opcode.parameter >= 0 {
                exec_move_var_stack_positive
            } else {
                exec_move_var_stack_negative
            };
        }

        OpcodeKind::PushConstant => {
            runtime_opcode.exec_func = exec_push_constant;
        }

        OpcodeKind::GetVariableValue => {
            let variable_id = opcode.parameter as u32;
            match storage_class_of(variable_id) {
                StorageClass::Local => {
                    let variable = function
                        .local_variable_by_id(variable_id)
                        .ok_or(RuntimeError::UnknownVariable { id: variable_id })?;
                    runtime_opcode.set_parameter_u64(variable.local_memory_offset as u64);
                    runtime_opcode.exec_func = exec_get_variable_value_local;
                }
                StorageClass::Global => {
                    let Some(ProgramVariable::Global { .. }) = program.variable_by_id(variable_id)
                    else {
                        return Err(RuntimeError::UnknownVariable { id: variable_id });
                    };
                    runtime_opcode.set_parameter_u64(variable_index_of(variable_id) as u64);
                    runtime_opcode.exec_func = select_width_exec_func(
                        opcode.data_type.size_of(),
                        [
                            exec_get_variable_value_global::<u8>,
                            exec_get_variable_value_global::<u16>,
                            exec_get_variable_value_global::<u32>,
                            exec_get_variable_value_global::<u64>,
                        ],
                        opcode.kind,
                        opcode.data_type,
                    )?;
                }
                StorageClass::User => {
                    runtime_opcode.exec_func = exec_get_variable_value_user;
                }
                StorageClass::External => {
                    let Some(ProgramVariable::External {
                        accessor,
                        data_type,
                        ..
                    }) = program.variable_by_id(variable_id)
                    else {
                        return Err(RuntimeError::UnknownVariable { id: variable_id });
                    };
                    runtime_opcode.set_parameter_u64(accessor() as u64);
                    runtime_opcode.exec_func = select_width_exec_func(
                        data_type.base_type().size_of(),
                        [
                            exec_get_variable_value_external_u8,
                            exec_get_variable_value_external_u16,
                            exec_get_variable_value_external_u32,
                            exec_get_variable_value_external_u64,
                        ],
                        opcode.kind,
                        opcode.data_type,
                    )?;
                }
            }
        }

        OpcodeKind::SetVariableValue => {
            let variable_id = opcode.parameter as u32;
            match storage_class_of(variable_id) {
                StorageClass::Local => {
                    let variable = function
                        .local_variable_by_id(variable_id)
                        .ok_or(RuntimeError::UnknownVariable { id: variable_id })?;
                    runtime_opcode.set_parameter_u64(variable.local_memory_offset as u64);
                    runtime_opcode.exec_func = exec_set_variable_value_local;
                }
                StorageClass::Global => {
                    let Some(ProgramVariable::Global { .. }) = program.variable_by_id(variable_id)
                    else {
                        return Err(RuntimeError::UnknownVariable { id: variable_id });
                    };
                    runtime_opcode.set_parameter_u64(variable_index_of(variable_id) as u64);
                    runtime_opcode.exec_func = select_width_exec_func(
                        opcode.data_type.size_of(),
                        [
                            exec_set_variable_value_global::<u8>,
                            exec_set_variable_value_global::<u16>,
                            exec_set_variable_value_global::<u32>,
                            exec_set_variable_value_global::<u64>,
                        ],
                        opcode.kind,
                        opcode.data_type,
                    )?;
                }
                StorageClass::User => {
                    runtime_opcode.exec_func = exec_set_variable_value_user;
                }
                StorageClass::External => {
                    let Some(ProgramVariable::External {
                        accessor,
                        data_type,
                        ..
                    }) = program.variable_by_id(variable_id)
                    else {
                        return Err(RuntimeError::UnknownVariable { id: variable_id });
                    };
                    runtime_opcode.set_parameter_u64(accessor() as u64);
                    runtime_opcode.exec_func = select_width_exec_func(
                        data_type.base_type().size_of(),
                        [
                            exec_set_variable_value_external_u8,
                            exec_set_variable_value_external_u16,
                            exec_set_variable_value_external_u32,
                            exec_set_variable_value_external_u64,
                        ],
                        opcode.kind,
                        opcode.data_type,
                    )?;
                }
            }
        }

        OpcodeKind::ReadMemory => {
            runtime_opcode.exec_func = if opcode.parameter == 0 {
                select_exec_func_by_data_type_int!(exec_read_memory, opcode)
            } else {
                // Variant that keeps the address on the stack.
                select_exec_func_by_data_type_int!(exec_read_memory_no_consume, opcode)
            };
        }

        OpcodeKind::WriteMemory => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type_int!(exec_write_memory, opcode);
        }

        OpcodeKind::CastValue => {
            let cast = BaseCastType::try_from(opcode.parameter as u8).map_err(|_| {
                RuntimeError::UnrecognizedCastType {
                    parameter: opcode.parameter,
                }
            })?;
            runtime_opcode.exec_func = select_cast_exec_func(cast);
        }

        OpcodeKind::MakeBool => {
            runtime_opcode.exec_func = exec_make_bool;
        }

        OpcodeKind::ArithmAdd => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_add, opcode);
        }
        OpcodeKind::ArithmSub => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_sub, opcode);
        }
        OpcodeKind::ArithmMul => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_mul, opcode);
        }
        OpcodeKind::ArithmDiv => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_div, opcode);
        }
        OpcodeKind::ArithmMod => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_mod, opcode);
        }

        OpcodeKind::ArithmAnd => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type_int!(exec_arithm_binary_and, opcode);
        }
        OpcodeKind::ArithmOr => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type_int!(exec_arithm_binary_or, opcode);
        }
        OpcodeKind::ArithmXor => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type_int!(exec_arithm_binary_xor, opcode);
        }
        OpcodeKind::ArithmShl => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type_int!(exec_arithm_binary_shl, opcode);
        }
        OpcodeKind::ArithmShr => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type_int!(exec_arithm_binary_shr, opcode);
        }

        OpcodeKind::CompareEq => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_cmp_eq, opcode);
        }
        OpcodeKind::CompareNeq => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_cmp_neq, opcode);
        }
        OpcodeKind::CompareLt => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_cmp_lt, opcode);
        }
        OpcodeKind::CompareLe => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_cmp_le, opcode);
        }
        OpcodeKind::CompareGt => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_cmp_gt, opcode);
        }
        OpcodeKind::CompareGe => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_binary_cmp_ge, opcode);
        }

        OpcodeKind::ArithmNeg => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type_signed!(exec_arithm_unary_neg, opcode);
        }
        OpcodeKind::ArithmNot => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type!(exec_arithm_unary_not, opcode);
        }
        OpcodeKind::ArithmBitnot => {
            runtime_opcode.exec_func =
                select_exec_func_by_data_type_int!(exec_arithm_unary_bitnot, opcode);
        }

        OpcodeKind::Jump
        | OpcodeKind::Return
        | OpcodeKind::ExternalCall
        | OpcodeKind::ExternalJump => {
            // The interpreter loop performs these itself.
            runtime_opcode.successive_handled_opcodes = 0;
            return Ok(1);
        }

        OpcodeKind::JumpConditional => {
            if options.inline_jump_conditional {
                runtime_opcode.exec_func = exec_jump_conditional;
                // Branch target when the condition is zero, then the
                // fallthrough position.
                runtime_opcode.set_parameter_u32_at(0, opcode.parameter as u32);
                runtime_opcode.set_parameter_u32_at(8, (first_opcode_index + 1) as u32);
                runtime_opcode.successive_handled_opcodes = 1;
            } else {
                runtime_opcode.successive_handled_opcodes = 0;
            }
            return Ok(1);
        }

        OpcodeKind::Call => {
            let is_base_call = opcode.data_type != BaseType::Void;
            if is_base_call {
                runtime_opcode.is_base_call = true;
            } else {
                // A native callee that allows it is rewritten into an
                // inline call without the usual call-frame overhead.
                let hash = opcode.parameter as u64;
                if let Some(index) = program.function_index_by_signature(hash) {
                    if let Some(callee @ Function::Native(_)) = program.function_by_index(index) {
                        if callee.flags().contains(FunctionFlags::ALLOW_INLINE_EXECUTION) {
                            runtime_opcode.exec_func = exec_inline_native_call;
                            runtime_opcode.set_parameter_u64(index as u64);
                            runtime_opcode.successive_handled_opcodes = 1;
                            return Ok(1);
                        }
                    }
                }
            }

            runtime_opcode.successive_handled_opcodes = 0;
            return Ok(1);
        }

        OpcodeKind::Duplicate => {
            runtime_opcode.exec_func = match opcode.parameter {
                1 => exec_duplicate_1,
                2 => exec_duplicate_2,
                count => return Err(RuntimeError::UnsupportedDuplicateCount { count }),
            };
        }

        OpcodeKind::JumpSwitch => {
            // Handled by the interpreter loop.
            runtime_opcode.successive_handled_opcodes = 0;
            return Ok(1);
        }
    }

    runtime_opcode.successive_handled_opcodes = 1;
    Ok(1)
}

fn select_cast_exec_func(cast: BaseCastType) -> ExecFunc {
    match cast {
        // Cast down (signed or unsigned makes no difference here)
        BaseCastType::Int16To8 => exec_cast_value::<u16, u8> as ExecFunc,
        BaseCastType::Int32To8 => exec_cast_value::<u32, u8>,
        BaseCastType::Int64To8 => exec_cast_value::<u64, u8>,
        BaseCastType::Int32To16 => exec_cast_value::<u32, u16>,
        BaseCastType::Int64To16 => exec_cast_value::<u64, u16>,
        BaseCastType::Int64To32 => exec_cast_value::<u64, u32>,

        // Cast up (value is unsigned, widened with zeroes)
        BaseCastType::Uint8To16 => exec_cast_value::<u8, u16>,
        BaseCastType::Uint8To32 => exec_cast_value::<u8, u32>,
        BaseCastType::Uint8To64 => exec_cast_value::<u8, u64>,
        BaseCastType::Uint16To32 => exec_cast_value::<u16, u32>,
        BaseCastType::Uint16To64 => exec_cast_value::<u16, u64>,
        BaseCastType::Uint32To64 => exec_cast_value::<u32, u64>,

        // Cast up (value is signed, widened with the sign bit)
        BaseCastType::Sint8To16 => exec_cast_value::<i8, i16>,
        BaseCastType::Sint8To32 => exec_cast_value::<i8, i32>,
        BaseCastType::Sint8To64 => exec_cast_value::<i8, i64>,
        BaseCastType::Sint16To32 => exec_cast_value::<i16, i32>,
        BaseCastType::Sint16To64 => exec_cast_value::<i16, i64>,
        BaseCastType::Sint32To64 => exec_cast_value::<i32, i64>,

        // Integer cast to float
        BaseCastType::Uint8ToFloat => exec_cast_value::<u8, f32>,
        BaseCastType::Uint16ToFloat => exec_cast_value::<u16, f32>,
        BaseCastType::Uint32ToFloat => exec_cast_value::<u32, f32>,
        BaseCastType::Uint64ToFloat => exec_cast_value::<u64, f32>,
        BaseCastType::Sint8ToFloat => exec_cast_value::<i8, f32>,
        BaseCastType::Sint16ToFloat => exec_cast_value::<i16, f32>,
        BaseCastType::Sint32ToFloat => exec_cast_value::<i32, f32>,
        BaseCastType::Sint64ToFloat => exec_cast_value::<i64, f32>,

        BaseCastType::Uint8ToDouble => exec_cast_value::<u8, f64>,
        BaseCastType::Uint16ToDouble => exec_cast_value::<u16, f64>,
        BaseCastType::Uint32ToDouble => exec_cast_value::<u32, f64>,
        BaseCastType::Uint64ToDouble => exec_cast_value::<u64, f64>,
        BaseCastType::Sint8ToDouble => exec_cast_value::<i8, f64>,
        BaseCastType::Sint16ToDouble => exec_cast_value::<i16, f64>,
        BaseCastType::Sint32ToDouble => exec_cast_value::<i32, f64>,
        BaseCastType::Sint64ToDouble => exec_cast_value::<i64, f64>,

        // Float cast to integer
        BaseCastType::FloatToUint8 => exec_cast_value::<f32, u8>,
        BaseCastType::FloatToUint16 => exec_cast_value::<f32, u16>,
        BaseCastType::FloatToUint32 => exec_cast_value::<f32, u32>,
        BaseCastType::FloatToUint64 => exec_cast_value::<f32, u64>,
        BaseCastType::FloatToSint8 => exec_cast_value::<f32, i8>,
        BaseCastType::FloatToSint16 => exec_cast_value::<f32, i16>,
        BaseCastType::FloatToSint32 => exec_cast_value::<f32, i32>,
        BaseCastType::FloatToSint64 => exec_cast_value::<f32, i64>,

        BaseCastType::DoubleToUint8 => exec_cast_value::<f64, u8>,
        BaseCastType::DoubleToUint16 => exec_cast_value::<f64, u16>,
        BaseCastType::DoubleToUint32 => exec_cast_value::<f64, u32>,
        BaseCastType::DoubleToUint64 => exec_cast_value::<f64, u64>,
        BaseCastType::DoubleToSint8 => exec_cast_value::<f64, i8>,
        BaseCastType::DoubleToSint16 => exec_cast_value::<f64, i16>,
        BaseCastType::DoubleToSint32 => exec_cast_value::<f64, i32>,
        BaseCastType::DoubleToSint64 => exec_cast_value::<f64, i64>,

        // Float cast
        BaseCastType::FloatToDouble => exec_cast_value::<f32, f64>,
        BaseCastType::DoubleToFloat => exec_cast_value::<f64, f32>,
    }
}
