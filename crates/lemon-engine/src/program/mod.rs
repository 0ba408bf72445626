//! Data model shared by the compiler backend and the runtime

mod base_type;
mod cast;
mod function;
mod module;
mod opcode;
mod variable;

pub use base_type::{BaseType, DataType};
pub use cast::{get_cast_handling, BaseCastType, CastHandling};
pub use function::{
    add_to_fnv1a_64, build_signature_hash, fnv1a_32, fnv1a_64, name_and_signature_hash,
    void_signature_hash, Function, FunctionFlags, FunctionSignatureInfo, Label, NativeFunction,
    NativeFunctionHandler, Parameter, ScriptFunction,
};
pub use module::{BracketOperator, CompileOptions, GlobalsLookup, Program};
pub use opcode::{Opcode, OpcodeFlags, OpcodeKind};
pub use variable::{
    make_variable_id, storage_class_of, variable_index_of, ExternalVariableAccessor,
    LocalVariable, ProgramVariable, StorageClass, UserVariableGetter, UserVariableSetter,
};
