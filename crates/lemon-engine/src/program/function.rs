//! Functions: the unit of compilation and the unit of dispatch
//!
//! A [`ScriptFunction`] owns the opcode vector the backend compiler writes
//! and the optimizer rewrites. A [`NativeFunction`] wraps a host closure.
//! Both are identified at call sites by a name-and-signature hash, so
//! overloads resolve to distinct callees.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use super::base_type::DataType;
use super::opcode::Opcode;
use super::variable::{make_variable_id, LocalVariable, StorageClass};
use crate::compiler::CompileError;
use crate::runtime::NativeCallContext;

const FNV1A_64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV1A_64_PRIME: u64 = 0x0000_0100_0000_01b3;
const FNV1A_32_OFFSET: u32 = 0x811c_9dc5;
const FNV1A_32_PRIME: u32 = 0x0100_0193;

/// FNV-1a over a byte slice, 64-bit variant.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    add_to_fnv1a_64(FNV1A_64_OFFSET, bytes)
}

/// Continue an FNV-1a 64-bit accumulation with more bytes.
pub fn add_to_fnv1a_64(mut hash: u64, bytes: &[u8]) -> u64 {
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV1A_64_PRIME);
    }
    hash
}

/// FNV-1a over a byte slice, 32-bit variant.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV1A_32_OFFSET;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV1A_32_PRIME);
    }
    hash
}

bitflags! {
    /// Capability flags on a function.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FunctionFlags: u8 {
        /// Native function that may be rewritten into an inline runtime
        /// opcode, skipping the usual call-frame handling
        const ALLOW_INLINE_EXECUTION = 0x01;
    }
}

/// Parameter and return types of a callable, as seen by the emitter.
#[derive(Debug, Clone)]
pub struct FunctionSignatureInfo {
    /// Declared parameter types, in source order
    pub parameter_types: Vec<DataType>,
    /// Declared return type
    pub return_type: DataType,
}

/// A declared function parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Source name
    pub name: String,
    /// Declared type
    pub data_type: DataType,
}

/// A label bound inside a script function.
///
/// Offsets are opcode indices; the optimizer retargets them when it compacts
/// the opcode vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// Source name
    pub name: String,
    /// Opcode index the label is bound to
    pub offset: u32,
}

/// Stable digest of a function's return and parameter types.
///
/// Two overloads of the same name produce different signature hashes; the
/// hash is never zero.
pub fn build_signature_hash(return_type: DataType, parameter_types: &[DataType]) -> u32 {
    let mut words: Vec<u32> = Vec::with_capacity(1 + parameter_types.len());
    words.push(return_type.type_id());
    words.extend(parameter_types.iter().map(|data_type| data_type.type_id()));

    let mut hash = hash_u32_words(&words);
    while hash == 0 {
        // Rare, but zero is reserved as the "not yet computed" sentinel.
        words.push(0xcd00_0000);
        hash = hash_u32_words(&words);
    }
    hash
}

fn hash_u32_words(words: &[u32]) -> u32 {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    fnv1a_32(&bytes)
}

/// Signature hash of a parameterless void function, the most common lookup
/// shape for entry points. Computed once.
pub fn void_signature_hash() -> u32 {
    static HASH: once_cell::sync::Lazy<u32> =
        once_cell::sync::Lazy::new(|| build_signature_hash(DataType::Void, &[]));
    *HASH
}

/// Combine a function name hash with a signature hash into the 64-bit call
/// identity used by `CALL` opcodes.
pub fn name_and_signature_hash(name_hash: u64, signature_hash: u32) -> u64 {
    name_hash.wrapping_add(signature_hash as u64)
}

/// A compiled script function.
pub struct ScriptFunction {
    /// Source name
    pub name: String,
    /// FNV-1a hash of the source name
    pub name_hash: u64,
    /// Declared parameters, in source order
    pub parameters: Vec<Parameter>,
    /// Declared return type
    pub return_type: DataType,
    /// Signature digest of return and parameter types
    pub signature_hash: u32,
    /// Compiled opcodes; written by the emitter, rewritten by the optimizer
    pub opcodes: Vec<Opcode>,
    /// Labels bound by emission, retargeted by optimization
    pub labels: Vec<Label>,
    /// Local variables in id order; parameters come first
    pub local_variables: Vec<LocalVariable>,
    locals_by_name_hash: FxHashMap<u64, u32>,
    /// Total frame size in bytes, a multiple of 8
    pub local_variables_memory_size: u32,
    /// First source line of the function body
    pub start_line_number: u32,
}

impl ScriptFunction {
    /// Create an empty function shell; parameters must be registered as
    /// local variables before compiling the body.
    pub fn new(name: &str, parameters: Vec<Parameter>, return_type: DataType) -> Self {
        let parameter_types: Vec<DataType> =
            parameters.iter().map(|parameter| parameter.data_type).collect();
        Self {
            name: name.to_string(),
            name_hash: fnv1a_64(name.as_bytes()),
            parameters,
            return_type,
            signature_hash: build_signature_hash(return_type, &parameter_types),
            opcodes: Vec::new(),
            labels: Vec::new(),
            local_variables: Vec::new(),
            locals_by_name_hash: FxHashMap::default(),
            local_variables_memory_size: 0,
            start_line_number: 0,
        }
    }

    /// The 64-bit call identity of this function.
    pub fn name_and_signature_hash(&self) -> u64 {
        name_and_signature_hash(self.name_hash, self.signature_hash)
    }

    /// Register a new local variable and reserve its frame slot.
    ///
    /// Slots are 8-byte aligned so every local starts on a value-stack slot
    /// boundary.
    pub fn add_local_variable(
        &mut self,
        name: &str,
        data_type: DataType,
        line_number: u32,
    ) -> Result<u32, CompileError> {
        let name_hash = fnv1a_64(name.as_bytes());
        if self.locals_by_name_hash.contains_key(&name_hash) {
            return Err(CompileError::DuplicateVariable {
                name: name.to_string(),
                line: line_number,
            });
        }

        let index = self.local_variables.len() as u32;
        let id = make_variable_id(StorageClass::Local, index);
        let size = (data_type.base_type().size_of() as u32 + 7) / 8 * 8;
        self.local_variables.push(LocalVariable {
            id,
            name: name.to_string(),
            name_hash,
            data_type,
            local_memory_offset: self.local_variables_memory_size,
            local_memory_size: size,
        });
        self.locals_by_name_hash.insert(name_hash, index);
        self.local_variables_memory_size += size;
        Ok(id)
    }

    /// Look up a local variable by the hash of its source name.
    pub fn local_variable_by_name_hash(&self, name_hash: u64) -> Option<&LocalVariable> {
        self.locals_by_name_hash
            .get(&name_hash)
            .map(|&index| &self.local_variables[index as usize])
    }

    /// Look up a local variable by its id.
    pub fn local_variable_by_id(&self, id: u32) -> Option<&LocalVariable> {
        self.local_variables
            .get(super::variable::variable_index_of(id) as usize)
    }

    /// Bind a label name to the given opcode offset.
    pub fn add_label(&mut self, name: &str, offset: usize) {
        self.labels.push(Label {
            name: name.to_string(),
            offset: offset as u32,
        });
    }

    /// Find a label by name.
    pub fn find_label_by_name(&self, name: &str) -> Option<&Label> {
        self.labels.iter().find(|label| label.name == name)
    }

    /// Find a label bound at the given opcode offset.
    ///
    /// Multiple labels at the same offset return the first one.
    pub fn find_label_by_offset(&self, offset: usize) -> Option<&Label> {
        self.labels.iter().find(|label| label.offset as usize == offset)
    }

    /// Accumulate this function's opcodes into a build hash.
    ///
    /// The digest covers each opcode's kind, data type, and parameter (the
    /// parameter only when non-zero), so two builds that differ only in
    /// comments or whitespace hash identically.
    pub fn add_to_compiled_hash(&self, mut hash: u64) -> u64 {
        for opcode in &self.opcodes {
            hash = add_to_fnv1a_64(hash, &[opcode.kind as u8, opcode.data_type as u8]);
            if opcode.parameter != 0 {
                hash = add_to_fnv1a_64(hash, &opcode.parameter.to_le_bytes());
            }
        }
        hash
    }

    /// Compiled hash of this function alone.
    pub fn compiled_hash(&self) -> u64 {
        self.add_to_compiled_hash(FNV1A_64_OFFSET)
    }
}

impl std::fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("name", &self.name)
            .field("parameters", &self.parameters.len())
            .field("return_type", &self.return_type)
            .field("opcodes", &self.opcodes.len())
            .finish_non_exhaustive()
    }
}

/// Host closure invoked when a native function is called.
pub type NativeFunctionHandler = Box<dyn Fn(&mut NativeCallContext<'_>)>;

/// A host-implemented function callable from script code.
///
/// The handler pops its arguments from the value stack (right to left) and
/// pushes its return value, matching the calling convention of script
/// functions.
pub struct NativeFunction {
    /// Source-visible name
    pub name: String,
    /// FNV-1a hash of the name
    pub name_hash: u64,
    /// Declared parameters
    pub parameters: Vec<Parameter>,
    /// Declared return type
    pub return_type: DataType,
    /// Signature digest
    pub signature_hash: u32,
    /// Capability flags
    pub flags: FunctionFlags,
    /// Host implementation
    pub handler: NativeFunctionHandler,
}

impl NativeFunction {
    /// Create a native function from its declared signature and handler.
    pub fn new(
        name: &str,
        parameters: Vec<Parameter>,
        return_type: DataType,
        flags: FunctionFlags,
        handler: NativeFunctionHandler,
    ) -> Self {
        let parameter_types: Vec<DataType> =
            parameters.iter().map(|parameter| parameter.data_type).collect();
        Self {
            name: name.to_string(),
            name_hash: fnv1a_64(name.as_bytes()),
            parameters,
            return_type,
            signature_hash: build_signature_hash(return_type, &parameter_types),
            flags,
            handler,
        }
    }

    /// The 64-bit call identity of this function.
    pub fn name_and_signature_hash(&self) -> u64 {
        name_and_signature_hash(self.name_hash, self.signature_hash)
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("parameters", &self.parameters.len())
            .field("return_type", &self.return_type)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Either kind of callable registered in a program.
#[derive(Debug)]
pub enum Function {
    /// Compiled from script source
    Script(ScriptFunction),
    /// Implemented by the host
    Native(NativeFunction),
}

impl Function {
    /// Source name.
    pub fn name(&self) -> &str {
        match self {
            Self::Script(function) => &function.name,
            Self::Native(function) => &function.name,
        }
    }

    /// Declared parameters.
    pub fn parameters(&self) -> &[Parameter] {
        match self {
            Self::Script(function) => &function.parameters,
            Self::Native(function) => &function.parameters,
        }
    }

    /// Declared return type.
    pub fn return_type(&self) -> DataType {
        match self {
            Self::Script(function) => function.return_type,
            Self::Native(function) => function.return_type,
        }
    }

    /// The 64-bit call identity.
    pub fn name_and_signature_hash(&self) -> u64 {
        match self {
            Self::Script(function) => function.name_and_signature_hash(),
            Self::Native(function) => function.name_and_signature_hash(),
        }
    }

    /// Capability flags; script functions carry none.
    pub fn flags(&self) -> FunctionFlags {
        match self {
            Self::Script(_) => FunctionFlags::empty(),
            Self::Native(function) => function.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::base_type::BaseType;
    use crate::program::opcode::OpcodeKind;

    #[test]
    fn test_fnv1a_reference_values() {
        // Standard FNV-1a test vectors.
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
    }

    #[test]
    fn test_void_signature_hash_is_cached_and_consistent() {
        assert_eq!(void_signature_hash(), build_signature_hash(DataType::Void, &[]));
        assert_eq!(void_signature_hash(), void_signature_hash());
        let main = ScriptFunction::new("main", Vec::new(), DataType::Void);
        assert_eq!(main.signature_hash, void_signature_hash());
    }

    #[test]
    fn test_signature_hash_distinguishes_overloads() {
        let u8_type = DataType::Base(BaseType::Uint8);
        let u16_type = DataType::Base(BaseType::Uint16);
        let first = build_signature_hash(DataType::Void, &[u8_type]);
        let second = build_signature_hash(DataType::Void, &[u16_type]);
        let third = build_signature_hash(DataType::Void, &[u8_type, u8_type]);
        assert_ne!(first, second);
        assert_ne!(first, third);
        assert_ne!(first, 0);
    }

    #[test]
    fn test_local_variable_alignment() {
        let mut function = ScriptFunction::new("f", Vec::new(), DataType::Void);
        let first = function
            .add_local_variable("a", DataType::Base(BaseType::Uint8), 1)
            .unwrap();
        let second = function
            .add_local_variable("b", DataType::Base(BaseType::Uint64), 1)
            .unwrap();

        let a = function.local_variable_by_id(first).unwrap();
        let b = function.local_variable_by_id(second).unwrap();
        assert_eq!(a.local_memory_offset, 0);
        assert_eq!(a.local_memory_size, 8);
        assert_eq!(b.local_memory_offset, 8);
        assert_eq!(function.local_variables_memory_size, 16);
    }

    #[test]
    fn test_duplicate_local_is_rejected() {
        let mut function = ScriptFunction::new("f", Vec::new(), DataType::Void);
        function
            .add_local_variable("a", DataType::Base(BaseType::Uint8), 1)
            .unwrap();
        let result = function.add_local_variable("a", DataType::Base(BaseType::Uint8), 2);
        assert!(matches!(result, Err(CompileError::DuplicateVariable { .. })));
    }

    #[test]
    fn test_compiled_hash_ignores_line_numbers() {
        let mut first = ScriptFunction::new("f", Vec::new(), DataType::Void);
        first
            .opcodes
            .push(crate::program::opcode::Opcode::new(OpcodeKind::Return, BaseType::Void, 0, 3));

        let mut second = ScriptFunction::new("f", Vec::new(), DataType::Void);
        second
            .opcodes
            .push(crate::program::opcode::Opcode::new(OpcodeKind::Return, BaseType::Void, 0, 99));

        assert_eq!(first.compiled_hash(), second.compiled_hash());
    }

    #[test]
    fn test_compiled_hash_sees_parameters() {
        let mut first = ScriptFunction::new("f", Vec::new(), DataType::Void);
        first
            .opcodes
            .push(crate::program::opcode::Opcode::new(OpcodeKind::PushConstant, BaseType::IntConst, 1, 1));

        let mut second = ScriptFunction::new("f", Vec::new(), DataType::Void);
        second
            .opcodes
            .push(crate::program::opcode::Opcode::new(OpcodeKind::PushConstant, BaseType::IntConst, 2, 1));

        assert_ne!(first.compiled_hash(), second.compiled_hash());
    }
}
