//! Program: the registry the compiler reads and the runtime executes
//!
//! A [`Program`] collects every callable function, every program-level
//! variable, and the per-array-type bracket operators. The emitter consumes
//! a read-only [`GlobalsLookup`] snapshot of the signatures; the runtime
//! consumes the program itself.

use rustc_hash::FxHashMap;

use super::base_type::{BaseType, DataType};
use super::function::{Function, FunctionSignatureInfo};
use super::variable::{make_variable_id, variable_index_of, ProgramVariable};

/// Backend compilation settings supplied by the host module.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Type that `call`/`jump` statement arguments are coerced to
    pub external_address_type: DataType,
    /// Script language feature level; level 2 turns discarded comparison
    /// results into compile errors
    pub script_feature_level: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            external_address_type: DataType::Base(BaseType::Uint32),
            script_feature_level: 1,
        }
    }
}

/// Accessors backing the `[]` operator of an array type.
#[derive(Debug, Clone, Copy)]
pub struct BracketOperator {
    /// Call identity of the element getter, if reads are supported
    pub getter: Option<u64>,
    /// Call identity of the element setter, if writes are supported
    pub setter: Option<u64>,
    /// Declared type of the index parameter
    pub parameter_type: DataType,
}

/// Everything the compiler and runtime share about one loaded module.
#[derive(Debug, Default)]
pub struct Program {
    functions: Vec<Function>,
    // Registration order per hash is the overload chain; base calls resolve
    // to the entry below the current one.
    functions_by_hash: FxHashMap<u64, Vec<u32>>,
    variables: Vec<ProgramVariable>,
    bracket_operators: FxHashMap<u16, BracketOperator>,
    /// Backend compilation settings
    pub compile_options: CompileOptions,
}

impl Program {
    /// Create an empty program with the given options.
    pub fn new(compile_options: CompileOptions) -> Self {
        Self {
            compile_options,
            ..Self::default()
        }
    }

    /// Register a function and return its index.
    pub fn add_function(&mut self, function: Function) -> u32 {
        let hash = function.name_and_signature_hash();
        let index = self.functions.len() as u32;
        self.functions.push(function);
        self.functions_by_hash.entry(hash).or_default().push(index);
        index
    }

    /// All registered functions in registration order.
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Function by index.
    pub fn function_by_index(&self, index: u32) -> Option<&Function> {
        self.functions.get(index as usize)
    }

    /// Most recently registered function with the given call identity.
    pub fn function_by_signature(&self, hash: u64) -> Option<&Function> {
        self.function_index_by_signature(hash)
            .map(|index| &self.functions[index as usize])
    }

    /// Index of the most recently registered function with the given call
    /// identity.
    pub fn function_index_by_signature(&self, hash: u64) -> Option<u32> {
        self.functions_by_hash
            .get(&hash)
            .and_then(|chain| chain.last())
            .copied()
    }

    /// Resolve a base call: the overload registered directly below
    /// `current_index` in the chain for `hash`.
    pub fn resolve_base_function(&self, hash: u64, current_index: u32) -> Option<u32> {
        let chain = self.functions_by_hash.get(&hash)?;
        let position = chain.iter().position(|&index| index == current_index)?;
        if position == 0 {
            None
        } else {
            Some(chain[position - 1])
        }
    }

    /// Register a program-level variable and return its id (storage class
    /// encoded in the top 4 bits).
    pub fn add_variable(&mut self, variable: ProgramVariable) -> u32 {
        let storage_class = variable.storage_class();
        let index = self.variables.len() as u32;
        self.variables.push(variable);
        make_variable_id(storage_class, index)
    }

    /// Variable by id.
    pub fn variable_by_id(&self, id: u32) -> Option<&ProgramVariable> {
        self.variables.get(variable_index_of(id) as usize)
    }

    /// Number of registered program-level variables; the runtime sizes its
    /// global memory by this.
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Initial contents of the runtime's global memory, one slot per
    /// registered variable.
    pub fn initial_global_memory(&self) -> Vec<i64> {
        self.variables
            .iter()
            .map(|variable| match variable {
                ProgramVariable::Global { initial_value, .. } => *initial_value,
                _ => 0,
            })
            .collect()
    }

    /// Register the bracket operator of an array type.
    pub fn register_bracket_operator(&mut self, array_type_id: u16, operator: BracketOperator) {
        self.bracket_operators.insert(array_type_id, operator);
    }

    /// Bracket operator of an array type.
    pub fn bracket_operator(&self, array_type_id: u16) -> Option<&BracketOperator> {
        self.bracket_operators.get(&array_type_id)
    }

    /// Build the read-only signature snapshot the emitter works against.
    pub fn globals_lookup(&self) -> GlobalsLookup {
        let mut functions = FxHashMap::default();
        for function in &self.functions {
            functions.insert(
                function.name_and_signature_hash(),
                FunctionSignatureInfo {
                    parameter_types: function
                        .parameters()
                        .iter()
                        .map(|parameter| parameter.data_type)
                        .collect(),
                    return_type: function.return_type(),
                },
            );
        }
        GlobalsLookup {
            functions,
            bracket_operators: self.bracket_operators.clone(),
        }
    }
}

/// Read-only view of the program's callable signatures, consumed by the
/// emitter while it compiles function bodies.
#[derive(Debug, Clone, Default)]
pub struct GlobalsLookup {
    functions: FxHashMap<u64, FunctionSignatureInfo>,
    bracket_operators: FxHashMap<u16, BracketOperator>,
}

impl GlobalsLookup {
    /// Signature of the function with the given call identity.
    pub fn function_signature(&self, hash: u64) -> Option<&FunctionSignatureInfo> {
        self.functions.get(&hash)
    }

    /// Bracket operator of an array type.
    pub fn bracket_operator(&self, array_type_id: u16) -> Option<&BracketOperator> {
        self.bracket_operators.get(&array_type_id)
    }

    /// Register a signature directly; used by tests and by hosts that
    /// compile against declarations before the callees exist.
    pub fn insert_signature(&mut self, hash: u64, signature: FunctionSignatureInfo) {
        self.functions.insert(hash, signature);
    }

    /// Register a bracket operator directly.
    pub fn insert_bracket_operator(&mut self, array_type_id: u16, operator: BracketOperator) {
        self.bracket_operators.insert(array_type_id, operator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::function::{Parameter, ScriptFunction};

    fn void_function(name: &str) -> Function {
        Function::Script(ScriptFunction::new(name, Vec::new(), DataType::Void))
    }

    #[test]
    fn test_overload_chain_resolution() {
        let mut program = Program::default();
        let first = program.add_function(void_function("update"));
        let second = program.add_function(void_function("update"));
        let hash = program.functions()[0].name_and_signature_hash();

        // Latest registration wins for plain calls.
        assert_eq!(program.function_index_by_signature(hash), Some(second));
        // A base call from the latest resolves to the one below.
        assert_eq!(program.resolve_base_function(hash, second), Some(first));
        assert_eq!(program.resolve_base_function(hash, first), None);
    }

    #[test]
    fn test_signatures_distinguish_overloads_by_parameters() {
        let mut program = Program::default();
        program.add_function(void_function("f"));
        program.add_function(Function::Script(ScriptFunction::new(
            "f",
            vec![Parameter {
                name: "x".to_string(),
                data_type: DataType::Base(BaseType::Uint32),
            }],
            DataType::Void,
        )));

        let plain = program.functions()[0].name_and_signature_hash();
        let with_parameter = program.functions()[1].name_and_signature_hash();
        assert_ne!(plain, with_parameter);
        assert_eq!(program.function_index_by_signature(plain), Some(0));
        assert_eq!(program.function_index_by_signature(with_parameter), Some(1));
    }

    #[test]
    fn test_global_memory_initialization() {
        let mut program = Program::default();
        let id = program.add_variable(ProgramVariable::Global {
            name: "score".to_string(),
            data_type: DataType::Base(BaseType::Uint32),
            initial_value: 77,
        });
        assert_eq!(variable_index_of(id), 0);
        assert_eq!(program.initial_global_memory(), vec![77]);
    }
}
