//! Variables and their storage classes
//!
//! A variable id is a `u32` whose top 4 bits encode the storage class; the
//! remaining 28 bits are an index into the owning registry (the function's
//! local table for locals, the program's variable table otherwise).

use num_enum::TryFromPrimitive;

use super::base_type::DataType;

/// Storage class of a variable, encoded in the top 4 bits of its id.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum StorageClass {
    /// Lives in the current call frame's local-variable area
    Local = 0,
    /// Lives in the program's global memory
    Global = 1,
    /// Accessed through host-provided getter/setter closures
    User = 2,
    /// Backed by host memory reached through a pointer-producing accessor
    External = 3,
}

/// Extract the storage class from a variable id.
pub fn storage_class_of(id: u32) -> StorageClass {
    // The shift leaves 4 bits, all of which map to a class or are invalid;
    // ids are only ever built through make_variable_id.
    StorageClass::try_from((id >> 28) as u8).unwrap_or(StorageClass::Local)
}

/// Build a variable id from a storage class and a registry index.
pub fn make_variable_id(storage_class: StorageClass, index: u32) -> u32 {
    debug_assert!(index < (1 << 28), "variable index out of range");
    ((storage_class as u32) << 28) | index
}

/// Registry index encoded in a variable id.
pub fn variable_index_of(id: u32) -> u32 {
    id & 0x0fff_ffff
}

/// A function-scoped variable with a fixed offset in the call frame.
///
/// Offsets are 8-byte aligned; the frame is zero-initialized on entry.
#[derive(Debug, Clone)]
pub struct LocalVariable {
    /// Variable id (storage class `Local`)
    pub id: u32,
    /// Source name
    pub name: String,
    /// Hash of the source name, used for identifier lookup
    pub name_hash: u64,
    /// Declared type
    pub data_type: DataType,
    /// Byte offset from the frame base
    pub local_memory_offset: u32,
    /// Reserved byte size (8-byte aligned)
    pub local_memory_size: u32,
}

/// Closure that produces the current value of a user-defined variable.
pub type UserVariableGetter = Box<dyn Fn() -> i64>;
/// Closure that consumes a value written to a user-defined variable.
pub type UserVariableSetter = Box<dyn Fn(i64)>;
/// Closure that produces the host memory location backing an external
/// variable. The pointer is resolved once when runtime opcodes are built and
/// must stay valid while they are in use.
pub type ExternalVariableAccessor = Box<dyn Fn() -> *mut u8>;

/// A program-level variable as registered by the host module.
pub enum ProgramVariable {
    /// Backed by a slot in the program's global memory
    Global {
        /// Source name
        name: String,
        /// Declared type
        data_type: DataType,
        /// Value the global memory slot starts out with
        initial_value: i64,
    },
    /// Accessed through host closures
    User {
        /// Source name
        name: String,
        /// Declared type
        data_type: DataType,
        /// Produces the current value
        getter: UserVariableGetter,
        /// Consumes a written value
        setter: UserVariableSetter,
    },
    /// Backed by raw host memory
    External {
        /// Source name
        name: String,
        /// Declared type
        data_type: DataType,
        /// Produces the backing pointer; resolved at dispatch time
        accessor: ExternalVariableAccessor,
    },
}

impl ProgramVariable {
    /// Declared type of the variable.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Global { data_type, .. }
            | Self::User { data_type, .. }
            | Self::External { data_type, .. } => *data_type,
        }
    }

    /// Source name of the variable.
    pub fn name(&self) -> &str {
        match self {
            Self::Global { name, .. } | Self::User { name, .. } | Self::External { name, .. } => {
                name
            }
        }
    }

    /// Storage class this variable registers under.
    pub fn storage_class(&self) -> StorageClass {
        match self {
            Self::Global { .. } => StorageClass::Global,
            Self::User { .. } => StorageClass::User,
            Self::External { .. } => StorageClass::External,
        }
    }
}

impl std::fmt::Debug for ProgramVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global { name, data_type, initial_value } => f
                .debug_struct("Global")
                .field("name", name)
                .field("data_type", data_type)
                .field("initial_value", initial_value)
                .finish(),
            Self::User { name, data_type, .. } => f
                .debug_struct("User")
                .field("name", name)
                .field("data_type", data_type)
                .finish_non_exhaustive(),
            Self::External { name, data_type, .. } => f
                .debug_struct("External")
                .field("name", name)
                .field("data_type", data_type)
                .finish_non_exhaustive(),
        }
    }
}
