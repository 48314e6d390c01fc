//! Error types for objdb core.

use crate::codec::ObjId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in objdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Base store error.
    #[error("storage error: {0}")]
    Storage(#[from] objdb_storage::StorageError),

    /// A transaction arena ran out of reserved address space.
    #[error("arena exhausted: {requested} bytes requested, {used} of {capacity} in use")]
    ArenaExhausted {
        /// Bytes requested by the failing allocation.
        requested: usize,
        /// Bytes already allocated.
        used: usize,
        /// Reserved capacity.
        capacity: usize,
    },

    /// A history record was written by an incompatible format version.
    #[error("history format mismatch: expected version {expected}, found {found}")]
    HistoryFormat {
        /// Version this build understands.
        expected: u16,
        /// Version found in the record.
        found: u16,
    },

    /// A stored record could not be decoded.
    #[error("corrupted record: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The object id already denotes a live object.
    #[error("object already exists: {0}")]
    ObjectExists(ObjId),

    /// The object does not exist.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjId),

    /// The type id is not defined in the model.
    #[error("unknown type: {0}")]
    UnknownType(ObjId),

    /// The field is not defined on the object's type.
    #[error("field {field} is not defined on type {type_id}")]
    UnknownField {
        /// The object's type.
        type_id: ObjId,
        /// The offending field.
        field: ObjId,
    },

    /// The value does not match the field's data type.
    #[error("type mismatch on field {field}: {message}")]
    TypeMismatch {
        /// The field being written.
        field: ObjId,
        /// Description of the mismatch.
        message: String,
    },

    /// A mutation was attempted through a read-only session.
    #[error("session is read-only")]
    ReadOnly,

    /// An argument was invalid.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a corrupted record error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(field: ObjId, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            field,
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true if the error points at an environment or corruption
    /// problem. Fatal errors abort the operation and must not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_fatal(),
            Self::ArenaExhausted { .. } | Self::HistoryFormat { .. } | Self::Corrupted { .. } => {
                true
            }
            _ => false,
        }
    }
}
