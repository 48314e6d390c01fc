//! Error types for storage operations.

use crate::backend::TableId;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store has no room left for the write.
    ///
    /// This is not recoverable by retrying; the store must be reconfigured.
    #[error("map full: {required} bytes required, limit is {limit}")]
    MapFull {
        /// Bytes the store would hold after the write.
        required: usize,
        /// Configured map size.
        limit: usize,
    },

    /// The table handle does not exist in this transaction's snapshot.
    #[error("unknown table: {0}")]
    UnknownTable(TableId),

    /// The store reached its table limit.
    #[error("too many tables: limit is {limit}")]
    TooManyTables {
        /// Maximum number of tables.
        limit: usize,
    },
}

impl StorageError {
    /// Returns true if the error indicates an environment problem that
    /// retrying cannot fix.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MapFull { .. } | Self::TooManyTables { .. })
    }
}
