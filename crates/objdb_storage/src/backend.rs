//! Base-store trait definitions.

use crate::compare::KeyCompare;
use crate::error::StorageResult;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Handle to a named table inside a store.
///
/// Handles are stable for the lifetime of the store and are obtained
/// through [`KvStore::open_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u16);

impl TableId {
    /// Creates a table handle from its raw index.
    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// An ordered, transactional key-value store.
///
/// # Invariants
///
/// - A read transaction observes one consistent snapshot for its lifetime
/// - At most one write transaction exists at a time; `begin_write` blocks
///   until the previous writer commits or aborts
/// - Nothing written through a write transaction is visible until `commit`
/// - Keys within a table are ordered by the table's comparator
pub trait KvStore: Send + Sync {
    /// Opens (or creates) a named table ordered by `compare`.
    ///
    /// Opening an existing name returns the existing handle. Must not be
    /// called while the calling thread holds a write transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot hold another table.
    fn open_table(&self, name: &str, compare: KeyCompare) -> StorageResult<TableId>;

    /// Begins a read-only transaction pinned to the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot provide a snapshot.
    fn begin_read(&self) -> StorageResult<Box<dyn ReadTxn + '_>>;

    /// Begins the write transaction, waiting for any other writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot start a write transaction.
    fn begin_write(&self) -> StorageResult<Box<dyn WriteTxn + '_>>;
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn open_table(&self, name: &str, compare: KeyCompare) -> StorageResult<TableId> {
        (**self).open_table(name, compare)
    }

    fn begin_read(&self) -> StorageResult<Box<dyn ReadTxn + '_>> {
        (**self).begin_read()
    }

    fn begin_write(&self) -> StorageResult<Box<dyn WriteTxn + '_>> {
        (**self).begin_write()
    }
}

/// Read access to one snapshot of a store.
pub trait ReadTxn {
    /// Point lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown.
    fn get(&self, table: TableId, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Opens a forward cursor over `table`.
    ///
    /// The cursor is unpositioned until `seek`, `seek_first` or `seek_last` is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown.
    fn cursor(&self, table: TableId) -> StorageResult<Box<dyn KvCursor + '_>>;
}

/// The single write transaction of a store.
///
/// Reads through a write transaction see its own uncommitted writes.
pub trait WriteTxn: ReadTxn {
    /// Inserts or replaces `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::MapFull`] if the store is out of space.
    fn put(&mut self, table: TableId, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Removes `key`, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown.
    fn delete(&mut self, table: TableId, key: &[u8]) -> StorageResult<bool>;

    /// Publishes every write atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the writes could not be published; in that case
    /// nothing is visible.
    fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards every write.
    fn abort(self: Box<Self>);
}

/// A forward cursor over one table.
pub trait KvCursor {
    /// Positions the cursor at the first key `>= key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying engine fails.
    fn seek(&mut self, key: &[u8]) -> StorageResult<()>;

    /// Positions the cursor at the first key of the table.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying engine fails.
    fn seek_first(&mut self) -> StorageResult<()>;

    /// Positions the cursor at the last key of the table.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying engine fails.
    fn seek_last(&mut self) -> StorageResult<()>;

    /// Returns the entry under the cursor, or `None` when exhausted.
    fn current(&self) -> Option<(&[u8], &[u8])>;

    /// Moves to the next entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying engine fails.
    fn advance(&mut self) -> StorageResult<()>;
}
