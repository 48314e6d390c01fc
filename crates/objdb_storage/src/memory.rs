//! In-memory base store.

use crate::backend::{KvCursor, KvStore, ReadTxn, TableId, WriteTxn};
use crate::compare::KeyCompare;
use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Maximum number of tables a store can hold.
const MAX_TABLES: usize = u16::MAX as usize;

/// Configuration for [`InMemoryStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on the total bytes of keys and values held.
    pub map_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            map_size: 1024 * 1024 * 1024, // 1 GB
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the map size.
    #[must_use]
    pub const fn map_size(mut self, size: usize) -> Self {
        self.map_size = size;
        self
    }
}

/// A key tagged with its table's comparator so the ordered map can use it.
#[derive(Clone)]
struct OrdKey {
    bytes: Bytes,
    compare: KeyCompare,
}

impl OrdKey {
    fn new(bytes: &[u8], compare: KeyCompare) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(bytes),
            compare,
        }
    }
}

impl PartialEq for OrdKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrdKey {}

impl PartialOrd for OrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&self.bytes, &other.bytes)
    }
}

#[derive(Clone)]
struct Table {
    name: String,
    compare: KeyCompare,
    entries: BTreeMap<OrdKey, Bytes>,
}

impl Table {
    fn first_at_or_after(&self, key: &[u8]) -> Option<(Bytes, Bytes)> {
        self.entries
            .range(OrdKey::new(key, self.compare)..)
            .next()
            .map(|(k, v)| (k.bytes.clone(), v.clone()))
    }

    fn first_after(&self, key: &Bytes) -> Option<(Bytes, Bytes)> {
        let bound = OrdKey {
            bytes: key.clone(),
            compare: self.compare,
        };
        self.entries
            .range((Bound::Excluded(bound), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.bytes.clone(), v.clone()))
    }
}

/// One immutable version of the whole store.
#[derive(Clone, Default)]
struct Snapshot {
    tables: Vec<Table>,
    /// Total bytes of keys and values across all tables.
    bytes: usize,
}

impl Snapshot {
    fn table(&self, table: TableId) -> StorageResult<&Table> {
        self.tables
            .get(table.as_usize())
            .ok_or(StorageError::UnknownTable(table))
    }

    fn table_mut(&mut self, table: TableId) -> StorageResult<&mut Table> {
        self.tables
            .get_mut(table.as_usize())
            .ok_or(StorageError::UnknownTable(table))
    }
}

/// An in-memory, copy-on-write base store.
///
/// Every committed write transaction publishes a new snapshot; readers
/// keep the `Arc` they started with, which gives snapshot isolation without
/// any reader locking. A write transaction clones the current snapshot when
/// it begins, so its cost is proportional to the store size. This engine is
/// meant for tests and small embedded data sets.
///
/// # Example
///
/// ```rust
/// use objdb_storage::{compare_lexicographic, InMemoryStore, KvStore};
///
/// let store = InMemoryStore::new();
/// let table = store.open_table("t", compare_lexicographic).unwrap();
/// let before = store.begin_read().unwrap();
///
/// let mut wtx = store.begin_write().unwrap();
/// wtx.put(table, b"k", b"v").unwrap();
/// wtx.commit().unwrap();
///
/// // The earlier reader still sees its snapshot.
/// assert!(before.get(table, b"k").unwrap().is_none());
/// ```
pub struct InMemoryStore {
    config: StoreConfig,
    current: RwLock<Arc<Snapshot>>,
    write_lock: Mutex<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_config(StoreConfig::default())
    }
}

impl InMemoryStore {
    /// Creates an empty store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with the given configuration.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            current: RwLock::new(Arc::new(Snapshot::default())),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the total bytes of keys and values in the committed state.
    #[must_use]
    pub fn size(&self) -> usize {
        self.current.read().bytes
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }
}

impl KvStore for InMemoryStore {
    fn open_table(&self, name: &str, compare: KeyCompare) -> StorageResult<TableId> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot();

        if let Some(index) = current.tables.iter().position(|t| t.name == name) {
            return Ok(TableId::new(index as u16));
        }
        if current.tables.len() >= MAX_TABLES {
            return Err(StorageError::TooManyTables { limit: MAX_TABLES });
        }

        let mut next = (*current).clone();
        next.tables.push(Table {
            name: name.to_string(),
            compare,
            entries: BTreeMap::new(),
        });
        let id = TableId::new((next.tables.len() - 1) as u16);
        *self.current.write() = Arc::new(next);
        Ok(id)
    }

    fn begin_read(&self) -> StorageResult<Box<dyn ReadTxn + '_>> {
        Ok(Box::new(MemoryReadTxn {
            snapshot: self.snapshot(),
        }))
    }

    fn begin_write(&self) -> StorageResult<Box<dyn WriteTxn + '_>> {
        // Blocks while another writer is active.
        let guard = self.write_lock.lock();
        let working = (*self.snapshot()).clone();
        Ok(Box::new(MemoryWriteTxn {
            store: self,
            _guard: guard,
            working,
        }))
    }
}

struct MemoryReadTxn {
    snapshot: Arc<Snapshot>,
}

impl ReadTxn for MemoryReadTxn {
    fn get(&self, table: TableId, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let table = self.snapshot.table(table)?;
        Ok(table.entries.get(&OrdKey::new(key, table.compare)).cloned())
    }

    fn cursor(&self, table: TableId) -> StorageResult<Box<dyn KvCursor + '_>> {
        Ok(Box::new(MemoryCursor::new(self.snapshot.table(table)?)))
    }
}

struct MemoryWriteTxn<'a> {
    store: &'a InMemoryStore,
    _guard: MutexGuard<'a, ()>,
    working: Snapshot,
}

impl ReadTxn for MemoryWriteTxn<'_> {
    fn get(&self, table: TableId, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let table = self.working.table(table)?;
        Ok(table.entries.get(&OrdKey::new(key, table.compare)).cloned())
    }

    fn cursor(&self, table: TableId) -> StorageResult<Box<dyn KvCursor + '_>> {
        Ok(Box::new(MemoryCursor::new(self.working.table(table)?)))
    }
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn put(&mut self, table: TableId, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let limit = self.store.config.map_size;
        let current_bytes = self.working.bytes;
        let table = self.working.table_mut(table)?;
        let ord_key = OrdKey::new(key, table.compare);

        let replaced = table
            .entries
            .get_key_value(&ord_key)
            .map_or(0, |(k, v)| k.bytes.len() + v.len());
        let required = current_bytes - replaced + key.len() + value.len();
        if required > limit {
            return Err(StorageError::MapFull { required, limit });
        }

        // Remove first so the stored key bytes are replaced as well.
        table.entries.remove(&ord_key);
        table.entries.insert(ord_key, Bytes::copy_from_slice(value));
        self.working.bytes = required;
        Ok(())
    }

    fn delete(&mut self, table: TableId, key: &[u8]) -> StorageResult<bool> {
        let table = self.working.table_mut(table)?;
        let removed = table.entries.remove_entry(&OrdKey::new(key, table.compare));
        match removed {
            Some((k, v)) => {
                self.working.bytes -= k.bytes.len() + v.len();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        *this.store.current.write() = Arc::new(this.working);
        Ok(())
    }

    fn abort(self: Box<Self>) {
        // Dropping the working copy discards every write and releases the lock.
    }
}

struct MemoryCursor<'a> {
    table: &'a Table,
    current: Option<(Bytes, Bytes)>,
}

impl<'a> MemoryCursor<'a> {
    fn new(table: &'a Table) -> Self {
        Self {
            table,
            current: None,
        }
    }
}

impl KvCursor for MemoryCursor<'_> {
    fn seek(&mut self, key: &[u8]) -> StorageResult<()> {
        self.current = self.table.first_at_or_after(key);
        Ok(())
    }

    fn seek_first(&mut self) -> StorageResult<()> {
        self.current = self
            .table
            .entries
            .iter()
            .next()
            .map(|(k, v)| (k.bytes.clone(), v.clone()));
        Ok(())
    }

    fn seek_last(&mut self) -> StorageResult<()> {
        self.current = self
            .table
            .entries
            .iter()
            .next_back()
            .map(|(k, v)| (k.bytes.clone(), v.clone()));
        Ok(())
    }

    fn current(&self) -> Option<(&[u8], &[u8])> {
        self.current
            .as_ref()
            .map(|(k, v)| (k.as_ref(), v.as_ref()))
    }

    fn advance(&mut self) -> StorageResult<()> {
        if let Some((key, _)) = &self.current {
            self.current = self.table.first_after(key);
        }
        Ok(())
    }
}
