//! Transactional view over a base-store snapshot.
//!
//! [`TxnStore`] stages every write in an [`OrderedMap`] overlay and merges
//! it with a pinned read snapshot of the base store, so a transaction reads
//! its own writes without touching the base store. On commit the overlay is
//! replayed into the store's write transaction in key order, and the same
//! ordered diff is handed to every [`DiffObserver`].
//!
//! ## Overlay values
//!
//! Each overlay value starts with a flag byte:
//!
//! | flag            | meaning                                  |
//! |-----------------|------------------------------------------|
//! | `FLAG_ADD_MODIFY` | upsert; the remaining bytes are the payload |
//! | `FLAG_DELETE`   | tombstone; hides the base-store key       |

use crate::error::CoreResult;
use crate::overlay::{OrderedMap, OverlayCursor};
use bytes::Bytes;
use objdb_storage::{KeyCompare, KvCursor, ReadTxn, TableId, WriteTxn};
use std::cmp::Ordering;
use std::ops::Deref;

/// Overlay flag for a tombstone.
pub const FLAG_DELETE: u8 = 0;
/// Overlay flag for an upsert.
pub const FLAG_ADD_MODIFY: u8 = 1;

fn is_tombstone(overlay_value: &[u8]) -> bool {
    overlay_value.first() != Some(&FLAG_ADD_MODIFY)
}

/// A value read through a [`TxnStore`].
#[derive(Debug, Clone)]
pub enum ValueRef<'a> {
    /// Pending value from the overlay.
    Overlay(&'a [u8]),
    /// Committed value from the base snapshot.
    Base(Bytes),
}

impl Deref for ValueRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Overlay(v) => v,
            Self::Base(v) => v,
        }
    }
}

impl AsRef<[u8]> for ValueRef<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

/// One entry of the commit-time diff.
#[derive(Debug, Clone, Copy)]
pub struct Change<'a> {
    /// Record key.
    pub key: &'a [u8],
    /// Value in the base store before the commit, if any.
    pub old: Option<&'a [u8]>,
    /// Value after the commit; `None` for deletions.
    pub new: Option<&'a [u8]>,
}

impl Change<'_> {
    /// Returns true if the entry leaves the stored value as it was.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

/// Consumer of the ordered commit diff.
///
/// Observers see every overlay entry in key order, before the entry is
/// written, together with the value it replaces.
pub trait DiffObserver {
    /// Handles one diff entry.
    ///
    /// # Errors
    ///
    /// An error aborts the commit; nothing is published.
    fn observe(&mut self, change: &Change<'_>) -> CoreResult<()>;
}

/// The base snapshot of one table plus the pending overlay.
pub struct TxnStore<'db> {
    snapshot: Box<dyn ReadTxn + 'db>,
    table: TableId,
    overlay: OrderedMap,
}

impl<'db> TxnStore<'db> {
    /// Creates a store over `table` of `snapshot`.
    ///
    /// `overlay` must be ordered by the table's comparator.
    #[must_use]
    pub fn new(snapshot: Box<dyn ReadTxn + 'db>, table: TableId, overlay: OrderedMap) -> Self {
        Self {
            snapshot,
            table,
            overlay,
        }
    }

    /// Returns the table this store covers.
    #[must_use]
    pub fn table(&self) -> TableId {
        self.table
    }

    /// Returns the base snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &(dyn ReadTxn + 'db) {
        self.snapshot.as_ref()
    }

    /// Returns true if there are pending writes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.overlay.is_empty()
    }

    /// Returns the number of pending overlay entries, tombstones included.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.overlay.len()
    }

    /// Reads `key`, preferring pending writes over the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot read fails.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<ValueRef<'_>>> {
        if let Some(value) = self.overlay.get(key) {
            return Ok(match value.split_first() {
                Some((&FLAG_ADD_MODIFY, payload)) => Some(ValueRef::Overlay(payload)),
                _ => None,
            });
        }
        Ok(self.snapshot.get(self.table, key)?.map(ValueRef::Base))
    }

    /// Returns true if `key` is visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot read fails.
    pub fn contains(&self, key: &[u8]) -> CoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Stages an upsert.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::ArenaExhausted`] if the overlay is full.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.overlay.put_parts(key, &[&[FLAG_ADD_MODIFY][..], value])
    }

    /// Stages a deletion.
    ///
    /// A key present in the base snapshot gets a tombstone. A key that only
    /// exists in the overlay is removed outright, so a key inserted and
    /// deleted within one transaction leaves no trace in the diff.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot read or the overlay write fails.
    pub fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        if self.snapshot.get(self.table, key)?.is_some() {
            self.overlay.put(key, &[FLAG_DELETE])
        } else {
            self.overlay.remove(key);
            Ok(())
        }
    }

    /// Opens a merged cursor. It is unpositioned until seeked.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cursor cannot be opened.
    pub fn cursor(&self) -> CoreResult<MergedCursor<'_>> {
        Ok(MergedCursor {
            base: self.snapshot.cursor(self.table)?,
            overlay: self.overlay.cursor(),
            compare: self.overlay.comparator(),
            source: Source::Exhausted,
        })
    }

    /// Replays the overlay into `wtx` in key order.
    ///
    /// For every entry the value currently stored in `wtx` is read first and
    /// each observer is notified before the write happens. The overlay itself
    /// is left untouched, so a failed commit can be retried or rolled back.
    ///
    /// Returns the number of entries replayed.
    ///
    /// # Errors
    ///
    /// Returns the first error from the write transaction or an observer.
    pub fn apply(
        &self,
        wtx: &mut dyn WriteTxn,
        observers: &mut [&mut dyn DiffObserver],
    ) -> CoreResult<usize> {
        let mut applied = 0;
        for (key, value) in self.overlay.iter() {
            let old = wtx.get(self.table, key)?;
            let new = match value.split_first() {
                Some((&FLAG_ADD_MODIFY, payload)) => Some(payload),
                _ => None,
            };
            let change = Change {
                key,
                old: old.as_deref(),
                new,
            };
            tracing::trace!(key_len = key.len(), delete = new.is_none(), "apply overlay entry");
            for observer in observers.iter_mut() {
                observer.observe(&change)?;
            }
            match new {
                Some(payload) => wtx.put(self.table, key, payload)?,
                None => {
                    wtx.delete(self.table, key)?;
                }
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// Drops every pending write.
    pub fn reset(&mut self) {
        self.overlay.reset();
    }

    /// Replaces the base snapshot, typically with one taken after a commit.
    pub fn refresh(&mut self, snapshot: Box<dyn ReadTxn + 'db>) {
        self.snapshot = snapshot;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Base,
    Overlay,
    /// Overlay entry shadowing a base entry with the same key.
    Both,
    Exhausted,
}

enum Step {
    Settled(Source),
    SkipOverlay,
    SkipBoth,
}

/// Ordered merge of a base cursor and an overlay cursor.
///
/// The lower key wins; on equal keys the overlay wins. Tombstones are never
/// yielded and hide the base entry they shadow.
pub struct MergedCursor<'a> {
    base: Box<dyn KvCursor + 'a>,
    overlay: OverlayCursor<'a>,
    compare: KeyCompare,
    source: Source,
}

impl MergedCursor<'_> {
    /// Positions at the first visible key `>= key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base cursor fails.
    pub fn seek(&mut self, key: &[u8]) -> CoreResult<()> {
        self.base.seek(key)?;
        self.overlay.seek(key);
        self.settle()
    }

    /// Positions at the first visible key.
    ///
    /// # Errors
    ///
    /// Returns an error if the base cursor fails.
    pub fn seek_first(&mut self) -> CoreResult<()> {
        self.base.seek_first()?;
        self.overlay.seek_first();
        self.settle()
    }

    /// Returns the visible entry under the cursor.
    #[must_use]
    pub fn current(&self) -> Option<(&[u8], &[u8])> {
        match self.source {
            Source::Base => self.base.current(),
            Source::Overlay | Source::Both => self
                .overlay
                .current()
                .map(|(k, v)| (k, v.get(1..).unwrap_or_default())),
            Source::Exhausted => None,
        }
    }

    /// Moves to the next visible entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the base cursor fails.
    pub fn advance(&mut self) -> CoreResult<()> {
        match self.source {
            Source::Base => self.base.advance()?,
            Source::Overlay => self.overlay.advance(),
            Source::Both => {
                self.base.advance()?;
                self.overlay.advance();
            }
            Source::Exhausted => return Ok(()),
        }
        self.settle()
    }

    /// Skips tombstones until both inputs agree on a visible entry.
    fn settle(&mut self) -> CoreResult<()> {
        loop {
            let step = match (self.base.current(), self.overlay.current()) {
                (None, None) => Step::Settled(Source::Exhausted),
                (Some(_), None) => Step::Settled(Source::Base),
                (None, Some((_, v))) => {
                    if is_tombstone(v) {
                        Step::SkipOverlay
                    } else {
                        Step::Settled(Source::Overlay)
                    }
                }
                (Some((bk, _)), Some((ok, v))) => match (self.compare)(bk, ok) {
                    Ordering::Less => Step::Settled(Source::Base),
                    Ordering::Greater if is_tombstone(v) => Step::SkipOverlay,
                    Ordering::Greater => Step::Settled(Source::Overlay),
                    Ordering::Equal if is_tombstone(v) => Step::SkipBoth,
                    Ordering::Equal => Step::Settled(Source::Both),
                },
            };
            match step {
                Step::Settled(source) => {
                    self.source = source;
                    return Ok(());
                }
                Step::SkipOverlay => self.overlay.advance(),
                Step::SkipBoth => {
                    self.base.advance()?;
                    self.overlay.advance();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_storage::{compare_lexicographic, InMemoryStore, KvStore};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn seeded(entries: &[(&[u8], &[u8])]) -> (InMemoryStore, TableId) {
        let store = InMemoryStore::new();
        let table = store.open_table("t", compare_lexicographic).unwrap();
        let mut wtx = store.begin_write().unwrap();
        for (k, v) in entries {
            wtx.put(table, k, v).unwrap();
        }
        wtx.commit().unwrap();
        (store, table)
    }

    fn txn_store(store: &InMemoryStore, table: TableId) -> TxnStore<'_> {
        let overlay = OrderedMap::new(compare_lexicographic, 1 << 20, 4096).unwrap();
        TxnStore::new(store.begin_read().unwrap(), table, overlay)
    }

    fn visible(txn: &TxnStore<'_>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut cursor = txn.cursor().unwrap();
        cursor.seek_first().unwrap();
        let mut out = Vec::new();
        while let Some((k, v)) = cursor.current() {
            out.push((k.to_vec(), v.to_vec()));
            cursor.advance().unwrap();
        }
        out
    }

    struct Recorder(Vec<(Vec<u8>, Option<Vec<u8>>, Option<Vec<u8>>)>);

    impl DiffObserver for Recorder {
        fn observe(&mut self, change: &Change<'_>) -> CoreResult<()> {
            self.0.push((
                change.key.to_vec(),
                change.old.map(<[u8]>::to_vec),
                change.new.map(<[u8]>::to_vec),
            ));
            Ok(())
        }
    }

    #[test]
    fn get_prefers_overlay() {
        let (store, table) = seeded(&[(b"a", b"base"), (b"b", b"base")]);
        let mut txn = txn_store(&store, table);

        txn.put(b"a", b"mine").unwrap();
        txn.delete(b"b").unwrap();
        txn.put(b"c", b"new").unwrap();

        assert_eq!(txn.get(b"a").unwrap().as_deref(), Some(&b"mine"[..]));
        assert!(txn.get(b"b").unwrap().is_none());
        assert_eq!(txn.get(b"c").unwrap().as_deref(), Some(&b"new"[..]));

        // The base store is untouched.
        let rtx = store.begin_read().unwrap();
        assert_eq!(rtx.get(table, b"b").unwrap().as_deref(), Some(&b"base"[..]));
        assert!(rtx.get(table, b"c").unwrap().is_none());
    }

    #[test]
    fn delete_of_overlay_only_key_is_structural() {
        let (store, table) = seeded(&[(b"a", b"1")]);
        let mut txn = txn_store(&store, table);

        txn.put(b"x", b"temp").unwrap();
        txn.delete(b"x").unwrap();
        assert_eq!(txn.pending(), 0);
        assert!(!txn.is_dirty());

        txn.delete(b"a").unwrap();
        assert_eq!(txn.pending(), 1);
        // Re-inserting over a tombstone turns it back into an upsert.
        txn.put(b"a", b"2").unwrap();
        assert_eq!(txn.pending(), 1);
        assert_eq!(visible(&txn), vec![(b"a".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn merged_cursor_interleaves_and_hides_tombstones() {
        let (store, table) = seeded(&[(b"b", b"1"), (b"d", b"2"), (b"f", b"3")]);
        let mut txn = txn_store(&store, table);

        txn.put(b"a", b"0").unwrap();
        txn.delete(b"b").unwrap();
        txn.put(b"d", b"20").unwrap();
        txn.put(b"e", b"25").unwrap();
        txn.delete(b"f").unwrap();

        assert_eq!(
            visible(&txn),
            vec![
                (b"a".to_vec(), b"0".to_vec()),
                (b"d".to_vec(), b"20".to_vec()),
                (b"e".to_vec(), b"25".to_vec()),
            ]
        );

        let mut cursor = txn.cursor().unwrap();
        cursor.seek(b"b").unwrap();
        assert_eq!(cursor.current().unwrap().0, b"d");
    }

    #[test]
    fn consecutive_tombstones_are_all_skipped() {
        let (store, table) = seeded(&[(b"a", b""), (b"b", b""), (b"c", b""), (b"d", b"")]);
        let mut txn = txn_store(&store, table);
        for k in [&b"a"[..], b"b", b"c"] {
            txn.delete(k).unwrap();
        }
        assert_eq!(visible(&txn), vec![(b"d".to_vec(), Vec::new())]);
    }

    #[test]
    fn apply_replays_in_order_with_old_values() {
        let (store, table) = seeded(&[(b"a", b"1"), (b"b", b"2")]);
        let mut txn = txn_store(&store, table);
        txn.put(b"c", b"3").unwrap();
        txn.delete(b"a").unwrap();
        txn.put(b"b", b"22").unwrap();

        let mut recorder = Recorder(Vec::new());
        let mut wtx = store.begin_write().unwrap();
        let mut observers: [&mut dyn DiffObserver; 1] = [&mut recorder];
        let applied = txn.apply(wtx.as_mut(), &mut observers).unwrap();
        wtx.commit().unwrap();

        assert_eq!(applied, 3);
        assert_eq!(
            recorder.0,
            vec![
                (b"a".to_vec(), Some(b"1".to_vec()), None),
                (b"b".to_vec(), Some(b"2".to_vec()), Some(b"22".to_vec())),
                (b"c".to_vec(), None, Some(b"3".to_vec())),
            ]
        );

        txn.reset();
        txn.refresh(store.begin_read().unwrap());
        assert_eq!(
            visible(&txn),
            vec![
                (b"b".to_vec(), b"22".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn change_noop_detection() {
        let same = Change {
            key: b"k",
            old: Some(b"v"),
            new: Some(b"v"),
        };
        assert!(same.is_noop());
        let cleared = Change {
            key: b"k",
            old: Some(b"v"),
            new: None,
        };
        assert!(!cleared.is_noop());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(Vec<u8>, Vec<u8>),
        Delete(Vec<u8>),
    }

    fn small_key() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(0u8..3, 0..3)
    }

    proptest! {
        #[test]
        fn merge_matches_applied_model(
            base in prop::collection::btree_map(small_key(), prop::collection::vec(any::<u8>(), 0..3), 0..12),
            ops in prop::collection::vec(
                prop_oneof![
                    (small_key(), prop::collection::vec(any::<u8>(), 0..3)).prop_map(|(k, v)| Op::Put(k, v)),
                    small_key().prop_map(Op::Delete),
                ],
                0..40,
            ),
        ) {
            let entries: Vec<(&[u8], &[u8])> = base.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
            let (store, table) = seeded(&entries);
            let mut txn = txn_store(&store, table);
            let mut model: BTreeMap<Vec<u8>, Vec<u8>> = base.clone();

            for op in ops {
                match op {
                    Op::Put(k, v) => {
                        txn.put(&k, &v).unwrap();
                        model.insert(k, v);
                    }
                    Op::Delete(k) => {
                        txn.delete(&k).unwrap();
                        model.remove(&k);
                    }
                }
            }

            let expected: Vec<_> = model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            prop_assert_eq!(visible(&txn), expected.clone());

            // Committing the overlay produces the same state in the base store.
            let mut wtx = store.begin_write().unwrap();
            txn.apply(wtx.as_mut(), &mut []).unwrap();
            wtx.commit().unwrap();
            txn.reset();
            txn.refresh(store.begin_read().unwrap());
            prop_assert_eq!(visible(&txn), expected);
        }
    }
}
