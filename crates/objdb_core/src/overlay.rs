//! Ordered in-memory map used as a transaction's change-set.
//!
//! [`OrderedMap`] is a B+Tree: internal nodes hold separator keys, leaves
//! hold key/value pairs and are linked left to right for cursor iteration.
//! Key and value bytes live in an [`Arena`]; nodes only store [`ArenaRef`]s.
//! The whole structure is discarded with [`OrderedMap::reset`] at the end of
//! every transaction, so removal never rebalances: leaves only shrink, and
//! cursors step over empty ones.

use crate::arena::{Arena, ArenaRef};
use crate::error::CoreResult;
use objdb_storage::KeyCompare;
use std::cmp::Ordering;

/// Maximum keys per node before it splits.
const MAX_KEYS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRef {
    Leaf(u32),
    Internal(u32),
}

#[derive(Debug, Default)]
struct Leaf {
    keys: Vec<ArenaRef>,
    values: Vec<ArenaRef>,
    next: Option<u32>,
}

/// `children.len() == keys.len() + 1`; child `i` holds keys in
/// `[keys[i - 1], keys[i])`.
#[derive(Debug)]
struct Internal {
    keys: Vec<ArenaRef>,
    children: Vec<NodeRef>,
}

/// An arena-backed B+Tree keyed by byte strings.
///
/// # Example
///
/// ```rust
/// use objdb_core::overlay::OrderedMap;
/// use objdb_storage::compare_lexicographic;
///
/// let mut map = OrderedMap::new(compare_lexicographic, 1 << 20, 4096).unwrap();
/// map.put(b"b", b"2").unwrap();
/// map.put(b"a", b"1").unwrap();
///
/// let keys: Vec<_> = map.iter().map(|(k, _)| k.to_vec()).collect();
/// assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
/// ```
#[derive(Debug)]
pub struct OrderedMap {
    arena: Arena,
    compare: KeyCompare,
    leaves: Vec<Leaf>,
    internals: Vec<Internal>,
    root: NodeRef,
    len: usize,
}

impl OrderedMap {
    /// Creates an empty map ordered by `compare`, backed by an arena of
    /// `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the arena cannot be reserved.
    pub fn new(compare: KeyCompare, capacity: usize, page_size: usize) -> CoreResult<Self> {
        Ok(Self {
            arena: Arena::new(capacity, page_size)?,
            compare,
            leaves: vec![Leaf::default()],
            internals: Vec::new(),
            root: NodeRef::Leaf(0),
            len: 0,
        })
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the comparator.
    #[must_use]
    pub fn comparator(&self) -> KeyCompare {
        self.compare
    }

    /// Returns the backing arena.
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Inserts `key`, replacing both key bytes and value if an equal key is
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::ArenaExhausted`] if the arena is full; the
    /// map is unchanged in that case.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.put_parts(key, &[value])
    }

    /// Like [`OrderedMap::put`], with the value given as consecutive parts
    /// that are concatenated in the arena without an intermediate buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::ArenaExhausted`] if the arena is full; the
    /// map and the arena are unchanged in that case.
    pub fn put_parts(&mut self, key: &[u8], parts: &[&[u8]]) -> CoreResult<()> {
        // Key and value share one allocation so a failure consumes nothing.
        let value_len: usize = parts.iter().map(|p| p.len()).sum();
        let entry = self.arena.alloc_zeroed(key.len() + value_len)?;
        let dest = self.arena.get_mut(entry);
        dest[..key.len()].copy_from_slice(key);
        let mut at = key.len();
        for part in parts {
            dest[at..at + part.len()].copy_from_slice(part);
            at += part.len();
        }
        let (k, v) = entry.split_at(key.len() as u32);

        let mut path: Vec<(u32, usize)> = Vec::new();
        let leaf_id = self.descend(key, Some(&mut path));

        let pos = self.leaves[leaf_id as usize]
            .keys
            .binary_search_by(|k| (self.compare)(self.arena.get(*k), key));
        let new_id = self.leaves.len() as u32;
        let leaf = &mut self.leaves[leaf_id as usize];
        match pos {
            Ok(i) => {
                leaf.keys[i] = k;
                leaf.values[i] = v;
                return Ok(());
            }
            Err(i) => {
                leaf.keys.insert(i, k);
                leaf.values.insert(i, v);
                self.len += 1;
            }
        }
        if leaf.keys.len() <= MAX_KEYS {
            return Ok(());
        }

        let mid = leaf.keys.len() / 2;
        let right = Leaf {
            keys: leaf.keys.split_off(mid),
            values: leaf.values.split_off(mid),
            next: leaf.next,
        };
        leaf.next = Some(new_id);
        let mut separator = right.keys[0];
        self.leaves.push(right);
        let mut new_child = NodeRef::Leaf(new_id);

        while let Some((parent, idx)) = path.pop() {
            let node = &mut self.internals[parent as usize];
            node.keys.insert(idx, separator);
            node.children.insert(idx + 1, new_child);
            if node.keys.len() <= MAX_KEYS {
                return Ok(());
            }

            let mid = node.keys.len() / 2;
            let right_keys = node.keys.split_off(mid + 1);
            let right_children = node.children.split_off(mid + 1);
            // `keys[mid]` moves up instead of staying in either half.
            separator = node.keys.pop().unwrap_or(separator);
            let right_id = self.internals.len() as u32;
            self.internals.push(Internal {
                keys: right_keys,
                children: right_children,
            });
            new_child = NodeRef::Internal(right_id);
        }

        let root_id = self.internals.len() as u32;
        self.internals.push(Internal {
            keys: vec![separator],
            children: vec![self.root, new_child],
        });
        self.root = NodeRef::Internal(root_id);
        Ok(())
    }

    /// Looks up `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let leaf = &self.leaves[self.descend(key, None) as usize];
        leaf.keys
            .binary_search_by(|k| (self.compare)(self.arena.get(*k), key))
            .ok()
            .map(|i| self.arena.get(leaf.values[i]))
    }

    /// Structurally removes `key`, returning whether it was present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let leaf_id = self.descend(key, None) as usize;
        let pos = self.leaves[leaf_id]
            .keys
            .binary_search_by(|k| (self.compare)(self.arena.get(*k), key));
        match pos {
            Ok(i) => {
                let leaf = &mut self.leaves[leaf_id];
                leaf.keys.remove(i);
                leaf.values.remove(i);
                self.len -= 1;
                true
            }
            Err(_) => false,
        }
    }

    /// Removes every entry and releases the arena.
    pub fn reset(&mut self) {
        self.arena.reset();
        self.leaves.clear();
        self.leaves.push(Leaf::default());
        self.internals.clear();
        self.root = NodeRef::Leaf(0);
        self.len = 0;
    }

    /// Creates an unpositioned cursor.
    #[must_use]
    pub fn cursor(&self) -> OverlayCursor<'_> {
        OverlayCursor {
            map: self,
            leaf: None,
            slot: 0,
        }
    }

    /// Iterates every entry in key order.
    #[must_use]
    pub fn iter(&self) -> OverlayIter<'_> {
        let mut cursor = self.cursor();
        cursor.seek_first();
        OverlayIter { cursor }
    }

    /// Walks from the root to the leaf that would hold `key`, recording the
    /// internal nodes visited and the child index taken.
    fn descend(&self, key: &[u8], mut path: Option<&mut Vec<(u32, usize)>>) -> u32 {
        let mut node = self.root;
        loop {
            match node {
                NodeRef::Leaf(id) => return id,
                NodeRef::Internal(id) => {
                    let internal = &self.internals[id as usize];
                    let idx = internal.keys.partition_point(|sep| {
                        (self.compare)(self.arena.get(*sep), key) != Ordering::Greater
                    });
                    if let Some(path) = path.as_deref_mut() {
                        path.push((id, idx));
                    }
                    node = internal.children[idx];
                }
            }
        }
    }
}

/// Forward cursor over an [`OrderedMap`].
#[derive(Debug, Clone)]
pub struct OverlayCursor<'a> {
    map: &'a OrderedMap,
    /// `None` once the cursor runs past the last entry.
    leaf: Option<u32>,
    slot: usize,
}

impl<'a> OverlayCursor<'a> {
    /// Positions at the first key `>= key` under the map's comparator.
    pub fn seek(&mut self, key: &[u8]) {
        let map = self.map;
        let leaf_id = map.descend(key, None);
        let leaf = &map.leaves[leaf_id as usize];
        self.leaf = Some(leaf_id);
        self.slot = leaf.keys.partition_point(|k| {
            (map.compare)(map.arena.get(*k), key) == Ordering::Less
        });
        self.skip_exhausted_leaves();
    }

    /// Positions at the first entry.
    pub fn seek_first(&mut self) {
        // Splits only ever append new leaves to the right, so leaf 0 is
        // always the leftmost.
        self.leaf = Some(0);
        self.slot = 0;
        self.skip_exhausted_leaves();
    }

    /// Returns the comparator of the underlying map.
    #[must_use]
    pub fn comparator(&self) -> KeyCompare {
        self.map.compare
    }

    /// Returns the entry under the cursor.
    #[must_use]
    pub fn current(&self) -> Option<(&'a [u8], &'a [u8])> {
        let map = self.map;
        let leaf = &map.leaves[self.leaf? as usize];
        Some((
            map.arena.get(leaf.keys[self.slot]),
            map.arena.get(leaf.values[self.slot]),
        ))
    }

    /// Moves to the next entry.
    pub fn advance(&mut self) {
        if self.leaf.is_some() {
            self.slot += 1;
            self.skip_exhausted_leaves();
        }
    }

    fn skip_exhausted_leaves(&mut self) {
        while let Some(id) = self.leaf {
            let leaf = &self.map.leaves[id as usize];
            if self.slot < leaf.keys.len() {
                return;
            }
            self.leaf = leaf.next;
            self.slot = 0;
        }
    }
}

/// Iterator over all entries of an [`OrderedMap`].
#[derive(Debug, Clone)]
pub struct OverlayIter<'a> {
    cursor: OverlayCursor<'a>,
}

impl<'a> Iterator for OverlayIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.cursor.current()?;
        self.cursor.advance();
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_storage::{compare_ignoring_last_byte, compare_lexicographic};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn map() -> OrderedMap {
        OrderedMap::new(compare_lexicographic, 16 << 20, 4096).unwrap()
    }

    fn key(i: u32) -> Vec<u8> {
        format!("key-{i:06}").into_bytes()
    }

    #[test]
    fn empty_map() {
        let m = map();
        assert!(m.is_empty());
        assert!(m.get(b"x").is_none());
        assert_eq!(m.iter().count(), 0);
    }

    #[test]
    fn put_get_replace() {
        let mut m = map();
        m.put(b"a", b"1").unwrap();
        m.put(b"a", b"2").unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(b"a"), Some(&b"2"[..]));
    }

    #[test]
    fn many_inserts_split_and_stay_ordered() {
        let mut m = map();
        // Interleave to hit splits at every level.
        for i in (0..5000).rev().step_by(2).chain((0..5000).step_by(2)) {
            m.put(&key(i), &i.to_le_bytes()).unwrap();
        }
        assert_eq!(m.len(), 5000);
        let keys: Vec<_> = m.iter().map(|(k, _)| k.to_vec()).collect();
        let expected: Vec<_> = (0..5000).map(key).collect();
        assert_eq!(keys, expected);
        assert_eq!(m.get(&key(4321)), Some(&4321u32.to_le_bytes()[..]));
    }

    #[test]
    fn remove_skips_empty_leaves() {
        let mut m = map();
        for i in 0..200 {
            m.put(&key(i), b"").unwrap();
        }
        for i in 10..190 {
            assert!(m.remove(&key(i)));
        }
        assert!(!m.remove(&key(50)));

        let keys: Vec<_> = m.iter().map(|(k, _)| k.to_vec()).collect();
        let expected: Vec<_> = (0..10).chain(190..200).map(key).collect();
        assert_eq!(keys, expected);

        let mut cursor = m.cursor();
        cursor.seek(&key(11));
        assert_eq!(cursor.current().unwrap().0, key(190).as_slice());
    }

    #[test]
    fn seek_positions_at_lower_bound() {
        let mut m = map();
        for k in [&b"b"[..], b"d", b"f"] {
            m.put(k, k).unwrap();
        }
        let mut cursor = m.cursor();
        assert!(cursor.current().is_none());

        cursor.seek(b"c");
        assert_eq!(cursor.current().unwrap().0, b"d");
        cursor.seek(b"d");
        assert_eq!(cursor.current().unwrap().0, b"d");
        cursor.advance();
        assert_eq!(cursor.current().unwrap().0, b"f");
        cursor.advance();
        assert!(cursor.current().is_none());
        cursor.seek(b"z");
        assert!(cursor.current().is_none());
    }

    #[test]
    fn reset_clears_everything() {
        let mut m = map();
        for i in 0..100 {
            m.put(&key(i), b"v").unwrap();
        }
        m.reset();
        assert!(m.is_empty());
        assert_eq!(m.arena().used(), 0);
        assert_eq!(m.iter().count(), 0);
        m.put(b"x", b"y").unwrap();
        assert_eq!(m.get(b"x"), Some(&b"y"[..]));
    }

    #[test]
    fn ignoring_last_byte_replaces_key_bytes() {
        let mut m = OrderedMap::new(compare_ignoring_last_byte, 1 << 16, 4096).unwrap();
        m.put(b"entry\x00", b"").unwrap();
        m.put(b"entry\x01", b"").unwrap();

        assert_eq!(m.len(), 1);
        let (k, _) = m.iter().next().unwrap();
        assert_eq!(k, b"entry\x01");
    }

    #[test]
    fn arena_exhaustion_leaves_map_intact() {
        let mut m = OrderedMap::new(compare_lexicographic, 8, 8).unwrap();
        m.put(b"ab", b"cd").unwrap();
        assert!(m.put(b"efgh", b"ijkl").unwrap_err().is_fatal());
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(b"ab"), Some(&b"cd"[..]));
    }

    #[test]
    fn failed_put_consumes_no_arena_space() {
        let mut m = OrderedMap::new(compare_lexicographic, 8, 8).unwrap();
        m.put(b"ab", b"cd").unwrap();
        // The key alone would fit, the value would not.
        assert!(m.put(b"efgh", b"i").is_err());
        assert_eq!(m.arena().used(), 4);

        m.put(b"ef", b"gh").unwrap();
        assert_eq!(m.get(b"ef"), Some(&b"gh"[..]));
        assert_eq!(m.arena().used(), 8);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(Vec<u8>, Vec<u8>),
        Remove(Vec<u8>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let key = prop::collection::vec(0u8..4, 0..4);
        prop_oneof![
            3 => (key.clone(), prop::collection::vec(any::<u8>(), 0..4)).prop_map(|(k, v)| Op::Put(k, v)),
            1 => key.prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn matches_btreemap_model(ops in prop::collection::vec(op_strategy(), 0..400), target in prop::collection::vec(0u8..4, 0..4)) {
            let mut m = map();
            let mut model = BTreeMap::new();
            for op in ops {
                match op {
                    Op::Put(k, v) => {
                        m.put(&k, &v).unwrap();
                        model.insert(k, v);
                    }
                    Op::Remove(k) => {
                        prop_assert_eq!(m.remove(&k), model.remove(&k).is_some());
                    }
                }
            }

            prop_assert_eq!(m.len(), model.len());
            let entries: Vec<_> = m.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
            let expected: Vec<_> = model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            prop_assert_eq!(entries, expected);

            let mut cursor = m.cursor();
            cursor.seek(&target);
            let expected_seek = model.range(target.clone()..).next().map(|(k, _)| k.clone());
            prop_assert_eq!(cursor.current().map(|(k, _)| k.to_vec()), expected_seek);
        }
    }
}
