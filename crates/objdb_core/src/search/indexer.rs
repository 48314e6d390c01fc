//! Commit-time index maintenance.

use super::key::{encode_into, Variant, NGRAM_LEN};
use crate::codec::{FieldKey, KeyKind, ObjId, Value};
use crate::error::{CoreError, CoreResult};
use crate::model::Model;
use crate::overlay::OrderedMap;
use crate::txn::{Change, DiffObserver};
use objdb_storage::{compare_ignoring_last_byte, TableId, WriteTxn};
use std::collections::BTreeSet;

const OP_REMOVE: u8 = 0;
const OP_INSERT: u8 = 1;

/// Derives index entries from the commit diff.
///
/// Operations are staged as `index key ‖ op` in an overlay ordered while
/// ignoring the op byte, so removing and re-adding the same entry within one
/// commit collapses to the last operation. [`SearchIndexer::flush`] then
/// writes the survivors.
pub struct SearchIndexer<'m> {
    model: &'m Model,
    staged: OrderedMap,
    scratch: Vec<u8>,
}

impl<'m> SearchIndexer<'m> {
    /// Creates an indexer for the indexed fields of `model`.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging arena cannot be reserved.
    pub fn new(model: &'m Model, capacity: usize, page_size: usize) -> CoreResult<Self> {
        Ok(Self {
            model,
            staged: OrderedMap::new(compare_ignoring_last_byte, capacity, page_size)?,
            scratch: Vec::new(),
        })
    }

    /// Number of staged operations.
    #[must_use]
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Drops every staged operation.
    pub fn reset(&mut self) {
        self.staged.reset();
    }

    /// Stages the entries for one field value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] for undecodable values and
    /// [`CoreError::ArenaExhausted`] if staging runs out of space.
    pub fn stage_value(&mut self, object: ObjId, field: ObjId, value: &[u8], insert: bool) -> CoreResult<()> {
        let op = if insert { OP_INSERT } else { OP_REMOVE };
        match Value::decode(value)? {
            None => Ok(()),
            Some(Value::String(text)) => {
                self.stage(Variant::Normal, field, text.as_bytes(), object, op)?;
                let reversed: String = text.chars().rev().collect();
                self.stage(Variant::Reverse, field, reversed.as_bytes(), object, op)?;
                for gram in ngrams(&text) {
                    self.stage(Variant::NGram, field, gram.as_bytes(), object, op)?;
                }
                Ok(())
            }
            Some(_) => self.stage(Variant::Scalar, field, value, object, op),
        }
    }

    fn stage(&mut self, variant: Variant, field: ObjId, value: &[u8], object: ObjId, op: u8) -> CoreResult<()> {
        encode_into(&mut self.scratch, variant, field, value, object);
        self.scratch.push(op);
        self.staged.put(&self.scratch, &[])
    }

    /// Writes the staged operations into `table` of `wtx` and clears them.
    ///
    /// Returns the number of index writes.
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub fn flush(&mut self, wtx: &mut dyn WriteTxn, table: TableId) -> CoreResult<usize> {
        let mut writes = 0;
        for (key, _) in self.staged.iter() {
            let Some((&op, index_key)) = key.split_last() else {
                continue;
            };
            if op == OP_INSERT {
                wtx.put(table, index_key, &[])?;
            } else {
                wtx.delete(table, index_key)?;
            }
            writes += 1;
        }
        tracing::trace!(writes, "search index flushed");
        self.staged.reset();
        Ok(writes)
    }
}

impl DiffObserver for SearchIndexer<'_> {
    fn observe(&mut self, change: &Change<'_>) -> CoreResult<()> {
        if KeyKind::of(change.key) != Some(KeyKind::Field) || change.is_noop() {
            return Ok(());
        }
        let key = FieldKey::parse(change.key).ok_or_else(|| CoreError::corrupted("malformed field key"))?;
        if !self.model.is_indexed(key.field) {
            return Ok(());
        }
        if let Some(old) = change.old {
            self.stage_value(key.object, key.field, old, false)?;
        }
        if let Some(new) = change.new {
            self.stage_value(key.object, key.field, new, true)?;
        }
        Ok(())
    }
}

/// Distinct 3-character windows of `text`, in sorted order.
#[must_use]
pub fn ngrams(text: &str) -> BTreeSet<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .windows(NGRAM_LEN)
        .map(|window| window.iter().collect())
        .collect()
}
