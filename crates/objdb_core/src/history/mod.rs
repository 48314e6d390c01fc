//! Change history.
//!
//! Every commit that changes at least one object writes one record to the
//! `history` table, keyed by a time-sortable [`CommitId`], plus one entry
//! per touched object in `history_by_object` (object id ‖ commit id, empty
//! value). The second table keeps each object's commits contiguous and in
//! chronological order.

mod commit_id;
mod record;

pub use commit_id::{CommitId, CommitIdGenerator};
pub use record::{
    Commit, CommitView, Event, EventIter, ObjectChanges, ObjectIter, ObjectView, RecordBuilder,
    RECORD_MAGIC, RECORD_VERSION,
};

use crate::codec::{object_key, ObjId, ID_LEN};
use crate::database::Tables;
use crate::error::{CoreError, CoreResult};
use objdb_storage::{ReadTxn, WriteTxn};

/// Name of the commit record table.
pub const HISTORY_TABLE: &str = "history";
/// Name of the object to commit index table.
pub const HISTORY_BY_OBJECT_TABLE: &str = "history_by_object";

fn object_commit_key(object: ObjId, commit: CommitId) -> [u8; 2 * ID_LEN] {
    let mut key = [0u8; 2 * ID_LEN];
    key[..ID_LEN].copy_from_slice(object.as_bytes());
    key[ID_LEN..].copy_from_slice(commit.as_bytes());
    key
}

/// Stores the record held by `builder` under `id`.
///
/// Returns false, writing nothing, if the record has no events.
pub(crate) fn write_record(
    builder: &mut RecordBuilder,
    wtx: &mut dyn WriteTxn,
    tables: &Tables,
    id: CommitId,
) -> CoreResult<bool> {
    if builder.is_empty() {
        return Ok(false);
    }
    builder.resolve_types(|object| {
        Ok(wtx
            .get(tables.objects, &object_key(object))?
            .and_then(|value| ObjId::from_slice(&value)))
    })?;

    wtx.put(tables.history, id.as_bytes(), builder.as_bytes())?;
    for &object in builder.touched() {
        wtx.put(tables.history_by_object, &object_commit_key(object, id), &[])?;
    }
    tracing::trace!(
        commit = %id,
        objects = builder.touched().len(),
        bytes = builder.as_bytes().len(),
        "history record written"
    );
    Ok(true)
}

/// Read access to the history tables through one snapshot.
pub struct History<'a> {
    txn: Box<dyn ReadTxn + 'a>,
    tables: Tables,
}

impl<'a> History<'a> {
    pub(crate) fn new(txn: Box<dyn ReadTxn + 'a>, tables: Tables) -> Self {
        Self { txn, tables }
    }

    /// Every commit id, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails or a key is malformed.
    pub fn commits(&self) -> CoreResult<Vec<CommitId>> {
        let mut cursor = self.txn.cursor(self.tables.history)?;
        cursor.seek_first()?;
        let mut ids = Vec::new();
        while let Some((key, _)) = cursor.current() {
            ids.push(
                CommitId::from_slice(key)
                    .ok_or_else(|| CoreError::corrupted("malformed commit id key"))?,
            );
            cursor.advance()?;
        }
        Ok(ids)
    }

    /// The newest commit id, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the seek fails or the key is malformed.
    pub fn last_commit(&self) -> CoreResult<Option<CommitId>> {
        let mut cursor = self.txn.cursor(self.tables.history)?;
        cursor.seek_last()?;
        cursor
            .current()
            .map(|(key, _)| {
                CommitId::from_slice(key)
                    .ok_or_else(|| CoreError::corrupted("malformed commit id key"))
            })
            .transpose()
    }

    /// Commits that touched `object`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails or a key is malformed.
    pub fn commits_for_object(&self, object: ObjId) -> CoreResult<Vec<CommitId>> {
        let mut cursor = self.txn.cursor(self.tables.history_by_object)?;
        cursor.seek(object.as_bytes())?;
        let mut ids = Vec::new();
        while let Some((key, _)) = cursor.current() {
            let Some(suffix) = key.strip_prefix(object.as_bytes().as_slice()) else {
                break;
            };
            ids.push(
                CommitId::from_slice(suffix)
                    .ok_or_else(|| CoreError::corrupted("malformed object commit key"))?,
            );
            cursor.advance()?;
        }
        Ok(ids)
    }

    /// Decodes the record of commit `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HistoryFormat`] or [`CoreError::Corrupted`] for
    /// unreadable records.
    pub fn commit(&self, id: CommitId) -> CoreResult<Option<Commit>> {
        self.txn
            .get(self.tables.history, id.as_bytes())?
            .map(|bytes| Commit::decode(id, &bytes))
            .transpose()
    }

    /// Runs `f` over a zero-copy view of commit `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is unreadable.
    pub fn with_view<R>(
        &self,
        id: CommitId,
        f: impl FnOnce(CommitView<'_>) -> R,
    ) -> CoreResult<Option<R>> {
        match self.txn.get(self.tables.history, id.as_bytes())? {
            Some(bytes) => Ok(Some(f(CommitView::new(&bytes)?))),
            None => Ok(None),
        }
    }
}
