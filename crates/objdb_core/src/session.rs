//! Sessions: the transactional object API.
//!
//! A [`Session`] pins a snapshot of the object table and stages every
//! mutation in its overlay. Reads see the session's own writes. Nothing is
//! visible to other sessions until [`Session::commit`], which applies the
//! overlay, the history record and the search index changes in one base
//! store write transaction.
//!
//! ```rust,ignore
//! let mut session = db.session()?;
//! let alice = session.create_obj(PERSON, None)?;
//! session.set_fld_value(alice, NAME, &Value::from("Alice").encode())?;
//! session.commit()?;
//! ```

use crate::codec::{
    field_key, next_object_key, object_key, AsoKey, FieldId, KeyKind, ObjId, TypeId, Value, ASO_KEY_LEN,
};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::history::{self, CommitId, RecordBuilder};
use crate::model::FieldDef;
use crate::overlay::OrderedMap;
use crate::search::{Criterion, SearchIndex, SearchIndexer};
use crate::txn::{DiffObserver, TxnStore};
use objdb_storage::{compare_lexicographic, WriteTxn};
use std::collections::BTreeSet;

/// Whether a session may mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Reads only; every mutation fails with [`CoreError::ReadOnly`].
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// A unit of work over one database snapshot.
pub struct Session<'db> {
    db: &'db Database,
    mode: SessionMode,
    store: TxnStore<'db>,
    actor: ObjId,
    history: Option<RecordBuilder>,
    indexer: Option<SearchIndexer<'db>>,
}

impl<'db> Session<'db> {
    pub(crate) fn new(db: &'db Database, mode: SessionMode) -> CoreResult<Self> {
        let config = db.config();
        let snapshot = db.store().begin_read()?;
        let writable = mode == SessionMode::ReadWrite;
        // A read-only overlay stays empty; one page is enough.
        let capacity = if writable { config.arena_capacity } else { config.page_size };
        let overlay = OrderedMap::new(compare_lexicographic, capacity, config.page_size)?;

        let history = if writable && config.history_enabled {
            Some(RecordBuilder::new(config.arena_capacity, config.page_size)?)
        } else {
            None
        };
        let indexer = if writable && config.search_enabled {
            Some(SearchIndexer::new(db.model(), config.arena_capacity, config.page_size)?)
        } else {
            None
        };

        Ok(Self {
            db,
            mode,
            store: TxnStore::new(snapshot, db.tables().objects, overlay),
            actor: config.default_actor,
            history,
            indexer,
        })
    }

    /// Sets the actor recorded in history for this session's commits.
    #[must_use]
    pub fn with_actor(mut self, actor: ObjId) -> Self {
        self.actor = actor;
        self
    }

    /// The actor recorded in history.
    #[must_use]
    pub fn actor(&self) -> ObjId {
        self.actor
    }

    /// Returns true for read-only sessions.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.mode == SessionMode::ReadOnly
    }

    /// Number of staged record changes.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.store.pending()
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        match self.mode {
            SessionMode::ReadWrite => Ok(()),
            SessionMode::ReadOnly => Err(CoreError::ReadOnly),
        }
    }

    /// Creates an object of `type_id`.
    ///
    /// With `fixed_id` the object gets that id; otherwise a random one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] for types missing from the model,
    /// [`CoreError::ObjectExists`] if the fixed id is taken, and
    /// [`CoreError::InvalidArgument`] for a nil fixed id.
    pub fn create_obj(&mut self, type_id: TypeId, fixed_id: Option<ObjId>) -> CoreResult<ObjId> {
        self.ensure_writable()?;
        if self.db.model().type_def(type_id).is_none() {
            return Err(CoreError::UnknownType(type_id));
        }
        let id = match fixed_id {
            Some(id) if id.is_nil() => return Err(CoreError::invalid_argument("nil object id")),
            Some(id) => id,
            None => ObjId::new(),
        };
        let key = object_key(id);
        if self.store.contains(&key)? {
            return Err(CoreError::ObjectExists(id));
        }
        self.store.put(&key, type_id.as_bytes())?;
        tracing::trace!(%id, %type_id, "object created");
        Ok(id)
    }

    /// Deletes an object with all its fields and associations, including the
    /// mirror half of every association.
    ///
    /// Returns false if the object did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a read or staged write fails.
    pub fn delete_obj(&mut self, id: ObjId) -> CoreResult<bool> {
        self.ensure_writable()?;
        if !self.store.contains(&object_key(id))? {
            return Ok(false);
        }

        let mut doomed = Vec::new();
        let mut mirrors = Vec::new();
        {
            let mut cursor = self.store.cursor()?;
            cursor.seek(id.as_bytes())?;
            while let Some((key, _)) = cursor.current() {
                if !key.starts_with(id.as_bytes()) {
                    break;
                }
                if let Some(aso) = AsoKey::parse(key) {
                    mirrors.push(aso.mirror().encode());
                }
                doomed.push(key.to_vec());
                cursor.advance()?;
            }
        }

        for key in &doomed {
            self.store.delete(key)?;
        }
        for key in &mirrors {
            self.store.delete(key)?;
        }
        tracing::trace!(%id, records = doomed.len(), mirrors = mirrors.len(), "object deleted");
        Ok(true)
    }

    /// Returns the type of `id`, or nil if the object does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] for malformed object records.
    pub fn get_typ_id(&self, id: ObjId) -> CoreResult<TypeId> {
        match self.store.get(&object_key(id))? {
            Some(value) => ObjId::from_slice(&value)
                .ok_or_else(|| CoreError::corrupted(format!("object {id} has a malformed type id"))),
            None => Ok(ObjId::NIL),
        }
    }

    fn existing_type(&self, id: ObjId) -> CoreResult<TypeId> {
        let type_id = self.get_typ_id(id)?;
        if type_id.is_nil() {
            return Err(CoreError::ObjectNotFound(id));
        }
        Ok(type_id)
    }

    fn scalar_field(&self, type_id: TypeId, field: FieldId) -> CoreResult<&'db FieldDef> {
        let def = self.db.model().field_on(type_id, field)?;
        if !def.data_type.is_scalar() {
            return Err(CoreError::type_mismatch(field, "association fields hold no value"));
        }
        Ok(def)
    }

    fn association_field(&self, type_id: TypeId, field: FieldId) -> CoreResult<&'db FieldDef> {
        let def = self.db.model().field_on(type_id, field)?;
        if def.association.is_none() {
            return Err(CoreError::type_mismatch(field, "not an association field"));
        }
        Ok(def)
    }

    /// Sets a field value given as `tag ‖ payload`. Empty bytes unset it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ObjectNotFound`], [`CoreError::UnknownField`] if
    /// the field is not defined on the object's type, and
    /// [`CoreError::TypeMismatch`] for association fields, tags that differ
    /// from the field's data type and malformed payloads.
    pub fn set_fld_value(&mut self, id: ObjId, field: FieldId, value: &[u8]) -> CoreResult<()> {
        self.ensure_writable()?;
        let type_id = self.existing_type(id)?;
        let def = self.scalar_field(type_id, field)?;
        let key = field_key(id, field);

        if value.is_empty() {
            return self.store.delete(&key);
        }
        let decoded = Value::decode(value).map_err(|e| CoreError::type_mismatch(field, e.to_string()))?;
        match decoded {
            Some(v) if v.data_type() == def.data_type => self.store.put(&key, value),
            Some(v) => Err(CoreError::type_mismatch(
                field,
                format!("expected {}, got {}", def.data_type, v.data_type()),
            )),
            None => self.store.delete(&key),
        }
    }

    /// Reads a field value as `tag ‖ payload`.
    ///
    /// Unset fields and missing objects read as empty.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] if the field is not defined on the
    /// object's type.
    pub fn get_fld_value(&self, id: ObjId, field: FieldId) -> CoreResult<Vec<u8>> {
        let type_id = self.get_typ_id(id)?;
        if type_id.is_nil() {
            return Ok(Vec::new());
        }
        self.scalar_field(type_id, field)?;
        Ok(self
            .store
            .get(&field_key(id, field))?
            .map(|v| v.to_vec())
            .unwrap_or_default())
    }

    /// Links `a.fa` with `b.fb`, writing both halves.
    ///
    /// A single-valued side first drops its current edge together with that
    /// edge's mirror. Linking an existing edge again changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ObjectNotFound`] for missing objects,
    /// [`CoreError::UnknownField`] for fields not on the object types, and
    /// [`CoreError::TypeMismatch`] if the fields are not each other's mirror.
    pub fn create_aso(&mut self, a: ObjId, fa: FieldId, b: ObjId, fb: FieldId) -> CoreResult<()> {
        self.ensure_writable()?;
        let def_a = self.association_field(self.existing_type(a)?, fa)?;
        let def_b = self.association_field(self.existing_type(b)?, fb)?;
        let (Some(aso_a), Some(aso_b)) = (def_a.association, def_b.association) else {
            return Err(CoreError::type_mismatch(fa, "not an association field"));
        };
        if aso_a.other_field != fb || aso_b.other_field != fa {
            return Err(CoreError::type_mismatch(
                fa,
                format!("field {fa} does not pair with {fb}"),
            ));
        }

        let half = AsoKey::new(a, fa, b, fb);
        let key = half.encode();
        if self.store.contains(&key)? {
            return Ok(());
        }
        if !aso_a.multi {
            self.remove_all_aso(a, fa)?;
        }
        if !aso_b.multi {
            self.remove_all_aso(b, fb)?;
        }
        self.store.put(&key, &[])?;
        self.store.put(&half.mirror().encode(), &[])?;
        Ok(())
    }

    /// Collects the association halves stored under `a.fa`.
    fn aso_halves(&self, a: ObjId, fa: FieldId) -> CoreResult<Vec<AsoKey>> {
        let prefix = field_key(a, fa);
        let mut halves = Vec::new();
        let mut cursor = self.store.cursor()?;
        cursor.seek(&prefix)?;
        while let Some((key, _)) = cursor.current() {
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() == ASO_KEY_LEN {
                if let Some(half) = AsoKey::parse(key) {
                    halves.push(half);
                }
            }
            cursor.advance()?;
        }
        Ok(halves)
    }

    /// Validates `a.fa` as an association field, returning false if `a` does
    /// not exist.
    fn check_aso_source(&self, a: ObjId, fa: FieldId) -> CoreResult<bool> {
        let type_id = self.get_typ_id(a)?;
        if type_id.is_nil() {
            return Ok(false);
        }
        self.association_field(type_id, fa)?;
        Ok(true)
    }

    /// Removes every edge of `a.fa` and their mirrors.
    ///
    /// Returns the number of edges removed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] or [`CoreError::TypeMismatch`] if
    /// `fa` is not an association field of `a`'s type.
    pub fn remove_all_aso(&mut self, a: ObjId, fa: FieldId) -> CoreResult<usize> {
        self.ensure_writable()?;
        if !self.check_aso_source(a, fa)? {
            return Ok(0);
        }
        let halves = self.aso_halves(a, fa)?;
        for half in &halves {
            self.store.delete(&half.encode())?;
            self.store.delete(&half.mirror().encode())?;
        }
        Ok(halves.len())
    }

    /// Removes the edge `a.fa` to `b.fb` and its mirror.
    ///
    /// Returns false if the edge did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a read or staged write fails.
    pub fn remove_aso(&mut self, a: ObjId, fa: FieldId, b: ObjId, fb: FieldId) -> CoreResult<bool> {
        self.ensure_writable()?;
        let half = AsoKey::new(a, fa, b, fb);
        let key = half.encode();
        if !self.store.contains(&key)? {
            return Ok(false);
        }
        self.store.delete(&key)?;
        self.store.delete(&half.mirror().encode())?;
        Ok(true)
    }

    /// Partners linked through `a.fa`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] or [`CoreError::TypeMismatch`] if
    /// `fa` is not an association field of `a`'s type.
    pub fn enumerate_aso(&self, a: ObjId, fa: FieldId) -> CoreResult<Vec<ObjId>> {
        if !self.check_aso_source(a, fa)? {
            return Ok(Vec::new());
        }
        Ok(self.aso_halves(a, fa)?.into_iter().map(|h| h.other).collect())
    }

    /// The first partner linked through `a.fa`, or nil.
    ///
    /// # Errors
    ///
    /// See [`Session::enumerate_aso`].
    pub fn get_single_aso_value(&self, a: ObjId, fa: FieldId) -> CoreResult<ObjId> {
        Ok(self
            .enumerate_aso(a, fa)?
            .into_iter()
            .next()
            .unwrap_or(ObjId::NIL))
    }

    /// Number of edges of `a.fa`.
    ///
    /// # Errors
    ///
    /// See [`Session::enumerate_aso`].
    pub fn get_aso_count(&self, a: ObjId, fa: FieldId) -> CoreResult<usize> {
        if !self.check_aso_source(a, fa)? {
            return Ok(0);
        }
        Ok(self.aso_halves(a, fa)?.len())
    }

    /// Objects whose type is `type_id` or one of its subtypes, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] for types missing from the model.
    pub fn enumerate_objs(&self, type_id: TypeId) -> CoreResult<Vec<ObjId>> {
        let model = self.db.model();
        if model.type_def(type_id).is_none() {
            return Err(CoreError::UnknownType(type_id));
        }

        let mut found = Vec::new();
        let mut cursor = self.store.cursor()?;
        cursor.seek_first()?;
        while let Some((key, value)) = cursor.current() {
            let Some(owner) = ObjId::read_at(key, 0) else {
                return Err(CoreError::corrupted(format!("key of {} bytes", key.len())));
            };
            if KeyKind::of(key) == Some(KeyKind::Object) {
                let object_type = ObjId::from_slice(value)
                    .ok_or_else(|| CoreError::corrupted(format!("object {owner} has a malformed type id")))?;
                if model.is_a(object_type, type_id) {
                    found.push(owner);
                }
            }
            // Skip the rest of this object's records.
            match next_object_key(owner) {
                Some(next) => cursor.seek(&next)?,
                None => break,
            }
        }
        Ok(found)
    }

    /// Runs a search over the committed index.
    ///
    /// Uncommitted changes of this session are not visible to the search.
    ///
    /// # Errors
    ///
    /// See [`SearchIndex::execute`].
    pub fn search(&self, field: FieldId, criterion: &Criterion) -> CoreResult<BTreeSet<ObjId>> {
        SearchIndex::new(self.store.snapshot(), self.db.tables(), self.db.model(), self.db.config())
            .execute(field, criterion)
    }

    /// Drops every staged change.
    pub fn rollback(&mut self) {
        let dropped = self.store.pending();
        self.store.reset();
        tracing::debug!(dropped, "session rolled back");
    }

    /// Publishes the staged changes atomically.
    ///
    /// Returns the commit id, or `None` if there was nothing to commit. On
    /// error nothing is published and the staged changes are kept.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnly`] for read-only sessions, and any
    /// storage, arena or observer failure.
    pub fn commit(&mut self) -> CoreResult<Option<CommitId>> {
        self.ensure_writable()?;
        if !self.store.is_dirty() {
            return Ok(None);
        }

        let db = self.db;
        let mut wtx = db.store().begin_write()?;
        let id = match self.write_commit(wtx.as_mut()) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(error = %err, "commit failed, aborting");
                wtx.abort();
                return Err(err);
            }
        };
        wtx.commit()?;

        let changes = self.store.pending();
        self.store.reset();
        self.store.refresh(db.store().begin_read()?);
        tracing::debug!(commit = %id, changes, actor = %self.actor, "commit published");
        Ok(Some(id))
    }

    fn write_commit(&mut self, wtx: &mut dyn WriteTxn) -> CoreResult<CommitId> {
        let id = self.db.next_commit_id();
        let timestamp = i64::try_from(id.timestamp_ms()).unwrap_or(i64::MAX);

        if let Some(history) = self.history.as_mut() {
            history.begin(timestamp, self.actor)?;
        }
        if let Some(indexer) = self.indexer.as_mut() {
            indexer.reset();
        }

        let mut observers: Vec<&mut dyn DiffObserver> = Vec::with_capacity(2);
        if let Some(history) = self.history.as_mut() {
            observers.push(history);
        }
        if let Some(indexer) = self.indexer.as_mut() {
            observers.push(indexer);
        }
        let applied = self.store.apply(wtx, &mut observers)?;
        drop(observers);

        let tables = self.db.tables();
        if let Some(history) = self.history.as_mut() {
            history::write_record(history, wtx, &tables, id)?;
        }
        if let Some(indexer) = self.indexer.as_mut() {
            indexer.flush(wtx, tables.search)?;
        }
        tracing::trace!(commit = %id, applied, "commit staged");
        Ok(id)
    }
}
