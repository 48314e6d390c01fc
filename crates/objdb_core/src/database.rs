//! Database facade.

use crate::codec::{FieldId, ObjId};
use crate::config::Config;
use crate::error::CoreResult;
use crate::history::{CommitId, CommitIdGenerator, History, HISTORY_BY_OBJECT_TABLE, HISTORY_TABLE};
use crate::model::Model;
use crate::search::{self, search_key_compare, Criterion, SearchIndex, SEARCH_TABLE};
use crate::session::{Session, SessionMode};
use objdb_storage::{compare_lexicographic, InMemoryStore, KvStore, TableId};
use std::collections::BTreeSet;

/// Name of the object table.
pub const OBJECTS_TABLE: &str = "objects";

/// Handles of the tables a database uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tables {
    /// Objects, field values and associations.
    pub objects: TableId,
    /// Commit records by commit id.
    pub history: TableId,
    /// Object id ‖ commit id, empty values.
    pub history_by_object: TableId,
    /// Search index entries.
    pub search: TableId,
}

impl Tables {
    fn open(store: &dyn KvStore) -> CoreResult<Self> {
        Ok(Self {
            objects: store.open_table(OBJECTS_TABLE, compare_lexicographic)?,
            history: store.open_table(HISTORY_TABLE, compare_lexicographic)?,
            history_by_object: store.open_table(HISTORY_BY_OBJECT_TABLE, compare_lexicographic)?,
            search: store.open_table(SEARCH_TABLE, search_key_compare)?,
        })
    }
}

/// The main database handle.
///
/// A database couples a base store with the model describing its objects.
/// Work happens in [`Session`]s; any number of read sessions may coexist
/// with one writing session at a time.
///
/// # Creating a database
///
/// ```rust,ignore
/// use objdb_core::{Database, Model, TypeDef};
///
/// let mut model = Model::new();
/// model.add_type(TypeDef::new(PERSON, "Person"))?;
/// let db = Database::in_memory(model)?;
///
/// db.transaction(|session| {
///     session.create_obj(PERSON, None)?;
///     Ok(())
/// })?;
/// ```
pub struct Database {
    store: Box<dyn KvStore>,
    tables: Tables,
    model: Model,
    config: Config,
    commit_ids: CommitIdGenerator,
}

impl Database {
    fn assemble(store: Box<dyn KvStore>, model: Model, config: Config) -> CoreResult<Self> {
        let tables = Tables::open(store.as_ref())?;
        Ok(Self {
            store,
            tables,
            model,
            config,
            commit_ids: CommitIdGenerator::new(),
        })
    }

    /// Creates a database over `store`, installing `model`.
    ///
    /// The model is validated and written in a bootstrap commit, so a later
    /// [`Database::open`] on the same store finds it.
    ///
    /// # Errors
    ///
    /// Returns the first model inconsistency or storage failure.
    pub fn create(store: Box<dyn KvStore>, model: Model, config: Config) -> CoreResult<Self> {
        model.validate()?;
        let mut db = Self::assemble(store, model, config)?;
        db.resume_commit_ids()?;
        {
            let mut session = db.session()?;
            db.model.persist(&mut session)?;
            session.commit()?;
        }
        tracing::info!(
            types = db.model.types().count(),
            fields = db.model.fields().count(),
            "database created"
        );
        Ok(db)
    }

    /// Opens a database whose model was installed by [`Database::create`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Corrupted`] for unreadable schema objects
    /// and any storage failure.
    pub fn open(store: Box<dyn KvStore>, config: Config) -> CoreResult<Self> {
        let mut db = Self::assemble(store, Model::new(), config)?;
        let model = {
            let session = db.read_session()?;
            Model::load(&session)?
        };
        db.model = model;
        db.resume_commit_ids()?;
        tracing::info!(
            types = db.model.types().count(),
            fields = db.model.fields().count(),
            "database opened"
        );
        Ok(db)
    }

    /// Creates a database over a fresh [`InMemoryStore`] with default
    /// configuration.
    ///
    /// # Errors
    ///
    /// See [`Database::create`].
    pub fn in_memory(model: Model) -> CoreResult<Self> {
        Self::create(Box::new(InMemoryStore::new()), model, Config::default())
    }

    fn resume_commit_ids(&mut self) -> CoreResult<()> {
        let last = self.history()?.last_commit()?;
        if let Some(last) = last {
            self.commit_ids = CommitIdGenerator::starting_after(last);
        }
        Ok(())
    }

    /// Opens a read-write session.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot or the session arenas cannot be
    /// set up.
    pub fn session(&self) -> CoreResult<Session<'_>> {
        Session::new(self, SessionMode::ReadWrite)
    }

    /// Opens a read-only session.
    ///
    /// # Errors
    ///
    /// See [`Database::session`].
    pub fn read_session(&self) -> CoreResult<Session<'_>> {
        Session::new(self, SessionMode::ReadOnly)
    }

    /// Runs `f` in a new session and commits it if `f` succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, which discards the session's changes, or
    /// the commit failure.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Session<'_>) -> CoreResult<T>,
    {
        let mut session = self.session()?;
        let result = f(&mut session)?;
        session.commit()?;
        Ok(result)
    }

    /// Opens the history read surface on the latest committed state.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be taken.
    pub fn history(&self) -> CoreResult<History<'_>> {
        Ok(History::new(self.store.begin_read()?, self.tables))
    }

    /// Searches the latest committed state.
    ///
    /// # Errors
    ///
    /// See [`SearchIndex::execute`].
    pub fn search(&self, field: FieldId, criterion: &Criterion) -> CoreResult<BTreeSet<ObjId>> {
        let txn = self.store.begin_read()?;
        SearchIndex::new(txn.as_ref(), self.tables, &self.model, &self.config).execute(field, criterion)
    }

    /// Regenerates the search entries of `field` from the stored values.
    ///
    /// Returns the number of values indexed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidArgument`] if the field is not
    /// indexed, and any storage failure.
    pub fn rebuild_search(&self, field: FieldId) -> CoreResult<usize> {
        let mut wtx = self.store.begin_write()?;
        match search::rebuild(wtx.as_mut(), self.tables, &self.model, &self.config, field) {
            Ok(count) => {
                wtx.commit()?;
                Ok(count)
            }
            Err(err) => {
                wtx.abort();
                Err(err)
            }
        }
    }

    /// Returns the model.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the table handles.
    #[must_use]
    pub fn tables(&self) -> Tables {
        self.tables
    }

    /// Returns the base store.
    #[must_use]
    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    pub(crate) fn next_commit_id(&self) -> CommitId {
        self.commit_ids.next()
    }
}
