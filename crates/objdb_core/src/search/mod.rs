//! Secondary search index.
//!
//! Indexed string fields get three kinds of entries per value: the text
//! itself, the text reversed, and one entry per distinct 3-character
//! n-gram. Other indexed scalars get one typed entry. Entries are derived
//! from the commit diff by [`SearchIndexer`] and written in the same write
//! transaction as the data they describe.
//!
//! Queries run against committed state only.

mod fuzzy;
mod indexer;
mod key;

pub use fuzzy::{levenshtein, similarity};
pub use indexer::{ngrams, SearchIndexer};
pub use key::{compare_scalar, encode as encode_index_key, search_key_compare, seek_key, IndexKey, Variant, NGRAM_LEN};

use crate::codec::{field_key, DataType, FieldId, KeyKind, ObjId, Value};
use crate::config::Config;
use crate::database::Tables;
use crate::error::{CoreError, CoreResult};
use crate::model::{FieldDef, Model};
use objdb_storage::{ReadTxn, WriteTxn};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Name of the search index table.
pub const SEARCH_TABLE: &str = "search";

/// A search predicate over one indexed field.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// The whole value equals the text.
    Exact(String),
    /// The value starts with the text.
    Prefix(String),
    /// The value ends with the text.
    Postfix(String),
    /// The value contains the text.
    Substring(String),
    /// The value is similar to the text.
    Fuzzy {
        /// Text to compare against.
        text: String,
        /// Minimum similarity in `0.0..=1.0`; defaults to
        /// [`Config::fuzzy_cutoff`].
        cutoff: Option<f64>,
    },
    /// The value lies between the bounds, both inclusive and optional.
    Range {
        /// Lower bound.
        min: Option<Value>,
        /// Upper bound.
        max: Option<Value>,
    },
}

impl Criterion {
    fn is_textual(&self) -> bool {
        !matches!(self, Self::Range { .. })
    }
}

enum Scan {
    Continue,
    Stop,
}

/// Query access to the index through one snapshot.
pub struct SearchIndex<'a> {
    txn: &'a dyn ReadTxn,
    tables: Tables,
    model: &'a Model,
    fuzzy_cutoff: f64,
}

impl<'a> SearchIndex<'a> {
    /// Creates a query handle.
    #[must_use]
    pub fn new(txn: &'a dyn ReadTxn, tables: Tables, model: &'a Model, config: &Config) -> Self {
        Self {
            txn,
            tables,
            model,
            fuzzy_cutoff: config.fuzzy_cutoff,
        }
    }

    /// Returns the objects whose `field` value matches `criterion`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the field is not indexed,
    /// [`CoreError::TypeMismatch`] if the criterion does not fit the field's
    /// data type, and storage errors from the scan.
    pub fn execute(&self, field: FieldId, criterion: &Criterion) -> CoreResult<BTreeSet<ObjId>> {
        let def = indexed_field(self.model, field)?;
        if criterion.is_textual() && def.data_type != DataType::String {
            return Err(CoreError::type_mismatch(
                field,
                format!("text criterion on a {} field", def.data_type),
            ));
        }

        let hits = match criterion {
            Criterion::Exact(text) => self.exact(field, text)?,
            Criterion::Prefix(text) => self.prefix(Variant::Normal, field, text)?,
            Criterion::Postfix(text) => {
                let reversed: String = text.chars().rev().collect();
                self.prefix(Variant::Reverse, field, &reversed)?
            }
            Criterion::Substring(text) => self.substring(field, text)?,
            Criterion::Fuzzy { text, cutoff } => {
                self.fuzzy(field, text, cutoff.unwrap_or(self.fuzzy_cutoff))?
            }
            Criterion::Range { min, max } => self.range(def, min.as_ref(), max.as_ref())?,
        };
        tracing::trace!(%field, hits = hits.len(), "search executed");
        Ok(hits)
    }

    fn scan(
        &self,
        variant: Variant,
        field: FieldId,
        start: &[u8],
        mut visit: impl FnMut(&[u8], ObjId) -> CoreResult<Scan>,
    ) -> CoreResult<()> {
        let mut cursor = self.txn.cursor(self.tables.search)?;
        cursor.seek(&seek_key(variant, field, start))?;
        while let Some((key, _)) = cursor.current() {
            let entry = IndexKey::parse(key).ok_or_else(|| CoreError::corrupted("malformed search key"))?;
            if !entry.is(variant, field) {
                break;
            }
            if let Scan::Stop = visit(entry.value, entry.object)? {
                break;
            }
            cursor.advance()?;
        }
        Ok(())
    }

    fn exact(&self, field: FieldId, text: &str) -> CoreResult<BTreeSet<ObjId>> {
        self.postings(Variant::Normal, field, text)
    }

    /// Objects holding exactly `value` under `variant`.
    fn postings(&self, variant: Variant, field: FieldId, value: &str) -> CoreResult<BTreeSet<ObjId>> {
        let mut hits = BTreeSet::new();
        self.scan(variant, field, value.as_bytes(), |v, object| {
            if v != value.as_bytes() {
                return Ok(Scan::Stop);
            }
            hits.insert(object);
            Ok(Scan::Continue)
        })?;
        Ok(hits)
    }

    fn prefix(&self, variant: Variant, field: FieldId, text: &str) -> CoreResult<BTreeSet<ObjId>> {
        let mut hits = BTreeSet::new();
        self.scan(variant, field, text.as_bytes(), |v, object| {
            if !v.starts_with(text.as_bytes()) {
                return Ok(Scan::Stop);
            }
            hits.insert(object);
            Ok(Scan::Continue)
        })?;
        Ok(hits)
    }

    fn substring(&self, field: FieldId, text: &str) -> CoreResult<BTreeSet<ObjId>> {
        let grams = ngrams(text);
        if grams.is_empty() {
            // Too short for n-grams: test every value.
            let mut hits = BTreeSet::new();
            self.scan(Variant::Normal, field, &[], |v, object| {
                if utf8(v)?.contains(text) {
                    hits.insert(object);
                }
                Ok(Scan::Continue)
            })?;
            return Ok(hits);
        }

        let mut candidates: Option<BTreeSet<ObjId>> = None;
        for gram in &grams {
            let postings = self.postings(Variant::NGram, field, gram)?;
            let narrowed = match candidates {
                None => postings,
                Some(current) => current.intersection(&postings).copied().collect(),
            };
            if narrowed.is_empty() {
                return Ok(narrowed);
            }
            candidates = Some(narrowed);
        }

        // Shared n-grams do not prove adjacency; check the stored text.
        let mut hits = BTreeSet::new();
        for object in candidates.unwrap_or_default() {
            let stored = self.txn.get(self.tables.objects, &field_key(object, field))?;
            let Some(stored) = stored else { continue };
            if let Some(Value::String(value)) = Value::decode(&stored)? {
                if value.contains(text) {
                    hits.insert(object);
                }
            }
        }
        Ok(hits)
    }

    fn fuzzy(&self, field: FieldId, text: &str, cutoff: f64) -> CoreResult<BTreeSet<ObjId>> {
        if !(0.0..=1.0).contains(&cutoff) {
            return Err(CoreError::invalid_argument(format!(
                "fuzzy cutoff {cutoff} outside 0..=1"
            )));
        }
        let mut hits = BTreeSet::new();
        self.scan(Variant::Normal, field, &[], |v, object| {
            if similarity(utf8(v)?, text) >= cutoff {
                hits.insert(object);
            }
            Ok(Scan::Continue)
        })?;
        Ok(hits)
    }

    fn range(&self, def: &FieldDef, min: Option<&Value>, max: Option<&Value>) -> CoreResult<BTreeSet<ObjId>> {
        for bound in min.iter().chain(max.iter()) {
            if bound.data_type() != def.data_type {
                return Err(CoreError::type_mismatch(
                    def.id,
                    format!("{} bound on a {} field", bound.data_type(), def.data_type),
                ));
            }
        }

        let mut hits = BTreeSet::new();
        if def.data_type == DataType::String {
            let min = min.and_then(Value::as_str).unwrap_or_default();
            let max = max.and_then(Value::as_str);
            self.scan(Variant::Normal, def.id, min.as_bytes(), |v, object| {
                if max.is_some_and(|max| v > max.as_bytes()) {
                    return Ok(Scan::Stop);
                }
                hits.insert(object);
                Ok(Scan::Continue)
            })?;
        } else {
            let min = min.map(Value::encode).unwrap_or_default();
            let max = max.map(Value::encode);
            self.scan(Variant::Scalar, def.id, &min, |v, object| {
                if max
                    .as_deref()
                    .is_some_and(|max| compare_scalar(v, max) == Ordering::Greater)
                {
                    return Ok(Scan::Stop);
                }
                hits.insert(object);
                Ok(Scan::Continue)
            })?;
        }
        Ok(hits)
    }
}

fn utf8(bytes: &[u8]) -> CoreResult<&str> {
    std::str::from_utf8(bytes).map_err(|_| CoreError::corrupted("search entry is not UTF-8"))
}

fn indexed_field(model: &Model, field: FieldId) -> CoreResult<&FieldDef> {
    match model.field(field) {
        Some(def) if def.indexed => Ok(def),
        Some(_) => Err(CoreError::invalid_argument(format!("field {field} is not indexed"))),
        None => Err(CoreError::invalid_argument(format!("unknown field {field}"))),
    }
}

/// Drops and regenerates every index entry of `field` inside `wtx`.
///
/// Returns the number of field values indexed.
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] if the field is not indexed, and
/// any storage or decoding failure.
pub(crate) fn rebuild(
    wtx: &mut dyn WriteTxn,
    tables: Tables,
    model: &Model,
    config: &Config,
    field: FieldId,
) -> CoreResult<usize> {
    indexed_field(model, field)?;

    let mut stale = Vec::new();
    for variant in [Variant::Normal, Variant::Reverse, Variant::NGram, Variant::Scalar] {
        let mut cursor = wtx.cursor(tables.search)?;
        cursor.seek(&seek_key(variant, field, &[]))?;
        while let Some((key, _)) = cursor.current() {
            match IndexKey::parse(key) {
                Some(entry) if entry.is(variant, field) => stale.push(key.to_vec()),
                _ => break,
            }
            cursor.advance()?;
        }
    }

    let mut values = Vec::new();
    {
        let mut cursor = wtx.cursor(tables.objects)?;
        cursor.seek_first()?;
        while let Some((key, value)) = cursor.current() {
            if KeyKind::of(key) == Some(KeyKind::Field) && key[16..] == *field.as_bytes() {
                if let Some(object) = ObjId::read_at(key, 0) {
                    values.push((object, value.to_vec()));
                }
            }
            cursor.advance()?;
        }
    }

    for key in &stale {
        wtx.delete(tables.search, key)?;
    }
    let mut indexer = SearchIndexer::new(model, config.arena_capacity, config.page_size)?;
    for (object, value) in &values {
        indexer.stage_value(*object, field, value, true)?;
    }
    indexer.flush(wtx, tables.search)?;

    tracing::debug!(%field, removed = stale.len(), values = values.len(), "search index rebuilt");
    Ok(values.len())
}
