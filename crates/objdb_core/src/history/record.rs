//! Relocatable commit records.
//!
//! A commit record is one contiguous blob built in an arena. Every internal
//! link is a `u32` offset from the start of the blob, with 0 meaning null,
//! so the blob can be copied into the store verbatim and read back at any
//! address.
//!
//! ```text
//! header  | magic (4) | version (2) | flags (2) | timestamp ms (8) | actor (16) |
//!         | object_count (4) | first_object (4) |
//! object  | object (16) | type (16) | event_count (4) | first_event (4) | next (4) |
//! event   | kind (1) | pad (3) | next (4) | body... |
//! ```
//!
//! Event bodies:
//!
//! | kind          | body                                             |
//! |---------------|--------------------------------------------------|
//! | `ObjCreated`  | type (16)                                        |
//! | `ObjDeleted`  | type (16)                                        |
//! | `FldChanged`  | field (16), old offset/len (8), new offset/len (8) |
//! | `AsoAdded`    | field (16), other (16), other field (16)          |
//! | `AsoRemoved`  | field (16), other (16), other field (16)          |
//!
//! Objects and events are allocated in the order they are linked, so every
//! `next` offset points forward. Readers reject anything else as corrupt.

use super::commit_id::CommitId;
use crate::arena::Arena;
use crate::codec::{key_owner, AsoKey, FieldId, FieldKey, KeyKind, ObjId, TypeId, ID_LEN};
use crate::error::{CoreError, CoreResult};
use crate::txn::{Change, DiffObserver};

/// Magic bytes at the start of every record.
pub const RECORD_MAGIC: [u8; 4] = *b"OBHR";
/// Record format version written by this build.
pub const RECORD_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 2 + 8 + ID_LEN + 4 + 4;
const H_VERSION: usize = 4;
const H_TIMESTAMP: usize = 8;
const H_ACTOR: usize = 16;
const H_OBJECT_COUNT: usize = 32;
const H_FIRST_OBJECT: usize = 36;

const OBJECT_LEN: usize = 2 * ID_LEN + 4 + 4 + 4;
const O_TYPE: usize = 16;
const O_EVENT_COUNT: usize = 32;
const O_FIRST_EVENT: usize = 36;
const O_NEXT: usize = 40;

const EVENT_HEADER_LEN: usize = 8;
const E_NEXT: usize = 4;

const KIND_OBJ_CREATED: u8 = 1;
const KIND_OBJ_DELETED: u8 = 2;
const KIND_FLD_CHANGED: u8 = 3;
const KIND_ASO_ADDED: u8 = 4;
const KIND_ASO_REMOVED: u8 = 5;

/// One change to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The object was created with the given type.
    ObjCreated {
        /// Type of the new object.
        type_id: TypeId,
    },
    /// The object was deleted.
    ObjDeleted {
        /// Type the object had.
        type_id: TypeId,
    },
    /// A field value changed. Empty payloads mean unset.
    FldChanged {
        /// Field.
        field: FieldId,
        /// Value before the commit.
        old: Vec<u8>,
        /// Value after the commit.
        new: Vec<u8>,
    },
    /// An association half was added.
    AsoAdded {
        /// Association field on this object.
        field: FieldId,
        /// Partner object.
        other: ObjId,
        /// Association field on the partner.
        other_field: FieldId,
    },
    /// An association half was removed.
    AsoRemoved {
        /// Association field on this object.
        field: FieldId,
        /// Partner object.
        other: ObjId,
        /// Association field on the partner.
        other_field: FieldId,
    },
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_id(buf: &mut [u8], at: usize, id: ObjId) {
    buf[at..at + ID_LEN].copy_from_slice(id.as_bytes());
}

fn to_offset(at: usize) -> u32 {
    // Arena capacity is capped at u32::MAX.
    at as u32
}

#[derive(Debug, Clone, Copy)]
struct OpenObject {
    id: ObjId,
    offset: usize,
    last_event: Option<usize>,
    events: u32,
}

/// Builds a commit record from the commit diff.
///
/// Reused across commits: [`RecordBuilder::begin`] clears the previous
/// record.
#[derive(Debug)]
pub struct RecordBuilder {
    arena: Arena,
    objects: u32,
    last_object: Option<usize>,
    open: Option<OpenObject>,
    deleted: Option<ObjId>,
    touched: Vec<ObjId>,
}

impl RecordBuilder {
    /// Creates a builder with its own arena.
    ///
    /// # Errors
    ///
    /// Returns an error if the arena cannot be reserved.
    pub fn new(capacity: usize, page_size: usize) -> CoreResult<Self> {
        let mut builder = Self {
            arena: Arena::new(capacity, page_size)?,
            objects: 0,
            last_object: None,
            open: None,
            deleted: None,
            touched: Vec::new(),
        };
        builder.begin(0, ObjId::NIL)?;
        Ok(builder)
    }

    /// Starts a new record, discarding the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ArenaExhausted`] if the header does not fit.
    pub fn begin(&mut self, timestamp_ms: i64, actor: ObjId) -> CoreResult<()> {
        self.arena.reset();
        self.objects = 0;
        self.last_object = None;
        self.open = None;
        self.deleted = None;
        self.touched.clear();

        let header = self.arena.alloc_zeroed(HEADER_LEN)?;
        debug_assert_eq!(header.offset(), 0);
        let buf = self.arena.as_bytes_mut();
        buf[..4].copy_from_slice(&RECORD_MAGIC);
        buf[H_VERSION..H_VERSION + 2].copy_from_slice(&RECORD_VERSION.to_le_bytes());
        buf[H_TIMESTAMP..H_TIMESTAMP + 8].copy_from_slice(&timestamp_ms.to_le_bytes());
        put_id(buf, H_ACTOR, actor);
        Ok(())
    }

    /// Returns true if no event has been recorded since [`RecordBuilder::begin`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects == 0
    }

    /// Objects with at least one event, in key order.
    #[must_use]
    pub fn touched(&self) -> &[ObjId] {
        &self.touched
    }

    /// Returns the encoded record.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.arena.as_bytes()
    }

    /// Fills in the type of every object block that saw no create or delete
    /// event, using `lookup` to find the object's current type.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures.
    pub fn resolve_types(
        &mut self,
        mut lookup: impl FnMut(ObjId) -> CoreResult<Option<TypeId>>,
    ) -> CoreResult<()> {
        let mut at = read_u32(self.arena.as_bytes(), H_FIRST_OBJECT)? as usize;
        while at != 0 {
            let bytes = self.arena.as_bytes();
            let id = read_id(bytes, at)?;
            let next = read_u32(bytes, at + O_NEXT)? as usize;
            if read_id(bytes, at + O_TYPE)?.is_nil() {
                if let Some(type_id) = lookup(id)? {
                    put_id(self.arena.as_bytes_mut(), at + O_TYPE, type_id);
                }
            }
            at = next;
        }
        Ok(())
    }

    fn object_block(&mut self, owner: ObjId) -> CoreResult<OpenObject> {
        if let Some(open) = self.open.filter(|o| o.id == owner) {
            return Ok(open);
        }
        let at = self.arena.alloc_zeroed(OBJECT_LEN)?.offset() as usize;
        let buf = self.arena.as_bytes_mut();
        put_id(buf, at, owner);
        match self.last_object {
            Some(prev) => put_u32(buf, prev + O_NEXT, to_offset(at)),
            None => put_u32(buf, H_FIRST_OBJECT, to_offset(at)),
        }
        self.objects += 1;
        put_u32(buf, H_OBJECT_COUNT, self.objects);

        self.last_object = Some(at);
        self.touched.push(owner);
        let open = OpenObject {
            id: owner,
            offset: at,
            last_event: None,
            events: 0,
        };
        self.open = Some(open);
        Ok(open)
    }

    /// Appends an event with a zeroed body and returns the body offset.
    fn push_event(&mut self, owner: ObjId, kind: u8, body_len: usize) -> CoreResult<usize> {
        let mut open = self.object_block(owner)?;
        let at = self.arena.alloc_zeroed(EVENT_HEADER_LEN + body_len)?.offset() as usize;
        let buf = self.arena.as_bytes_mut();
        buf[at] = kind;
        match open.last_event {
            Some(prev) => put_u32(buf, prev + E_NEXT, to_offset(at)),
            None => put_u32(buf, open.offset + O_FIRST_EVENT, to_offset(at)),
        }
        open.events += 1;
        put_u32(buf, open.offset + O_EVENT_COUNT, open.events);
        open.last_event = Some(at);
        self.open = Some(open);
        Ok(at + EVENT_HEADER_LEN)
    }

    fn set_type(&mut self, owner: ObjId, type_id: TypeId) -> CoreResult<()> {
        let open = self.object_block(owner)?;
        put_id(self.arena.as_bytes_mut(), open.offset + O_TYPE, type_id);
        Ok(())
    }

    fn object_event(&mut self, owner: ObjId, kind: u8, type_id: TypeId) -> CoreResult<()> {
        let body = self.push_event(owner, kind, ID_LEN)?;
        put_id(self.arena.as_bytes_mut(), body, type_id);
        self.set_type(owner, type_id)
    }

    fn field_event(&mut self, key: FieldKey, old: &[u8], new: &[u8]) -> CoreResult<()> {
        let body = self.push_event(key.object, KIND_FLD_CHANGED, ID_LEN + 16)?;
        let old_at = self.alloc_payload(old)?;
        let new_at = self.alloc_payload(new)?;
        let buf = self.arena.as_bytes_mut();
        put_id(buf, body, key.field);
        put_u32(buf, body + 16, old_at);
        put_u32(buf, body + 20, to_offset(old.len()));
        put_u32(buf, body + 24, new_at);
        put_u32(buf, body + 28, to_offset(new.len()));
        Ok(())
    }

    fn alloc_payload(&mut self, payload: &[u8]) -> CoreResult<u32> {
        if payload.is_empty() {
            return Ok(0);
        }
        Ok(self.arena.alloc(payload)?.offset())
    }

    fn aso_event(&mut self, kind: u8, aso: AsoKey) -> CoreResult<()> {
        let body = self.push_event(aso.object, kind, 3 * ID_LEN)?;
        let buf = self.arena.as_bytes_mut();
        put_id(buf, body, aso.field);
        put_id(buf, body + ID_LEN, aso.other);
        put_id(buf, body + 2 * ID_LEN, aso.other_field);
        Ok(())
    }
}

fn parse_type(value: Option<&[u8]>) -> CoreResult<Option<TypeId>> {
    value
        .map(|v| ObjId::from_slice(v).ok_or_else(|| CoreError::corrupted("object record without a type id")))
        .transpose()
}

impl DiffObserver for RecordBuilder {
    fn observe(&mut self, change: &Change<'_>) -> CoreResult<()> {
        let owner = key_owner(change.key)
            .ok_or_else(|| CoreError::corrupted(format!("key of {} bytes", change.key.len())))?;

        match KeyKind::of(change.key) {
            Some(KeyKind::Object) => {
                match (parse_type(change.old)?, parse_type(change.new)?) {
                    (None, Some(created)) => self.object_event(owner, KIND_OBJ_CREATED, created)?,
                    (Some(deleted), None) => {
                        self.object_event(owner, KIND_OBJ_DELETED, deleted)?;
                        self.deleted = Some(owner);
                    }
                    (Some(before), Some(after)) if before != after => {
                        self.object_event(owner, KIND_OBJ_DELETED, before)?;
                        self.object_event(owner, KIND_OBJ_CREATED, after)?;
                    }
                    _ => {}
                }
            }
            Some(kind) => {
                // Removals on a deleted object are implied by its ObjDeleted event.
                if change.new.is_none() && self.deleted == Some(owner) {
                    return Ok(());
                }
                if change.is_noop() {
                    return Ok(());
                }
                if kind == KeyKind::Field {
                    let key = FieldKey::parse(change.key)
                        .ok_or_else(|| CoreError::corrupted("malformed field key"))?;
                    self.field_event(
                        key,
                        change.old.unwrap_or_default(),
                        change.new.unwrap_or_default(),
                    )?;
                } else {
                    let aso = AsoKey::parse(change.key)
                        .ok_or_else(|| CoreError::corrupted("malformed association key"))?;
                    match (change.old, change.new) {
                        (None, Some(_)) => self.aso_event(KIND_ASO_ADDED, aso)?,
                        (Some(_), None) => self.aso_event(KIND_ASO_REMOVED, aso)?,
                        _ => {}
                    }
                }
            }
            None => {
                return Err(CoreError::corrupted(format!(
                    "key of {} bytes",
                    change.key.len()
                )))
            }
        }
        Ok(())
    }
}

fn slice(bytes: &[u8], at: usize, len: usize) -> CoreResult<&[u8]> {
    at.checked_add(len)
        .and_then(|end| bytes.get(at..end))
        .ok_or_else(|| CoreError::corrupted(format!("history record truncated at offset {at}")))
}

fn read_u32(bytes: &[u8], at: usize) -> CoreResult<u32> {
    let raw: [u8; 4] = slice(bytes, at, 4)?
        .try_into()
        .map_err(|_| CoreError::corrupted("invalid u32"))?;
    Ok(u32::from_le_bytes(raw))
}

fn read_id(bytes: &[u8], at: usize) -> CoreResult<ObjId> {
    ObjId::read_at(bytes, at)
        .ok_or_else(|| CoreError::corrupted(format!("history record truncated at offset {at}")))
}

/// Follows a link, which must be null or point past `from`.
fn follow(bytes: &[u8], from: usize, link_at: usize) -> CoreResult<Option<usize>> {
    match read_u32(bytes, link_at)? as usize {
        0 => Ok(None),
        next if next > from && next < bytes.len() => Ok(Some(next)),
        next => Err(CoreError::corrupted(format!(
            "history link at {link_at} points to {next}"
        ))),
    }
}

/// Zero-copy reader over an encoded record.
#[derive(Debug, Clone, Copy)]
pub struct CommitView<'a> {
    bytes: &'a [u8],
}

impl<'a> CommitView<'a> {
    /// Validates the header of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HistoryFormat`] for records written by another
    /// format version and [`CoreError::Corrupted`] for anything unreadable.
    pub fn new(bytes: &'a [u8]) -> CoreResult<Self> {
        if slice(bytes, 0, HEADER_LEN)?[..4] != RECORD_MAGIC {
            return Err(CoreError::corrupted("bad history record magic"));
        }
        let version = u16::from_le_bytes([bytes[H_VERSION], bytes[H_VERSION + 1]]);
        if version != RECORD_VERSION {
            tracing::warn!(found = version, expected = RECORD_VERSION, "history format mismatch");
            return Err(CoreError::HistoryFormat {
                expected: RECORD_VERSION,
                found: version,
            });
        }
        Ok(Self { bytes })
    }

    /// Commit time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[H_TIMESTAMP..H_TIMESTAMP + 8]);
        i64::from_le_bytes(raw)
    }

    /// Actor that made the commit.
    #[must_use]
    pub fn actor(&self) -> ObjId {
        ObjId::read_at(self.bytes, H_ACTOR).unwrap_or(ObjId::NIL)
    }

    /// Number of object blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is unreadable.
    pub fn object_count(&self) -> CoreResult<u32> {
        read_u32(self.bytes, H_OBJECT_COUNT)
    }

    /// Iterates the object blocks.
    #[must_use]
    pub fn objects(&self) -> ObjectIter<'a> {
        ObjectIter {
            bytes: self.bytes,
            next: follow(self.bytes, 0, H_FIRST_OBJECT).map_err(Some),
        }
    }
}

/// Iterator state: either the next offset or a pending error.
type Next = Result<Option<usize>, Option<CoreError>>;

/// Iterator over the object blocks of a record.
#[derive(Debug)]
pub struct ObjectIter<'a> {
    bytes: &'a [u8],
    next: Next,
}

impl<'a> Iterator for ObjectIter<'a> {
    type Item = CoreResult<ObjectView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.next, Ok(None)) {
            Ok(None) => None,
            Err(err) => err.map(Err),
            Ok(Some(at)) => {
                if let Err(err) = slice(self.bytes, at, OBJECT_LEN) {
                    return Some(Err(err));
                }
                self.next = follow(self.bytes, at, at + O_NEXT).map_err(Some);
                Some(Ok(ObjectView {
                    bytes: self.bytes,
                    offset: at,
                }))
            }
        }
    }
}

/// One object block.
#[derive(Debug, Clone, Copy)]
pub struct ObjectView<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ObjectView<'a> {
    /// The object's id.
    #[must_use]
    pub fn object(&self) -> ObjId {
        ObjId::read_at(self.bytes, self.offset).unwrap_or(ObjId::NIL)
    }

    /// The object's type.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        ObjId::read_at(self.bytes, self.offset + O_TYPE).unwrap_or(ObjId::NIL)
    }

    /// Iterates the object's events.
    #[must_use]
    pub fn events(&self) -> EventIter<'a> {
        EventIter {
            bytes: self.bytes,
            next: follow(self.bytes, self.offset, self.offset + O_FIRST_EVENT).map_err(Some),
        }
    }
}

/// Iterator over the events of one object block.
#[derive(Debug)]
pub struct EventIter<'a> {
    bytes: &'a [u8],
    next: Next,
}

impl EventIter<'_> {
    fn decode(&self, at: usize) -> CoreResult<Event> {
        let header = slice(self.bytes, at, EVENT_HEADER_LEN)?;
        let body = at + EVENT_HEADER_LEN;
        let event = match header[0] {
            KIND_OBJ_CREATED => Event::ObjCreated {
                type_id: read_id(self.bytes, body)?,
            },
            KIND_OBJ_DELETED => Event::ObjDeleted {
                type_id: read_id(self.bytes, body)?,
            },
            KIND_FLD_CHANGED => Event::FldChanged {
                field: read_id(self.bytes, body)?,
                old: self.payload(body + 16)?,
                new: self.payload(body + 24)?,
            },
            kind @ (KIND_ASO_ADDED | KIND_ASO_REMOVED) => {
                let field = read_id(self.bytes, body)?;
                let other = read_id(self.bytes, body + ID_LEN)?;
                let other_field = read_id(self.bytes, body + 2 * ID_LEN)?;
                if kind == KIND_ASO_ADDED {
                    Event::AsoAdded {
                        field,
                        other,
                        other_field,
                    }
                } else {
                    Event::AsoRemoved {
                        field,
                        other,
                        other_field,
                    }
                }
            }
            kind => return Err(CoreError::corrupted(format!("unknown history event kind {kind}"))),
        };
        Ok(event)
    }

    fn payload(&self, at: usize) -> CoreResult<Vec<u8>> {
        let offset = read_u32(self.bytes, at)? as usize;
        let len = read_u32(self.bytes, at + 4)? as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        Ok(slice(self.bytes, offset, len)?.to_vec())
    }
}

impl Iterator for EventIter<'_> {
    type Item = CoreResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.next, Ok(None)) {
            Ok(None) => None,
            Err(err) => err.map(Err),
            Ok(Some(at)) => {
                self.next = follow(self.bytes, at, at + E_NEXT).map_err(Some);
                Some(self.decode(at))
            }
        }
    }
}

/// All changes one commit made to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectChanges {
    /// The object.
    pub object: ObjId,
    /// Its type, or nil if it could not be determined.
    pub type_id: TypeId,
    /// Events in key order.
    pub events: Vec<Event>,
}

/// A decoded commit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Commit id.
    pub id: CommitId,
    /// Commit time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Actor that made the commit.
    pub actor: ObjId,
    /// Per-object changes in key order.
    pub objects: Vec<ObjectChanges>,
}

impl Commit {
    /// Decodes an encoded record.
    ///
    /// # Errors
    ///
    /// See [`CommitView::new`].
    pub fn decode(id: CommitId, bytes: &[u8]) -> CoreResult<Self> {
        let view = CommitView::new(bytes)?;
        let objects = view
            .objects()
            .map(|object| {
                let object = object?;
                Ok(ObjectChanges {
                    object: object.object(),
                    type_id: object.type_id(),
                    events: object.events().collect::<CoreResult<_>>()?,
                })
            })
            .collect::<CoreResult<_>>()?;
        Ok(Self {
            id,
            timestamp_ms: view.timestamp_ms(),
            actor: view.actor(),
            objects,
        })
    }

    /// Returns the changes made to `object`.
    #[must_use]
    pub fn changes_for(&self, object: ObjId) -> Option<&ObjectChanges> {
        self.objects.iter().find(|o| o.object == object)
    }
}
