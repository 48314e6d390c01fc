//! Fixed-width key layouts for the object key space.
//!
//! | record       | key                                 | length |
//! |--------------|-------------------------------------|--------|
//! | object       | object                              | 16     |
//! | field value  | object ‖ field                      | 32     |
//! | association  | object ‖ field ‖ other ‖ other field | 64     |
//!
//! Because every key starts with the owning object id and shorter keys sort
//! before their extensions, a forward scan from an object id visits the
//! object record, then its field values, then its associations.

use super::id::{FieldId, ObjId, ID_LEN};

/// Length of an object record key.
pub const OBJECT_KEY_LEN: usize = ID_LEN;
/// Length of a field-value record key.
pub const FIELD_KEY_LEN: usize = 2 * ID_LEN;
/// Length of an association record key.
pub const ASO_KEY_LEN: usize = 4 * ID_LEN;

/// Record kind, discriminated by key length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Object record.
    Object,
    /// Field-value record.
    Field,
    /// Association record.
    Association,
}

impl KeyKind {
    /// Classifies a key, or `None` if the length matches no layout.
    #[must_use]
    pub fn of(key: &[u8]) -> Option<Self> {
        match key.len() {
            OBJECT_KEY_LEN => Some(Self::Object),
            FIELD_KEY_LEN => Some(Self::Field),
            ASO_KEY_LEN => Some(Self::Association),
            _ => None,
        }
    }
}

/// Encodes an object record key.
#[inline]
#[must_use]
pub fn object_key(id: ObjId) -> [u8; OBJECT_KEY_LEN] {
    *id.as_bytes()
}

/// Encodes a field-value record key.
#[inline]
#[must_use]
pub fn field_key(id: ObjId, field: FieldId) -> [u8; FIELD_KEY_LEN] {
    let mut key = [0u8; FIELD_KEY_LEN];
    key[..ID_LEN].copy_from_slice(id.as_bytes());
    key[ID_LEN..].copy_from_slice(field.as_bytes());
    key
}

/// Encodes an association half key.
#[inline]
#[must_use]
pub fn aso_key(object: ObjId, field: FieldId, other: ObjId, other_field: FieldId) -> [u8; ASO_KEY_LEN] {
    AsoKey::new(object, field, other, other_field).encode()
}

/// Returns the object id every key starts with.
#[must_use]
pub fn key_owner(key: &[u8]) -> Option<ObjId> {
    ObjId::read_at(key, 0)
}

/// Returns the smallest object key greater than every key owned by `id`,
/// or `None` for the last possible id.
#[must_use]
pub fn next_object_key(id: ObjId) -> Option<[u8; OBJECT_KEY_LEN]> {
    id.as_u128()
        .checked_add(1)
        .map(|next| object_key(ObjId::from_u128(next)))
}

/// A decoded field-value key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldKey {
    /// Owning object.
    pub object: ObjId,
    /// Field.
    pub field: FieldId,
}

impl FieldKey {
    /// Decodes a 32-byte key.
    #[must_use]
    pub fn parse(key: &[u8]) -> Option<Self> {
        if key.len() != FIELD_KEY_LEN {
            return None;
        }
        Some(Self {
            object: ObjId::read_at(key, 0)?,
            field: ObjId::read_at(key, ID_LEN)?,
        })
    }
}

/// One directed half of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsoKey {
    /// Object owning this half.
    pub object: ObjId,
    /// Association field on `object`.
    pub field: FieldId,
    /// Partner object.
    pub other: ObjId,
    /// Association field on `other`.
    pub other_field: FieldId,
}

impl AsoKey {
    /// Creates an association half.
    #[must_use]
    pub const fn new(object: ObjId, field: FieldId, other: ObjId, other_field: FieldId) -> Self {
        Self {
            object,
            field,
            other,
            other_field,
        }
    }

    /// Decodes a 64-byte key.
    #[must_use]
    pub fn parse(key: &[u8]) -> Option<Self> {
        if key.len() != ASO_KEY_LEN {
            return None;
        }
        Some(Self {
            object: ObjId::read_at(key, 0)?,
            field: ObjId::read_at(key, ID_LEN)?,
            other: ObjId::read_at(key, 2 * ID_LEN)?,
            other_field: ObjId::read_at(key, 3 * ID_LEN)?,
        })
    }

    /// Returns the reciprocal half stored on the partner.
    #[must_use]
    pub const fn mirror(&self) -> Self {
        Self::new(self.other, self.other_field, self.object, self.field)
    }

    /// Encodes the key.
    #[must_use]
    pub fn encode(&self) -> [u8; ASO_KEY_LEN] {
        let mut key = [0u8; ASO_KEY_LEN];
        key[..ID_LEN].copy_from_slice(self.object.as_bytes());
        key[ID_LEN..2 * ID_LEN].copy_from_slice(self.field.as_bytes());
        key[2 * ID_LEN..3 * ID_LEN].copy_from_slice(self.other.as_bytes());
        key[3 * ID_LEN..].copy_from_slice(self.other_field.as_bytes());
        key
    }
}
