//! Search index keys and their ordering.
//!
//! ```text
//! | variant (1) | field (16) | value (variable) | object (16) |
//! ```
//!
//! Text variants store UTF-8. The scalar variant stores the field value as
//! written (`tag ‖ payload`) and is ordered by its typed value, so range
//! scans over integers, decimals and timestamps follow numeric order.

use crate::codec::{DataType, FieldId, ObjId, ID_LEN};
use std::cmp::Ordering;

/// Kind of index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Variant {
    /// Whole string value.
    Normal = 1,
    /// String value with its characters reversed, for suffix queries.
    Reverse = 2,
    /// One 3-character window of a string value.
    NGram = 3,
    /// Non-string scalar value.
    Scalar = 4,
}

/// Length of an n-gram in characters.
pub const NGRAM_LEN: usize = 3;

const HEAD_LEN: usize = 1 + ID_LEN;
const MIN_KEY_LEN: usize = HEAD_LEN + ID_LEN;

/// Encodes an index key.
#[must_use]
pub fn encode(variant: Variant, field: FieldId, value: &[u8], object: ObjId) -> Vec<u8> {
    let mut key = Vec::with_capacity(MIN_KEY_LEN + value.len());
    encode_into(&mut key, variant, field, value, object);
    key
}

/// Encodes an index key into `buf`, replacing its contents.
pub fn encode_into(buf: &mut Vec<u8>, variant: Variant, field: FieldId, value: &[u8], object: ObjId) {
    buf.clear();
    buf.push(variant as u8);
    buf.extend_from_slice(field.as_bytes());
    buf.extend_from_slice(value);
    buf.extend_from_slice(object.as_bytes());
}

/// Lowest key carrying `value`, for seeking.
#[must_use]
pub fn seek_key(variant: Variant, field: FieldId, value: &[u8]) -> Vec<u8> {
    encode(variant, field, value, ObjId::NIL)
}

/// A decoded index key, borrowing from the encoded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexKey<'a> {
    /// Variant byte.
    pub variant: u8,
    /// Indexed field.
    pub field: FieldId,
    /// Encoded value.
    pub value: &'a [u8],
    /// Object holding the value.
    pub object: ObjId,
}

impl<'a> IndexKey<'a> {
    /// Splits an encoded key.
    #[must_use]
    pub fn parse(key: &'a [u8]) -> Option<Self> {
        if key.len() < MIN_KEY_LEN {
            return None;
        }
        let id_at = key.len() - ID_LEN;
        Some(Self {
            variant: key[0],
            field: ObjId::read_at(key, 1)?,
            value: &key[HEAD_LEN..id_at],
            object: ObjId::read_at(key, id_at)?,
        })
    }

    /// Returns true if the key belongs to `variant` entries of `field`.
    #[must_use]
    pub fn is(&self, variant: Variant, field: FieldId) -> bool {
        self.variant == variant as u8 && self.field == field
    }
}

/// Comparator of the search table.
///
/// Orders by variant, field, value, then object id. Scalar values compare
/// by type tag and then numerically; text compares bytewise.
pub fn search_key_compare(a: &[u8], b: &[u8]) -> Ordering {
    let (Some(ka), Some(kb)) = (IndexKey::parse(a), IndexKey::parse(b)) else {
        return a.cmp(b);
    };
    a[..HEAD_LEN]
        .cmp(&b[..HEAD_LEN])
        .then_with(|| {
            if ka.variant == Variant::Scalar as u8 {
                compare_scalar(ka.value, kb.value)
            } else {
                ka.value.cmp(kb.value)
            }
        })
        .then_with(|| ka.object.cmp(&kb.object))
}

/// Compares two `tag ‖ payload` values by their typed meaning.
///
/// An empty value sorts first. Differently tagged values order by tag.
/// Malformed payloads fall back to byte order.
#[must_use]
pub fn compare_scalar(a: &[u8], b: &[u8]) -> Ordering {
    let (Some((&ta, pa)), Some((&tb, pb))) = (a.split_first(), b.split_first()) else {
        return a.len().cmp(&b.len());
    };
    if ta != tb {
        return ta.cmp(&tb);
    }
    let typed = match DataType::from_tag(ta) {
        Some(DataType::Integer | DataType::DateTime) => fixed::<8>(pa)
            .zip(fixed::<8>(pb))
            .map(|(x, y)| i64::from_le_bytes(x).cmp(&i64::from_le_bytes(y))),
        Some(DataType::Decimal) => fixed::<8>(pa)
            .zip(fixed::<8>(pb))
            .map(|(x, y)| f64::from_le_bytes(x).total_cmp(&f64::from_le_bytes(y))),
        Some(DataType::Enum) => fixed::<4>(pa)
            .zip(fixed::<4>(pb))
            .map(|(x, y)| u32::from_le_bytes(x).cmp(&u32::from_le_bytes(y))),
        _ => None,
    };
    typed.unwrap_or_else(|| pa.cmp(pb))
}

fn fixed<const N: usize>(payload: &[u8]) -> Option<[u8; N]> {
    payload.try_into().ok()
}
