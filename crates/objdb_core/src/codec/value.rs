//! Tagged scalar payloads.
//!
//! A stored field value is `tag ‖ payload`. The storage layer never looks
//! past the tag; interpretation of the payload is decided by the model's
//! data type for the field.

use super::id::{ObjId, ID_LEN};
use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Data type of a field, doubling as the stored type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataType {
    /// Signed 64-bit integer, little endian.
    Integer = 1,
    /// IEEE-754 double, little endian.
    Decimal = 2,
    /// UTF-16LE text.
    String = 3,
    /// Milliseconds since the Unix epoch (UTC), little endian.
    DateTime = 4,
    /// One byte, 0 or 1.
    Boolean = 5,
    /// 128-bit object id.
    Id = 6,
    /// Enum ordinal, `u32` little endian.
    Enum = 7,
    /// Association field. Never stored as a field value.
    Association = 8,
}

impl DataType {
    /// Converts a tag byte to a data type.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Integer),
            2 => Some(Self::Decimal),
            3 => Some(Self::String),
            4 => Some(Self::DateTime),
            5 => Some(Self::Boolean),
            6 => Some(Self::Id),
            7 => Some(Self::Enum),
            8 => Some(Self::Association),
            _ => None,
        }
    }

    /// Returns the tag byte.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Returns true for types stored as field-value records.
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        !matches!(self, Self::Association)
    }

    /// Fixed payload width, or `None` for variable-length types.
    #[must_use]
    pub const fn payload_len(self) -> Option<usize> {
        match self {
            Self::Integer | Self::Decimal | Self::DateTime => Some(8),
            Self::Boolean => Some(1),
            Self::Id => Some(ID_LEN),
            Self::Enum => Some(4),
            Self::String | Self::Association => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::DateTime => "datetime",
            Self::Boolean => "boolean",
            Self::Id => "id",
            Self::Enum => "enum",
            Self::Association => "association",
        };
        f.write_str(name)
    }
}

/// A decoded scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integer.
    Integer(i64),
    /// Decimal.
    Decimal(f64),
    /// Text.
    String(String),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    /// Boolean.
    Boolean(bool),
    /// Object reference.
    Id(ObjId),
    /// Enum ordinal.
    Enum(u32),
}

impl Value {
    /// Returns the value's data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Integer(_) => DataType::Integer,
            Self::Decimal(_) => DataType::Decimal,
            Self::String(_) => DataType::String,
            Self::DateTime(_) => DataType::DateTime,
            Self::Boolean(_) => DataType::Boolean,
            Self::Id(_) => DataType::Id,
            Self::Enum(_) => DataType::Enum,
        }
    }

    /// Encodes as `tag ‖ payload`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.data_type().tag()];
        match self {
            Self::Integer(v) | Self::DateTime(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Decimal(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::String(s) => {
                for unit in s.encode_utf16() {
                    buf.extend_from_slice(&unit.to_le_bytes());
                }
            }
            Self::Boolean(b) => buf.push(u8::from(*b)),
            Self::Id(id) => buf.extend_from_slice(id.as_bytes()),
            Self::Enum(v) => buf.extend_from_slice(&v.to_le_bytes()),
        }
        buf
    }

    /// Decodes `tag ‖ payload`. An empty slice is an unset field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] for unknown tags, bad payload
    /// lengths and malformed text.
    pub fn decode(bytes: &[u8]) -> CoreResult<Option<Self>> {
        let Some((&tag, payload)) = bytes.split_first() else {
            return Ok(None);
        };
        let data_type = DataType::from_tag(tag)
            .ok_or_else(|| CoreError::corrupted(format!("unknown value tag {tag}")))?;
        if let Some(len) = data_type.payload_len() {
            if payload.len() != len {
                return Err(CoreError::corrupted(format!(
                    "{data_type} payload has {} bytes, expected {len}",
                    payload.len()
                )));
            }
        }

        let value = match data_type {
            DataType::Integer => Self::Integer(i64::from_le_bytes(fixed(payload)?)),
            DataType::Decimal => Self::Decimal(f64::from_le_bytes(fixed(payload)?)),
            DataType::DateTime => Self::DateTime(i64::from_le_bytes(fixed(payload)?)),
            DataType::Boolean => Self::Boolean(payload[0] != 0),
            DataType::Id => Self::Id(ObjId::from_bytes(fixed(payload)?)),
            DataType::Enum => Self::Enum(u32::from_le_bytes(fixed(payload)?)),
            DataType::String => Self::String(decode_utf16(payload)?),
            DataType::Association => {
                return Err(CoreError::corrupted("association tag in a field value"))
            }
        };
        Ok(Some(value))
    }

    /// Returns the text of a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<ObjId> for Value {
    fn from(v: ObjId) -> Self {
        Self::Id(v)
    }
}

/// Decodes a UTF-16LE payload.
///
/// # Errors
///
/// Returns [`CoreError::Corrupted`] for odd lengths or unpaired surrogates.
pub fn decode_utf16(payload: &[u8]) -> CoreResult<String> {
    if payload.len() % 2 != 0 {
        return Err(CoreError::corrupted("odd-length UTF-16 payload"));
    }
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| CoreError::corrupted("invalid UTF-16 payload"))
}

fn fixed<const N: usize>(payload: &[u8]) -> CoreResult<[u8; N]> {
    payload
        .try_into()
        .map_err(|_| CoreError::corrupted(format!("expected {N} payload bytes")))
}
