//! Object identifier.

use std::fmt;
use uuid::Uuid;

/// Width of every identifier in bytes.
pub const ID_LEN: usize = 16;

/// 128-bit identifier of an object.
///
/// Types and fields are objects too, so the same identifier names
/// instances, types (`TypeId`) and fields (`FieldId`). The all-zero id
/// ([`ObjId::NIL`]) means "no object".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjId([u8; ID_LEN]);

/// Identifier of a type definition.
pub type TypeId = ObjId;

/// Identifier of a field or association definition.
pub type FieldId = ObjId;

impl ObjId {
    /// The empty id.
    pub const NIL: Self = Self([0; ID_LEN]);

    /// Creates an id from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates an id from a big-endian integer. Handy for well-known ids.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_be_bytes())
    }

    /// Creates a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Returns the id as a big-endian integer.
    #[must_use]
    pub const fn as_u128(&self) -> u128 {
        u128::from_be_bytes(self.0)
    }

    /// Returns true for [`ObjId::NIL`].
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0 == [0; ID_LEN]
    }

    /// Converts to a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }

    /// Creates an id from a slice.
    ///
    /// Returns `None` if the slice is not exactly 16 bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; ID_LEN]>::try_from(slice).ok().map(Self)
    }

    /// Reads the id starting at `offset`, or `None` if out of bounds.
    #[must_use]
    pub fn read_at(bytes: &[u8], offset: usize) -> Option<Self> {
        bytes
            .get(offset..offset + ID_LEN)
            .and_then(Self::from_slice)
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({})", self.to_uuid())
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

impl From<Uuid> for ObjId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.into_bytes())
    }
}

impl From<ObjId> for Uuid {
    fn from(id: ObjId) -> Self {
        id.to_uuid()
    }
}

impl From<[u8; ID_LEN]> for ObjId {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self::from_bytes(bytes)
    }
}
