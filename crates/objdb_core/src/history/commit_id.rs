//! Time-sortable commit identifiers.

use parking_lot::Mutex;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Identifier of one history record.
///
/// Laid out as a version 7 UUID: a 48-bit big-endian millisecond timestamp
/// followed by random bits, so byte order is chronological order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId([u8; 16]);

impl CommitId {
    /// Wraps raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Reads an id from a 16-byte slice.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        slice.try_into().ok().map(Self)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Milliseconds since the Unix epoch embedded in the id.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        let mut millis = [0u8; 8];
        millis[2..].copy_from_slice(&self.0[..6]);
        u64::from_be_bytes(millis)
    }

    /// Returns the id as a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.to_uuid())
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

/// Hands out strictly increasing commit ids.
///
/// If the clock stalls or steps back, the next id keeps the previous
/// timestamp and increments its 74 random bits as one counter, carrying into
/// the timestamp on overflow. Version and variant bits are never touched, so
/// ordering by id always matches commit order and every id stays a valid
/// version 7 UUID.
#[derive(Debug, Default)]
pub struct CommitIdGenerator {
    last: Mutex<u128>,
}

impl CommitIdGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator that never returns an id at or below `floor`.
    #[must_use]
    pub fn starting_after(floor: CommitId) -> Self {
        Self {
            last: Mutex::new(u128::from_be_bytes(floor.0)),
        }
    }

    /// Returns an id for the current time.
    pub fn next(&self) -> CommitId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self.next_at(millis)
    }

    /// Returns an id for the given time.
    pub fn next_at(&self, millis: u64) -> CommitId {
        let random: [u8; 10] = rand::random();
        let candidate = uuid::Builder::from_unix_timestamp_millis(millis, &random)
            .into_uuid()
            .as_u128();

        let mut last = self.last.lock();
        let id = if candidate > *last {
            candidate
        } else {
            successor(*last)
        };
        *last = id;
        CommitId(id.to_be_bytes())
    }
}

const RAND_B_BITS: u32 = 62;
const RAND_B_MASK: u128 = (1 << RAND_B_BITS) - 1;
const RAND_A_MASK: u128 = 0xFFF;
const COUNTER_LIMIT: u128 = 1 << 74;
const TIMESTAMP_SHIFT: u32 = 80;
const VERSION_7: u128 = 0x7 << 76;
const VARIANT_RFC4122: u128 = 0b10 << RAND_B_BITS;

/// Smallest version 7 id above `last`.
fn successor(last: u128) -> u128 {
    let mut millis = last >> TIMESTAMP_SHIFT;
    let rand_a = (last >> 64) & RAND_A_MASK;
    let mut counter = (rand_a << RAND_B_BITS | (last & RAND_B_MASK)) + 1;
    if counter == COUNTER_LIMIT {
        millis = (millis + 1) & ((1 << 48) - 1);
        counter = 0;
    }
    millis << TIMESTAMP_SHIFT
        | VERSION_7
        | (counter >> RAND_B_BITS) << 64
        | VARIANT_RFC4122
        | (counter & RAND_B_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_timestamp() {
        let generator = CommitIdGenerator::new();
        let id = generator.next_at(1_700_000_000_123);
        assert_eq!(id.timestamp_ms(), 1_700_000_000_123);
        assert_eq!(id.to_uuid().get_version_num(), 7);
    }

    #[test]
    fn strictly_increasing_under_clock_regression() {
        let generator = CommitIdGenerator::new();
        let a = generator.next_at(2_000);
        let b = generator.next_at(1_000);
        let c = generator.next_at(1_000);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn regressed_ids_stay_version_7() {
        let generator = CommitIdGenerator::new();
        let first = generator.next_at(2_000);
        for _ in 0..16 {
            let id = generator.next_at(1_000);
            assert_eq!(id.to_uuid().get_version_num(), 7);
            assert_eq!(id.to_uuid().get_variant(), uuid::Variant::RFC4122);
            assert_eq!(id.timestamp_ms(), 2_000);
            assert!(id > first);
        }
    }

    #[test]
    fn successor_carries_into_timestamp() {
        let full = uuid::Builder::from_unix_timestamp_millis(9_000, &[0xFF; 10])
            .into_uuid()
            .as_u128();
        let next = CommitId(successor(full).to_be_bytes());

        assert!(next.as_bytes() > &full.to_be_bytes());
        assert_eq!(next.timestamp_ms(), 9_001);
        assert_eq!(next.to_uuid().get_version_num(), 7);
        assert_eq!(next.to_uuid().get_variant(), uuid::Variant::RFC4122);
    }

    #[test]
    fn floor_is_respected() {
        let floor = CommitIdGenerator::new().next_at(5_000);
        let generator = CommitIdGenerator::starting_after(floor);
        assert!(generator.next_at(10) > floor);
    }

    #[test]
    fn slice_conversion() {
        let id = CommitIdGenerator::new().next();
        assert_eq!(CommitId::from_slice(id.as_bytes()), Some(id));
        assert_eq!(CommitId::from_slice(&[0; 3]), None);
    }
}
