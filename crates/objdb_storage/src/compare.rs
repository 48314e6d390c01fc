//! Key comparators.

use std::cmp::Ordering;

/// Total order over keys of one table.
///
/// A table and every overlay staged against it must use the same
/// comparator, otherwise merged iteration is meaningless.
pub type KeyCompare = fn(&[u8], &[u8]) -> Ordering;

/// Plain byte-wise lexicographic order.
#[must_use]
pub fn compare_lexicographic(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Lexicographic order over everything but the trailing byte.
///
/// Used for keys whose last byte is metadata: two keys that differ only in
/// that byte compare equal.
#[must_use]
pub fn compare_ignoring_last_byte(a: &[u8], b: &[u8]) -> Ordering {
    let a = a.split_last().map_or(a, |(_, rest)| rest);
    let b = b.split_last().map_or(b, |(_, rest)| rest);
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicographic_orders_prefix_first() {
        assert_eq!(compare_lexicographic(b"ab", b"abc"), Ordering::Less);
        assert_eq!(compare_lexicographic(b"b", b"abc"), Ordering::Greater);
        assert_eq!(compare_lexicographic(b"", b""), Ordering::Equal);
    }

    #[test]
    fn ignoring_last_byte_treats_metadata_as_equal() {
        assert_eq!(compare_ignoring_last_byte(b"key\x01", b"key\x00"), Ordering::Equal);
        assert_eq!(compare_ignoring_last_byte(b"kex\x09", b"key\x00"), Ordering::Less);
        assert_eq!(compare_ignoring_last_byte(b"", b"\x05"), Ordering::Equal);
    }
}
