//! Bump arena over lazily committed pages.
//!
//! The arena reserves its full capacity once, then commits memory in
//! page-sized steps as allocations advance. Everything is released in bulk
//! by [`Arena::reset`]. Allocations are addressed by [`ArenaRef`] offsets,
//! never by pointers, so the backing buffer may move freely.
//!
//! Platform memory management is hidden behind [`PageProvider`]; the arena
//! itself is platform-agnostic.

use crate::error::{CoreError, CoreResult};

/// Virtual memory capability used by [`Arena`].
///
/// A provider manages one contiguous region: `reserve` sets its size up
/// front, `commit` makes a prefix usable, `decommit` returns memory past a
/// prefix, and `release` gives the whole region back.
pub trait PageProvider {
    /// Reserves `capacity` bytes of address space.
    ///
    /// # Errors
    ///
    /// Returns an error if the address space cannot be reserved.
    fn reserve(&mut self, capacity: usize) -> CoreResult<()>;

    /// Makes the first `len` bytes of the region readable and writable.
    ///
    /// Newly committed bytes are zeroed. `len` never exceeds the reserved
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory cannot be committed.
    fn commit(&mut self, len: usize) -> CoreResult<()>;

    /// Returns committed memory past the first `keep` bytes.
    fn decommit(&mut self, keep: usize);

    /// Releases the whole region.
    fn release(&mut self);

    /// Returns the committed bytes.
    fn committed(&self) -> &[u8];

    /// Returns the committed bytes mutably.
    fn committed_mut(&mut self) -> &mut [u8];
}

/// Portable [`PageProvider`] backed by a heap buffer.
///
/// `reserve` only records the limit. Heap memory is requested in `commit`,
/// one committed prefix at a time, so an idle arena costs nothing.
#[derive(Debug, Default)]
pub struct HeapPages {
    buf: Vec<u8>,
    limit: usize,
}

impl HeapPages {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageProvider for HeapPages {
    fn reserve(&mut self, capacity: usize) -> CoreResult<()> {
        self.buf = Vec::new();
        self.limit = capacity;
        Ok(())
    }

    fn commit(&mut self, len: usize) -> CoreResult<()> {
        if len <= self.buf.len() {
            return Ok(());
        }
        let used = self.buf.len();
        let capacity = self.limit;
        let exhausted = || CoreError::ArenaExhausted {
            requested: len,
            used,
            capacity,
        };
        if len > self.limit {
            return Err(exhausted());
        }
        self.buf
            .try_reserve_exact(len - self.buf.len())
            .map_err(|_| exhausted())?;
        self.buf.resize(len, 0);
        Ok(())
    }

    fn decommit(&mut self, keep: usize) {
        self.buf.truncate(keep);
    }

    fn release(&mut self) {
        self.buf = Vec::new();
        self.limit = 0;
    }

    fn committed(&self) -> &[u8] {
        &self.buf
    }

    fn committed_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// Location of an allocation inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaRef {
    offset: u32,
    len: u32,
}

impl ArenaRef {
    /// Returns the offset from the arena base.
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Returns the allocation length.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.len
    }

    /// Returns true for zero-length allocations.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }

    /// Splits into the first `mid` bytes and the rest.
    pub(crate) fn split_at(self, mid: u32) -> (Self, Self) {
        let mid = mid.min(self.len);
        (
            Self {
                offset: self.offset,
                len: mid,
            },
            Self {
                offset: self.offset + mid,
                len: self.len - mid,
            },
        )
    }

    fn range(self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.len as usize
    }
}

/// A bump allocator over a reserved region.
///
/// Exceeding the reserved capacity is fatal: allocation fails with
/// [`CoreError::ArenaExhausted`] and the transaction using the arena must
/// be abandoned.
#[derive(Debug)]
pub struct Arena<P: PageProvider = HeapPages> {
    pages: P,
    capacity: usize,
    page_size: usize,
    used: usize,
}

impl Arena<HeapPages> {
    /// Creates a heap-backed arena.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity cannot be reserved.
    pub fn new(capacity: usize, page_size: usize) -> CoreResult<Self> {
        Self::with_provider(HeapPages::new(), capacity, page_size)
    }
}

impl<P: PageProvider> Arena<P> {
    /// Creates an arena over the given provider.
    ///
    /// Offsets are 32-bit, so the capacity is capped at `u32::MAX`.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity cannot be reserved or the page size
    /// is zero.
    pub fn with_provider(mut pages: P, capacity: usize, page_size: usize) -> CoreResult<Self> {
        if page_size == 0 {
            return Err(CoreError::invalid_argument("arena page size must be non-zero"));
        }
        let capacity = capacity.min(u32::MAX as usize);
        pages.reserve(capacity)?;
        Ok(Self {
            pages,
            capacity,
            page_size,
            used: 0,
        })
    }

    /// Returns the reserved capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of allocated bytes.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Returns the number of committed bytes.
    #[must_use]
    pub fn committed(&self) -> usize {
        self.pages.committed().len()
    }

    /// Copies `bytes` into the arena.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ArenaExhausted`] if the reservation is full.
    pub fn alloc(&mut self, bytes: &[u8]) -> CoreResult<ArenaRef> {
        let r = self.alloc_zeroed(bytes.len())?;
        self.get_mut(r).copy_from_slice(bytes);
        Ok(r)
    }

    /// Allocates `len` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ArenaExhausted`] if the reservation is full.
    pub fn alloc_zeroed(&mut self, len: usize) -> CoreResult<ArenaRef> {
        let end = self
            .used
            .checked_add(len)
            .filter(|&end| end <= self.capacity)
            .ok_or_else(|| {
                tracing::warn!(
                    requested = len,
                    used = self.used,
                    capacity = self.capacity,
                    "arena exhausted"
                );
                CoreError::ArenaExhausted {
                    requested: len,
                    used: self.used,
                    capacity: self.capacity,
                }
            })?;

        if end > self.committed() {
            let pages = end.div_ceil(self.page_size);
            let target = (pages * self.page_size).min(self.capacity);
            self.pages.commit(target)?;
        }

        let r = ArenaRef {
            offset: self.used as u32,
            len: len as u32,
        };
        // Recycled pages may hold bytes from before a reset.
        self.pages.committed_mut()[r.range()].fill(0);
        self.used = end;
        Ok(r)
    }

    /// Returns the bytes of an allocation.
    ///
    /// # Panics
    ///
    /// Panics if `r` was not produced by this arena since the last reset.
    #[must_use]
    pub fn get(&self, r: ArenaRef) -> &[u8] {
        &self.pages.committed()[r.range()]
    }

    /// Returns the bytes of an allocation mutably.
    ///
    /// # Panics
    ///
    /// Panics if `r` was not produced by this arena since the last reset.
    pub fn get_mut(&mut self, r: ArenaRef) -> &mut [u8] {
        &mut self.pages.committed_mut()[r.range()]
    }

    /// Returns every allocated byte, from the base to the bump pointer.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.pages.committed()[..self.used]
    }

    /// Returns every allocated byte mutably.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let used = self.used;
        &mut self.pages.committed_mut()[..used]
    }

    /// Frees every allocation and decommits all but the first page.
    pub fn reset(&mut self) {
        self.used = 0;
        self.pages.decommit(self.page_size.min(self.capacity));
    }
}

impl<P: PageProvider> Drop for Arena<P> {
    fn drop(&mut self) {
        self.pages.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_sequential_refs() {
        let mut arena = Arena::new(1024, 64).unwrap();
        let a = arena.alloc(b"hello").unwrap();
        let b = arena.alloc(b"world!").unwrap();

        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 5);
        assert_eq!(arena.get(a), b"hello");
        assert_eq!(arena.get(b), b"world!");
        assert_eq!(arena.used(), 11);
        assert_eq!(arena.as_bytes(), b"helloworld!");
    }

    #[test]
    fn commits_whole_pages_lazily() {
        let mut arena = Arena::new(1024, 64).unwrap();
        assert_eq!(arena.committed(), 0);

        arena.alloc(&[1; 10]).unwrap();
        assert_eq!(arena.committed(), 64);

        arena.alloc(&[2; 60]).unwrap();
        assert_eq!(arena.committed(), 128);
    }

    #[test]
    fn reserve_defers_heap_allocation() {
        let mut arena = Arena::new(1 << 40, 4096).unwrap();
        assert_eq!(arena.committed(), 0);
        assert_eq!(arena.pages.buf.capacity(), 0);

        arena.alloc(&[3; 5000]).unwrap();
        assert_eq!(arena.committed(), 8192);
        assert!(arena.pages.buf.capacity() < 1 << 20);
    }

    #[test]
    fn split_refs_cover_the_allocation() {
        let mut arena = Arena::new(64, 16).unwrap();
        let r = arena.alloc(b"keyvalue").unwrap();
        let (k, v) = r.split_at(3);
        assert_eq!(arena.get(k), b"key");
        assert_eq!(arena.get(v), b"value");
        assert_eq!(v.offset(), 3);
    }

    #[test]
    fn last_page_is_clamped_to_capacity() {
        let mut arena = Arena::new(100, 64).unwrap();
        arena.alloc(&[0; 90]).unwrap();
        assert_eq!(arena.committed(), 100);
    }

    #[test]
    fn exceeding_capacity_is_fatal() {
        let mut arena = Arena::new(16, 8).unwrap();
        arena.alloc(&[0; 12]).unwrap();

        let err = arena.alloc(&[0; 5]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ArenaExhausted {
                requested: 5,
                used: 12,
                capacity: 16
            }
        ));
        assert!(err.is_fatal());
        // The failed allocation leaves the arena untouched.
        assert_eq!(arena.used(), 12);
    }

    #[test]
    fn reset_frees_and_decommits() {
        let mut arena = Arena::new(1024, 64).unwrap();
        arena.alloc(&[7; 300]).unwrap();
        arena.reset();

        assert_eq!(arena.used(), 0);
        assert_eq!(arena.committed(), 64);

        let r = arena.alloc_zeroed(8).unwrap();
        assert_eq!(r.offset(), 0);
        assert_eq!(arena.get(r), &[0; 8]);
    }

    #[test]
    fn zero_page_size_rejected() {
        assert!(Arena::new(1024, 0).is_err());
    }
}
