//! Fixed-size in-memory sector pool with O(1) allocate/free.
//!
//! The pool owns only sector *bytes*. Ownership, chain links, and record
//! kind live in the side table (`crate::chain::ChainTable`), kept parallel
//! to this pool by sector id — see the module docs on `chain` for why.

use crate::ids::SectorId;
use crate::record::SectorBytes;
use evo_common::consts::SECTOR_SIZE;
use parking_lot::Mutex;

struct Inner {
    sectors: Vec<SectorBytes>,
    /// Stack of free sector indices. `allocate` pops the top; `free`
    /// pushes back. Both are O(1).
    free_stack: Vec<u32>,
}

/// Fixed-size array of sectors plus a free-index stack.
///
/// `pool_size` is fixed at construction and never changes for the life of
/// the engine. All bookkeeping here is O(1); callers needing ordering or
/// ownership information go through `ChainTable`.
pub struct SectorPool {
    pool_size: usize,
    inner: Mutex<Inner>,
}

impl SectorPool {
    /// Create a pool of `pool_size` sectors, all initially free.
    pub fn new(pool_size: usize) -> Self {
        let sectors = vec![[0u8; SECTOR_SIZE]; pool_size];
        // Push in descending order so popping yields ascending ids first;
        // purely cosmetic (any order is a valid free list) but makes
        // diagnostics and tests easier to reason about.
        let free_stack: Vec<u32> = (0..pool_size as u32).rev().collect();

        Self {
            pool_size,
            inner: Mutex::new(Inner {
                sectors,
                free_stack,
            }),
        }
    }

    /// Total sector count, fixed at construction.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Pop a free sector id, or `None` if the pool is full.
    ///
    /// Does not touch the chain table — callers must initialize the
    /// sector's chain entry themselves, in chain-lock order (see
    /// `crate::write`).
    pub fn allocate(&self) -> Option<SectorId> {
        let mut inner = self.inner.lock();
        inner.free_stack.pop().map(|idx| SectorId::new(idx as usize))
    }

    /// Return a sector to the free list, zeroing its bytes first.
    ///
    /// Panics on double-free: a sector id already present on the free
    /// stack indicates a bug in the caller (the chain table should have
    /// prevented this by tracking `in_use`), and pool corruption is a
    /// fail-stop condition.
    pub fn free(&self, id: SectorId) {
        assert!(!id.is_nil(), "cannot free the NIL sentinel");
        let mut inner = self.inner.lock();
        let idx = id.index();
        assert!(idx < self.pool_size, "sector id {id} out of range");
        debug_assert!(
            !inner.free_stack.contains(&(idx as u32)),
            "double free of sector {id}"
        );
        inner.sectors[idx] = [0u8; SECTOR_SIZE];
        inner.free_stack.push(idx as u32);
    }

    /// Number of sectors currently free. O(1).
    pub fn count_free(&self) -> usize {
        self.inner.lock().free_stack.len()
    }

    /// Number of sectors currently allocated. O(1).
    pub fn count_in_use(&self) -> usize {
        self.pool_size - self.count_free()
    }

    /// Occupancy as an integer percentage, `(pool_size - free) * 100 / pool_size`.
    pub fn occupancy_percent(&self) -> u8 {
        if self.pool_size == 0 {
            return 100;
        }
        ((self.count_in_use() * 100) / self.pool_size) as u8
    }

    /// Read a sector's payload bytes.
    pub fn read(&self, id: SectorId) -> SectorBytes {
        let inner = self.inner.lock();
        inner.sectors[id.index()]
    }

    /// Apply `f` to a sector's payload bytes in place, under the pool lock.
    pub fn with_mut<R>(&self, id: SectorId, f: impl FnOnce(&mut SectorBytes) -> R) -> R {
        let mut inner = self.inner.lock();
        f(&mut inner.sectors[id.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_round_trip() {
        let pool = SectorPool::new(4);
        assert_eq!(pool.count_free(), 4);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!(pool.count_free(), 2);
        assert_ne!(a, b);

        pool.free(a);
        assert_eq!(pool.count_free(), 3);
        pool.free(b);
        assert_eq!(pool.count_free(), 4);
    }

    #[test]
    fn exhausts_cleanly() {
        let pool = SectorPool::new(2);
        assert!(pool.allocate().is_some());
        assert!(pool.allocate().is_some());
        assert!(pool.allocate().is_none());
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let pool = SectorPool::new(2);
        let a = pool.allocate().unwrap();
        pool.free(a);
        pool.free(a);
    }

    #[test]
    fn free_zeroes_bytes() {
        let pool = SectorPool::new(1);
        let a = pool.allocate().unwrap();
        pool.with_mut(a, |buf| buf[0] = 0xAB);
        pool.free(a);
        let b = pool.allocate().unwrap();
        assert_eq!(b, a);
        assert_eq!(pool.read(b)[0], 0);
    }

    #[test]
    fn occupancy_percent_rounds_down() {
        let pool = SectorPool::new(4);
        pool.allocate();
        pool.allocate();
        assert_eq!(pool.occupancy_percent(), 50);
    }
}
