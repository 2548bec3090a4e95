//! Physical memory manager.
//!
//! Owns a fixed arena standing in for the machine's RAM and hands out
//! page-aligned frame runs from it, tracking free space in a first-fit hole
//! list. Page tables and process frames both live inside the arena, so the
//! addresses returned here can be dereferenced directly by the simulated
//! MMU hardware.
//!
//! Allocation policy is first-fit with the remainder of a split hole
//! appended at the tail of the list, so an equal-size request that follows
//! skips the remainder and lands in the next original hole. Releases
//! coalesce: after every release the hole list is sorted and adjacency-free.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::vec::Vec;
use core::ptr::NonNull;

use log::{debug, info};
use sim_error::define_sim_error;

define_sim_error! {
    /// Physical memory manager errors (class 0x02).
    pub enum PhysMemError(0x02) {
        /// Arena construction over the 2 GiB circuit breaker
        ArenaTooLarge = 0x01 => "refusing to simulate more than 2 GiB of memory",
        /// The host refused the backing allocation for the arena
        ArenaAllocFailed = 0x02 => "backing allocation for simulated memory failed",
    }
}

/// Circuit breaker: refuse arenas over 2 GiB so a mistyped configuration
/// cannot take the host down.
const MAX_ARENA_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// The backing memory region standing in for RAM.
///
/// Aligned to the page size and zero-initialized, released in one piece on
/// drop. Spec-wise this is any "aligned, contiguous, page-multiple-sized
/// region"; here it comes from the global allocator.
#[derive(Debug)]
struct Arena {
    base: NonNull<u8>,
    layout: Layout,
}

impl Arena {
    fn new(bytes: u64, align: u64) -> Result<Self, PhysMemError> {
        let layout = Layout::from_size_align(bytes as usize, align as usize)
            .map_err(|_| PhysMemError::ArenaAllocFailed)?;
        // SAFETY: layout has nonzero size (checked by the caller).
        let ptr = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(PhysMemError::ArenaAllocFailed)?;
        Ok(Self { base, layout })
    }

    fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: base/layout are exactly what alloc_zeroed returned.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// A contiguous run of free frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hole {
    start_page: u64,
    count: u64,
}

/// Frame allocator over the arena: first-fit hole list with coalescing.
#[derive(Debug)]
pub struct PhysMemManager {
    arena: Arena,
    page_size: u64,
    n_pages: u64,
    n_allocated: u64,
    max_allocated: u64,
    holes: Vec<Hole>,
}

impl PhysMemManager {
    /// Create a manager over a fresh arena of `memory_size` bytes divided
    /// into pages of `page_size` bytes.
    pub fn new(page_size: u64, memory_size: u64) -> Result<Self, PhysMemError> {
        debug_assert!(page_size.is_power_of_two(), "page size must be a power of two");
        debug_assert!(
            memory_size > 0 && memory_size % page_size == 0,
            "memory size must be a nonzero multiple of the page size"
        );

        if memory_size > MAX_ARENA_BYTES {
            return Err(PhysMemError::ArenaTooLarge);
        }

        let arena = Arena::new(memory_size, page_size)?;
        let n_pages = memory_size / page_size;

        info!(
            "BOOT: system memory @ {:#x}, page size of {} bytes, {} pages available",
            arena.base(),
            page_size,
            n_pages
        );

        Ok(Self {
            arena,
            page_size,
            n_pages,
            n_allocated: 0,
            max_allocated: 0,
            holes: alloc::vec![Hole {
                start_page: 0,
                count: n_pages,
            }],
        })
    }

    /// Allocate `count` contiguous frames, returning the address of the
    /// first one.
    ///
    /// Returns `None` when no hole is large enough; exhaustion is an
    /// ordinary outcome, not an error.
    pub fn allocate_pages(&mut self, count: u64) -> Option<usize> {
        if count == 0 || self.n_allocated + count > self.n_pages {
            return None;
        }

        // First fit.
        let index = self.holes.iter().position(|h| h.count >= count)?;
        let hole = self.holes.remove(index);
        let start_page = hole.start_page;

        // The remainder goes to the back of the list: the next request of
        // the same size moves on to the next original hole instead of
        // nibbling at this one.
        if hole.count > count {
            self.holes.push(Hole {
                start_page: start_page + count,
                count: hole.count - count,
            });
        }

        self.n_allocated += count;
        self.max_allocated = self.max_allocated.max(self.n_allocated);

        let addr = self.arena.base() + (start_page * self.page_size) as usize;
        debug!("physmem: allocated {count} page(s) @ {addr:#x}");
        Some(addr)
    }

    /// Return `count` frames starting at `addr`, which must have come from
    /// [`Self::allocate_pages`]. Adjacent holes are merged immediately.
    pub fn release_pages(&mut self, addr: usize, count: u64) {
        debug_assert!(addr >= self.arena.base(), "release outside the arena");
        let offset = (addr - self.arena.base()) as u64;
        debug_assert!(offset % self.page_size == 0, "release of unaligned address");

        let start_page = offset / self.page_size;
        debug_assert!(start_page + count <= self.n_pages, "release beyond the arena");
        debug_assert!(self.n_allocated >= count, "release of more pages than allocated");

        self.holes.push(Hole { start_page, count });
        self.merge_holes();
        self.n_allocated -= count;
        debug!("physmem: released {count} page(s) @ {addr:#x}");
    }

    /// Sort the hole list and merge adjacent runs.
    fn merge_holes(&mut self) {
        self.holes.sort_unstable_by_key(|h| h.start_page);

        let mut merged: Vec<Hole> = Vec::with_capacity(self.holes.len());
        for hole in self.holes.drain(..) {
            match merged.last_mut() {
                Some(last) if last.start_page + last.count == hole.start_page => {
                    last.count += hole.count;
                }
                _ => merged.push(hole),
            }
        }
        self.holes = merged;
    }

    /// Whether every allocated frame has been returned.
    #[must_use]
    pub fn all_released(&self) -> bool {
        self.n_allocated == 0
    }

    /// High-water mark of simultaneously allocated frames.
    #[must_use]
    pub fn max_allocated_pages(&self) -> u64 {
        self.max_allocated
    }

    /// Frames currently allocated.
    #[must_use]
    pub fn allocated_pages(&self) -> u64 {
        self.n_allocated
    }

    /// Total frames in the arena.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.n_pages
    }

    /// Frame size in bytes.
    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u64 = 16384;

    /// xorshift64* with a fixed seed, for reproducible stress sequences.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            self.0 = x;
            x.wrapping_mul(0x2545_F491_4F6C_DD1D)
        }
    }

    /// Holes must never overlap, and their total plus the allocation count
    /// must cover the arena exactly. With `coalesced`, adjacency is also
    /// ruled out (holds after any release).
    fn check_hole_invariants(m: &PhysMemManager, coalesced: bool) {
        let mut holes = m.holes.clone();
        holes.sort_unstable_by_key(|h| h.start_page);

        let mut free = 0;
        for pair in holes.windows(2) {
            assert!(
                pair[0].start_page + pair[0].count <= pair[1].start_page,
                "holes overlap: {pair:?}"
            );
            if coalesced {
                assert!(
                    pair[0].start_page + pair[0].count < pair[1].start_page,
                    "adjacent holes not merged: {pair:?}"
                );
            }
        }
        for hole in &holes {
            assert!(hole.count > 0, "empty hole in list");
            assert!(hole.start_page + hole.count <= m.n_pages);
            free += hole.count;
        }
        assert_eq!(free + m.n_allocated, m.n_pages, "pages leaked or duplicated");
    }

    #[test]
    fn basic_allocation() {
        let mut m = PhysMemManager::new(PAGE, 16 * PAGE).unwrap();

        let addr = m.allocate_pages(1).unwrap();
        assert!(addr >= m.arena.base());
        assert!(addr < m.arena.base() + (16 * PAGE) as usize);
        assert_eq!(addr % PAGE as usize, 0);

        m.release_pages(addr, 1);
        assert!(m.all_released());
        check_hole_invariants(&m, true);
    }

    #[test]
    fn addresses_are_unique_and_aligned() {
        let mut m = PhysMemManager::new(PAGE, 32 * PAGE).unwrap();

        let addrs: Vec<usize> = (0..10).map(|_| m.allocate_pages(1).unwrap()).collect();

        for (i, &a) in addrs.iter().enumerate() {
            assert_eq!(a % PAGE as usize, 0);
            for &b in &addrs[i + 1..] {
                assert_ne!(a, b);
            }
        }

        for &a in &addrs {
            m.release_pages(a, 1);
        }
        assert!(m.all_released());
    }

    #[test]
    fn multi_page_runs_do_not_overlap() {
        let mut m = PhysMemManager::new(PAGE, 64 * PAGE).unwrap();

        let a = m.allocate_pages(5).unwrap();
        let b = m.allocate_pages(10).unwrap();
        let c = m.allocate_pages(3).unwrap();

        let end = |addr: usize, pages: u64| addr + (pages * PAGE) as usize;
        assert!(end(a, 5) <= b || end(b, 10) <= a);
        assert!(end(a, 5) <= c || end(c, 3) <= a);
        assert!(end(b, 10) <= c || end(c, 3) <= b);

        m.release_pages(a, 5);
        m.release_pages(b, 10);
        m.release_pages(c, 3);
        assert!(m.all_released());
        check_hole_invariants(&m, true);
    }

    #[test]
    fn out_of_memory_is_soft() {
        let mut m = PhysMemManager::new(PAGE, 10 * PAGE).unwrap();

        assert!(m.allocate_pages(11).is_none());

        let addr = m.allocate_pages(10).unwrap();
        assert!(m.allocate_pages(1).is_none());

        m.release_pages(addr, 10);
        let addr = m.allocate_pages(1).unwrap();
        m.release_pages(addr, 1);
        assert!(m.all_released());
    }

    #[test]
    fn zero_page_request_is_refused() {
        let mut m = PhysMemManager::new(PAGE, 4 * PAGE).unwrap();
        assert!(m.allocate_pages(0).is_none());
    }

    #[test]
    fn hole_merging_rebuilds_large_runs() {
        let mut m = PhysMemManager::new(PAGE, 20 * PAGE).unwrap();

        let a = m.allocate_pages(5).unwrap();
        let b = m.allocate_pages(5).unwrap();
        let c = m.allocate_pages(5).unwrap();

        // Free the outer blocks: holes [0..5), [10..15), [15..20).
        m.release_pages(a, 5);
        m.release_pages(c, 5);
        check_hole_invariants(&m, true);

        // [10..20) has merged, so 9 contiguous pages fit but 10 need more.
        let nine = m.allocate_pages(9).unwrap();
        m.release_pages(nine, 9);

        // Freeing the middle block merges everything into [0..20).
        m.release_pages(b, 5);
        let fifteen = m.allocate_pages(15).unwrap();
        m.release_pages(fifteen, 15);
        assert!(m.all_released());
        check_hole_invariants(&m, true);
    }

    #[test]
    fn first_fit_skips_the_split_remainder() {
        let mut m = PhysMemManager::new(PAGE, 30 * PAGE).unwrap();

        // Fill the arena with six 5-page blocks.
        let blocks: Vec<usize> = (0..6).map(|_| m.allocate_pages(5).unwrap()).collect();

        // Free every other block: holes at blocks 0, 2 and 4.
        m.release_pages(blocks[0], 5);
        m.release_pages(blocks[2], 5);
        m.release_pages(blocks[4], 5);

        // First fit lands in the first hole.
        let first = m.allocate_pages(3).unwrap();
        assert_eq!(first, blocks[0]);

        // The 2-page remainder of that hole went to the tail of the list,
        // so the next request is served from the second hole instead.
        let second = m.allocate_pages(2).unwrap();
        assert_eq!(second, blocks[2]);
        check_hole_invariants(&m, false);

        m.release_pages(blocks[1], 5);
        m.release_pages(blocks[3], 5);
        m.release_pages(blocks[5], 5);
        m.release_pages(first, 3);
        m.release_pages(second, 2);
        assert!(m.all_released());
        check_hole_invariants(&m, true);
    }

    #[test]
    fn max_allocated_tracks_high_water() {
        let mut m = PhysMemManager::new(PAGE, 100 * PAGE).unwrap();
        assert_eq!(m.max_allocated_pages(), 0);

        let a = m.allocate_pages(10).unwrap();
        assert_eq!(m.max_allocated_pages(), 10);

        let _b = m.allocate_pages(20).unwrap();
        assert_eq!(m.max_allocated_pages(), 30);

        m.release_pages(a, 10);
        assert_eq!(m.max_allocated_pages(), 30);

        let _c = m.allocate_pages(25).unwrap();
        assert_eq!(m.max_allocated_pages(), 45);
    }

    #[test]
    fn oversized_arena_is_rejected() {
        let err = PhysMemManager::new(PAGE, 3 * 1024 * 1024 * 1024).unwrap_err();
        assert_eq!(err, PhysMemError::ArenaTooLarge);
    }

    #[test]
    fn fragmentation_stress() {
        let mut m = PhysMemManager::new(PAGE, 1024 * PAGE).unwrap();
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        let mut live: Vec<(usize, u64)> = Vec::new();

        for _ in 0..1000 {
            if live.is_empty() || rng.next() % 2 == 0 {
                let count = rng.next() % 10 + 1;
                if let Some(addr) = m.allocate_pages(count) {
                    live.push((addr, count));
                }
            } else {
                let index = (rng.next() % live.len() as u64) as usize;
                let (addr, count) = live.swap_remove(index);
                m.release_pages(addr, count);
                check_hole_invariants(&m, true);
            }
        }

        for (addr, count) in live.drain(..) {
            m.release_pages(addr, count);
        }
        assert!(m.all_released());
        check_hole_invariants(&m, true);

        // The whole arena is one hole again.
        let everything = m.allocate_pages(1024).unwrap();
        m.release_pages(everything, 1024);
    }

    #[test]
    fn arena_is_zeroed_and_writable() {
        let mut m = PhysMemManager::new(PAGE, 4 * PAGE).unwrap();
        let addr = m.allocate_pages(1).unwrap();

        // SAFETY: addr points at a page-sized region inside the arena that
        // this test exclusively owns.
        unsafe {
            let page = core::slice::from_raw_parts_mut(addr as *mut u8, PAGE as usize);
            assert!(page.iter().all(|&b| b == 0));
            page[0] = 0xAA;
            page[PAGE as usize - 1] = 0x55;
        }

        m.release_pages(addr, 1);
    }
}
