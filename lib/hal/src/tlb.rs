//! Translation lookaside buffer.
//!
//! A bounded cache of `(v_page, asid) -> p_page` translations with strict
//! LRU replacement. The TLB is owned by its MMU; the active ASID is MMU
//! state and is passed into every operation rather than stored here.
//!
//! Invariants:
//! - at most `capacity` slots are valid at any time
//! - no two valid slots share the same `(v_page, asid)` pair
//! - the LRU order contains every valid slot exactly once

use alloc::vec;
use alloc::vec::Vec;

/// TLB statistics counters.
///
/// Monotonically non-decreasing except through [`Tlb::clear_stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TlbStats {
    /// Number of lookups performed.
    pub lookups: u64,
    /// Number of lookups that hit.
    pub hits: u64,
    /// Lines evicted to make room for an insert.
    pub evictions: u64,
    /// Number of flush operations (full or per-ASID).
    pub flushes: u64,
    /// Lines invalidated by flush operations.
    pub flush_evictions: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct TlbSlot {
    v_page: u64,
    p_page: u64,
    asid: u64,
    valid: bool,
}

/// Bounded translation cache with LRU replacement.
pub struct Tlb {
    slots: Vec<TlbSlot>,
    /// Slot indices ordered most- to least-recently used; valid slots only.
    lru: Vec<usize>,
    stats: TlbStats,
}

impl Tlb {
    /// Create a TLB with `entries` slots.
    ///
    /// A zero-entry TLB is legal and caches nothing: every lookup misses
    /// and inserts are dropped.
    #[must_use]
    pub fn new(entries: usize) -> Self {
        Self {
            slots: vec![TlbSlot::default(); entries],
            lru: Vec::with_capacity(entries),
            stats: TlbStats::default(),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of currently valid slots.
    #[must_use]
    pub fn valid_entries(&self) -> usize {
        self.slots.iter().filter(|s| s.valid).count()
    }

    /// Look up the physical page cached for `(v_page, asid)`.
    ///
    /// A hit promotes the slot to most-recently-used. A miss changes
    /// nothing besides the lookup counter; no eviction happens here.
    pub fn lookup(&mut self, v_page: u64, asid: u64) -> Option<u64> {
        self.stats.lookups += 1;

        let index = self
            .slots
            .iter()
            .position(|s| s.valid && s.v_page == v_page && s.asid == asid)?;

        self.stats.hits += 1;
        let p_page = self.slots[index].p_page;
        self.promote(index);
        Some(p_page)
    }

    /// Cache a translation for `(v_page, asid)`.
    ///
    /// An already-cached pair is replaced in place. Otherwise a free slot is
    /// used, or the least-recently-used slot is evicted.
    pub fn insert(&mut self, v_page: u64, p_page: u64, asid: u64) {
        if self.slots.is_empty() {
            return;
        }

        let index = if let Some(i) = self
            .slots
            .iter()
            .position(|s| s.valid && s.v_page == v_page && s.asid == asid)
        {
            i
        } else if let Some(i) = self.slots.iter().position(|s| !s.valid) {
            i
        } else {
            // All slots valid: the LRU order is full, its tail is the victim.
            let victim = self.lru.pop().expect("full TLB with empty LRU order");
            self.stats.evictions += 1;
            victim
        };

        self.slots[index] = TlbSlot {
            v_page,
            p_page,
            asid,
            valid: true,
        };
        self.promote(index);
    }

    /// Invalidate every slot, modeling a context switch without ASID tags.
    ///
    /// Counts one flush plus one flush-eviction per previously valid slot.
    /// Flushing an already-empty TLB only bumps the flush counter.
    pub fn flush(&mut self) {
        self.stats.flushes += 1;
        self.stats.flush_evictions += self.valid_entries() as u64;

        for slot in &mut self.slots {
            slot.valid = false;
        }
        self.lru.clear();
    }

    /// Invalidate only the slots tagged with `asid`; other address spaces
    /// stay cached.
    pub fn flush_asid(&mut self, asid: u64) {
        self.stats.flushes += 1;

        let mut purged = 0u64;
        for slot in &mut self.slots {
            if slot.valid && slot.asid == asid {
                slot.valid = false;
                purged += 1;
            }
        }
        self.stats.flush_evictions += purged;

        let slots = &self.slots;
        self.lru.retain(|&i| slots[i].valid);
    }

    /// Reset all counters. Cached entries are untouched.
    pub fn clear_stats(&mut self) {
        self.stats = TlbStats::default();
    }

    /// Snapshot of the statistics counters.
    #[must_use]
    pub fn stats(&self) -> TlbStats {
        self.stats
    }

    /// Move `index` to the most-recently-used position.
    ///
    /// Removes any stale occurrence first so each valid slot appears in the
    /// order exactly once.
    fn promote(&mut self, index: usize) {
        self.lru.retain(|&i| i != index);
        self.lru.insert(0, index);
    }
}
