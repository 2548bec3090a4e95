//! Virtual address index extraction for the 16 KiB granule.
//!
//! Address breakdown of a normalized 48-bit virtual address:
//! `[47] L0 | [46:36] L1 | [35:25] L2 | [24:14] L3 | [13:0] page offset`.

use super::constants::{L0_BITS, L1_BITS, L2_BITS, L3_BITS, PAGE_BITS};

/// Extract the L0 index from a virtual address (bit 47).
#[inline]
#[must_use]
pub fn va_l0_index(va: u64) -> usize {
    ((va >> (L1_BITS + L2_BITS + L3_BITS + PAGE_BITS)) & ((1 << L0_BITS) - 1)) as usize
}

/// Extract the L1 index from a virtual address (bits [46:36]).
#[inline]
#[must_use]
pub fn va_l1_index(va: u64) -> usize {
    ((va >> (L2_BITS + L3_BITS + PAGE_BITS)) & ((1 << L1_BITS) - 1)) as usize
}

/// Extract the L2 index from a virtual address (bits [35:25]).
#[inline]
#[must_use]
pub fn va_l2_index(va: u64) -> usize {
    ((va >> (L3_BITS + PAGE_BITS)) & ((1 << L2_BITS) - 1)) as usize
}

/// Extract the L3 index from a virtual address (bits [24:14]).
#[inline]
#[must_use]
pub fn va_l3_index(va: u64) -> usize {
    ((va >> PAGE_BITS) & ((1 << L3_BITS) - 1)) as usize
}

/// Indices at all four levels, high to low.
#[inline]
#[must_use]
pub fn va_indices(va: u64) -> [usize; 4] {
    [
        va_l0_index(va),
        va_l1_index(va),
        va_l2_index(va),
        va_l3_index(va),
    ]
}
