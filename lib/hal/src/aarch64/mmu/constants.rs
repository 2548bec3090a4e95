//! Architecture parameters for AArch64 with a 16 KiB translation granule.

use static_assertions::const_assert_eq;

/// Page-offset width (16 KiB pages).
pub const PAGE_BITS: u32 = 14;
/// Page size in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_BITS;
/// Virtual address width; higher bits are stripped before translation.
pub const ADDRESS_SPACE_BITS: u32 = 48;

/// Level 0 index width: 1 bit, 2 entries.
pub const L0_BITS: u32 = 1;
/// Level 1 index width: 11 bits, 2048 entries.
pub const L1_BITS: u32 = 11;
/// Level 2 index width: 11 bits, 2048 entries.
pub const L2_BITS: u32 = 11;
/// Level 3 index width: 11 bits, 2048 entries.
pub const L3_BITS: u32 = 11;

pub const L0_ENTRIES: usize = 1 << L0_BITS;
pub const L1_ENTRIES: usize = 1 << L1_BITS;
pub const L2_ENTRIES: usize = 1 << L2_BITS;
pub const L3_ENTRIES: usize = 1 << L3_BITS;

/// Required alignment of every page table.
pub const TABLE_ALIGN: usize = PAGE_SIZE as usize;

// The level widths and the page offset must cover the address space exactly.
const_assert_eq!(
    L0_BITS + L1_BITS + L2_BITS + L3_BITS + PAGE_BITS,
    ADDRESS_SPACE_BITS
);
