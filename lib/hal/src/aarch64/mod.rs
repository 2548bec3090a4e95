//! AArch64 reference architecture (16 KiB granule).

pub mod mmu;
