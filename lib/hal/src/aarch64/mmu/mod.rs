//! AArch64 MMU simulation with a 16 KiB granule.
//!
//! Implements the four-level page table walk for 48-bit virtual addresses:
//! a 2-entry L0 table on top of 2048-entry L1/L2/L3 tables
//! (1 + 11 + 11 + 11 + 14 = 48 bits). Block entries at intermediate levels
//! are not supported; every leaf lives at L3.
//!
//! # Module Structure
//!
//! - `constants`: granule parameters, level widths, table alignment
//! - `types`: the 64-bit table entry format
//! - `ops`: virtual address index extraction
//! - `walk`: the hardware walker ([`AArch64Mmu`])
//! - `driver`: the OS-side table driver ([`AArch64MmuDriver`])

pub mod constants;
pub mod driver;
pub mod ops;
pub mod types;
pub mod walk;


pub use constants::*;
pub use driver::AArch64MmuDriver;
pub use types::TableEntry;
pub use walk::AArch64Mmu;
