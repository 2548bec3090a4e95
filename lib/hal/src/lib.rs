//! Hardware-abstraction layer of the virtual-memory simulator.
//!
//! The crate is split into an architecture-agnostic core and per-architecture
//! modules, so a new architecture only has to supply a parameter block, a
//! walker and a driver:
//!
//! - `traits`: the capability seams ([`traits::MmuArch`],
//!   [`traits::MmuDriver`], [`traits::KernelAllocator`])
//! - `mem`: memory-access records and small alignment helpers
//! - `tlb`: bounded translation cache with LRU replacement and ASID tags
//! - `mmu`: the translation orchestrator driving TLB, walker and the
//!   page-fault handler
//! - `aarch64`: the AArch64 16 KiB-granule reference architecture

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod aarch64;
pub mod mem;
pub mod mmu;
pub mod tlb;
pub mod traits;

pub use mem::access::{AccessKind, MemAccess, PhysPage};
pub use mmu::{Mmu, MmuError};
pub use tlb::{Tlb, TlbStats};
