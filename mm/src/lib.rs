//! Physical memory management for the simulator.
//!
//! Provides the backing arena standing in for RAM and the frame allocator
//! handing out page runs from it.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod phys;

pub use phys::{PhysMemError, PhysMemManager};
