//! Capability traits connecting the MMU core to architecture code and to the
//! host OS model.
//!
//! The MMU and TLB are architecture-agnostic; everything an architecture
//! contributes goes through [`MmuArch`] (the hardware walker) and
//! [`MmuDriver`] (the OS-side table management). The driver in turn obtains
//! raw table storage through [`KernelAllocator`], so it never owns the
//! backing memory itself.

use alloc::sync::Arc;

use crate::mem::access::PhysPage;
use crate::mmu::MmuError;

/// Host-kernel memory interface consumed by page-table drivers.
///
/// Implementations hand out zeroable regions meeting the requested alignment
/// and take them back on release. Allocation refusal is fatal to the caller.
pub trait KernelAllocator {
    /// Allocate `size` bytes aligned to `alignment`, returning the address.
    fn allocate_memory(&self, size: usize, alignment: usize) -> Result<usize, MmuError>;

    /// Return a region previously obtained from [`Self::allocate_memory`].
    fn release_memory(&self, addr: usize, size: usize);
}

/// Hardware side of an architecture: address-space parameters and the page
/// table walker.
pub trait MmuArch {
    /// Number of page-offset bits (log2 of the page size).
    fn page_bits(&self) -> u8;

    /// Page size in bytes.
    fn page_size(&self) -> u64;

    /// Width of the virtual address space in bits; higher address bits are
    /// stripped before translation.
    fn address_space_bits(&self) -> u8;

    /// Translate a virtual page *number* to a physical page number by
    /// walking the tables rooted at `root`.
    ///
    /// Page numbers are addresses with the page offset shifted away, which
    /// keeps the TLB oblivious to the page size. On a successful walk the
    /// leaf's referenced bit is set, and its dirty bit too when `is_write`.
    ///
    /// Returns [`MmuError::NotMapped`] when the walk reaches an invalid
    /// entry (a translation fault, handled by the page-fault path); any
    /// other error is a structural problem and aborts the simulation.
    fn perform_translation(
        &self,
        root: usize,
        v_page: u64,
        is_write: bool,
    ) -> Result<u64, MmuError>;
}

/// OS-driver side of an architecture: per-process page-table ownership.
pub trait MmuDriver {
    /// Hand the driver the host-kernel allocator used for table storage.
    fn set_host_kernel(&mut self, kernel: Arc<dyn KernelAllocator>);

    /// Page size of the architecture this driver manages tables for.
    fn page_size(&self) -> u64;

    /// Allocate and zero a root table for `pid`.
    ///
    /// Fails with [`MmuError::PidInUse`] if the PID already has one.
    fn allocate_page_table(&mut self, pid: u64) -> Result<(), MmuError>;

    /// Tear down the entire table hierarchy of `pid`, returning every byte
    /// to the host kernel.
    fn release_page_table(&mut self, pid: u64) -> Result<(), MmuError>;

    /// Root table address for `pid`, if one has been allocated.
    fn page_table(&self, pid: u64) -> Option<usize>;

    /// Install a leaf mapping from `v_addr`'s page to the frame in `p_page`,
    /// creating intermediate tables on demand. On success `p_page` carries a
    /// back-reference the driver can later resolve in
    /// [`Self::set_page_valid`].
    fn set_mapping(&mut self, pid: u64, v_addr: u64, p_page: &mut PhysPage)
        -> Result<(), MmuError>;

    /// Toggle the valid bit of the leaf entry backing `p_page`.
    ///
    /// Only an entry previously installed through [`Self::set_mapping`] may
    /// be toggled; this models the OS re-validating a mapping it invalidated
    /// earlier, never creating one.
    fn set_page_valid(&mut self, p_page: &PhysPage, setting: bool) -> Result<(), MmuError>;

    /// Bytes currently allocated for page tables across all PIDs.
    fn bytes_allocated(&self) -> u64;
}
