//! Architecture-agnostic MMU.
//!
//! [`Mmu`] owns the TLB and the current ASID, consults an architecture
//! walker on misses, and drives the page-fault handler until a translation
//! succeeds. It never drops an access: if the handler does not make
//! progress, `process_access` keeps retrying by contract.

use alloc::boxed::Box;

use log::{info, trace};
use sim_error::define_sim_error;

use crate::mem::access::MemAccess;
use crate::tlb::{Tlb, TlbStats};
use crate::traits::MmuArch;

define_sim_error! {
    /// MMU and page-table driver errors (class 0x01).
    ///
    /// `NotMapped` is the soft translation fault the page-fault path
    /// handles; every other variant is fatal to the simulation.
    pub enum MmuError(0x01) {
        /// Translation attempted with no page table installed
        NullRoot = 0x01 => "page table pointer is NULL",
        /// Page table root not aligned to the table alignment
        MisalignedRoot = 0x02 => "page table root is misaligned",
        /// Walk reached an invalid entry (translation fault)
        NotMapped = 0x03 => "address not mapped",
        /// Valid interior entry without the table type, or the inverse
        StructureCorrupt = 0x04 => "malformed page table entry",
        /// Host kernel refused a table allocation
        AllocationFailed = 0x05 => "page table allocation failed",
        /// allocate_page_table for a PID that already has one
        PidInUse = 0x06 => "page table already allocated for this PID",
        /// Operation on a PID without a page table
        PidNotFound = 0x07 => "no page table for this PID",
        /// set_page_valid on an entry that set_mapping never installed
        NeverMapped = 0x08 => "page table entry was never installed",
        /// Driver used before set_host_kernel
        NoHostKernel = 0x09 => "host kernel interface not set",
        /// Translation fault with no page-fault handler installed
        NoFaultHandler = 0x0A => "no page fault handler installed",
        /// Page-fault handler could not obtain a backing frame
        OutOfMemory = 0x0B => "out of physical memory",
    }
}

/// Callback invoked on a translation fault with the faulting virtual
/// address. Expected to install a mapping and return; an error means the
/// fault cannot be served (no frames left, broken tables) and aborts the
/// access it was raised for.
pub type PageFaultHandler = Box<dyn FnMut(u64) -> Result<(), MmuError>>;

/// Memory management unit generic over the architecture walker.
pub struct Mmu<A: MmuArch> {
    arch: A,
    root: usize,
    current_asid: u64,
    tlb: Option<Tlb>,
    page_fault_handler: Option<PageFaultHandler>,
    log_accesses: bool,
}

impl<A: MmuArch> Mmu<A> {
    /// Create an MMU over `arch` with no TLB, no root and no fault handler.
    #[must_use]
    pub fn new(arch: A) -> Self {
        Self {
            arch,
            root: 0,
            current_asid: 0,
            tlb: None,
            page_fault_handler: None,
            log_accesses: false,
        }
    }

    /// Install the page-fault handler.
    pub fn set_page_fault_handler(&mut self, handler: PageFaultHandler) {
        self.page_fault_handler = Some(handler);
    }

    /// Point the MMU at a page-table root (address of the top-level table).
    pub fn set_page_table_pointer(&mut self, root: usize) {
        self.root = root;
    }

    /// Set the active address-space identifier used to tag TLB entries.
    pub fn set_current_asid(&mut self, asid: u64) {
        self.current_asid = asid;
    }

    /// Attach a TLB. Translations run uncached without one.
    pub fn set_tlb(&mut self, tlb: Tlb) {
        self.tlb = Some(tlb);
    }

    /// Invalidate the whole TLB, as on an untagged context switch.
    pub fn flush_tlb(&mut self) {
        if let Some(tlb) = self.tlb.as_mut() {
            tlb.flush();
        }
    }

    /// Invalidate only the TLB entries tagged with `asid`.
    pub fn flush_tlb_asid(&mut self, asid: u64) {
        if let Some(tlb) = self.tlb.as_mut() {
            tlb.flush_asid(asid);
        }
    }

    /// TLB statistics; all zeros when no TLB is attached.
    #[must_use]
    pub fn tlb_statistics(&self) -> TlbStats {
        self.tlb.as_ref().map(Tlb::stats).unwrap_or_default()
    }

    /// Emit one trace line per access and per completed translation.
    pub fn set_access_logging(&mut self, enabled: bool) {
        self.log_accesses = enabled;
    }

    /// Page size of the underlying architecture.
    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.arch.page_size()
    }

    /// Translate `access`, faulting in mappings as needed, and return the
    /// physical address.
    ///
    /// Loops on translation faults: each fault invokes the handler and the
    /// translation is retried (TLB first). A handler error aborts the
    /// access and propagates; a handler that keeps returning `Ok` without
    /// installing a mapping keeps this call looping, as the handler is
    /// part of the simulation's correctness surface.
    pub fn process_access(&mut self, access: &MemAccess) -> Result<u64, MmuError> {
        if self.root == 0 {
            return Err(MmuError::NullRoot);
        }

        if self.log_accesses {
            trace!("MMU: memory access: {access}");
        }

        let p_addr = loop {
            match self.translate(access) {
                Ok(p_addr) => break p_addr,
                Err(MmuError::NotMapped) => {
                    let handler = self
                        .page_fault_handler
                        .as_mut()
                        .ok_or(MmuError::NoFaultHandler)?;
                    handler(access.addr)?;
                }
                Err(other) => return Err(other),
            }
        };

        if self.log_accesses {
            trace!(
                "MMU: translated virtual {:#x} to physical {:#x}",
                access.addr,
                p_addr
            );
        }

        Ok(p_addr)
    }

    /// One translation attempt: TLB, then the architecture walker.
    fn translate(&mut self, access: &MemAccess) -> Result<u64, MmuError> {
        // Strip the unused sign-extension bits of the virtual address.
        let v_addr = access.addr & ((1u64 << self.arch.address_space_bits()) - 1);
        let v_page = v_addr >> self.arch.page_bits();
        let is_write = access.kind.is_write();

        if let Some(tlb) = self.tlb.as_mut() {
            if let Some(p_page) = tlb.lookup(v_page, self.current_asid) {
                return Ok(self.make_physical_addr(access, p_page));
            }
        }

        let p_page = self.arch.perform_translation(self.root, v_page, is_write)?;

        if let Some(tlb) = self.tlb.as_mut() {
            tlb.insert(v_page, p_page, self.current_asid);
        }

        Ok(self.make_physical_addr(access, p_page))
    }

    /// Compose the physical address from a physical page number and the
    /// page-offset bits of the original (un-normalized) virtual address.
    fn make_physical_addr(&self, access: &MemAccess, p_page: u64) -> u64 {
        (p_page << self.arch.page_bits()) | (access.addr & (self.arch.page_size() - 1))
    }
}

impl<A: MmuArch> Drop for Mmu<A> {
    /// Report TLB statistics to the diagnostics sink at end of life.
    fn drop(&mut self) {
        let stats = self.tlb_statistics();

        info!("TLB statistics (since last reset):");
        info!("# lookups: {}", stats.lookups);
        if stats.lookups == 0 {
            info!("# hits: {} (n/a)", stats.hits);
        } else {
            let rate = (stats.hits as f64 / stats.lookups as f64) * 100.0;
            info!("# hits: {} ({rate:.1}%)", stats.hits);
        }
        info!("# line evictions: {}", stats.evictions);
        info!("# flushes: {}", stats.flushes);
        info!("# line evictions due to flush: {}", stats.flush_evictions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::access::AccessKind;
    use alloc::collections::BTreeMap;
    use alloc::rc::Rc;
    use core::cell::RefCell;

    /// Toy architecture: 16 KiB pages, 48-bit addresses, translations served
    /// from a shared map so tests can play the page-fault handler.
    struct MapArch {
        mappings: Rc<RefCell<BTreeMap<u64, u64>>>,
    }

    impl MmuArch for MapArch {
        fn page_bits(&self) -> u8 {
            14
        }
        fn page_size(&self) -> u64 {
            1 << 14
        }
        fn address_space_bits(&self) -> u8 {
            48
        }
        fn perform_translation(
            &self,
            _root: usize,
            v_page: u64,
            _is_write: bool,
        ) -> Result<u64, MmuError> {
            self.mappings
                .borrow()
                .get(&v_page)
                .copied()
                .ok_or(MmuError::NotMapped)
        }
    }

    fn mmu_with(map: &Rc<RefCell<BTreeMap<u64, u64>>>) -> Mmu<MapArch> {
        let mut mmu = Mmu::new(MapArch {
            mappings: Rc::clone(map),
        });
        mmu.set_page_table_pointer(0x4000); // any nonzero, aligned value
        mmu
    }

    #[test]
    fn null_root_is_fatal() {
        let map = Rc::new(RefCell::new(BTreeMap::new()));
        let mut mmu = Mmu::new(MapArch {
            mappings: Rc::clone(&map),
        });
        let access = MemAccess::new(0x1234, AccessKind::Load);
        assert_eq!(mmu.process_access(&access), Err(MmuError::NullRoot));
    }

    #[test]
    fn composes_offset_from_original_address() {
        let map = Rc::new(RefCell::new(BTreeMap::new()));
        map.borrow_mut().insert(0x12345, 0xABCDE);
        let mut mmu = mmu_with(&map);

        let access = MemAccess::new((0x12345 << 14) | 0x0ABC, AccessKind::Load);
        let p_addr = mmu.process_access(&access).unwrap();
        assert_eq!(p_addr, (0xABCDE << 14) | 0x0ABC);
    }

    #[test]
    fn upper_address_bits_are_ignored() {
        let map = Rc::new(RefCell::new(BTreeMap::new()));
        map.borrow_mut().insert(0x12345, 0xABCDE);
        let mut mmu = mmu_with(&map);

        // Same page with sign-extension bits set.
        let tagged = 0xFFFF_0000_0000_0000u64 | (0x12345 << 14) | 0x10;
        let p_addr = mmu
            .process_access(&MemAccess::new(tagged, AccessKind::Load))
            .unwrap();
        assert_eq!(p_addr, (0xABCDE << 14) | 0x10);
    }

    #[test]
    fn fault_handler_retries_until_mapped() {
        let map = Rc::new(RefCell::new(BTreeMap::new()));
        let mut mmu = mmu_with(&map);

        let handler_map = Rc::clone(&map);
        let faults = Rc::new(RefCell::new(0u32));
        let fault_count = Rc::clone(&faults);
        mmu.set_page_fault_handler(Box::new(move |v_addr| {
            *fault_count.borrow_mut() += 1;
            handler_map.borrow_mut().insert(v_addr >> 14, 0x777);
            Ok(())
        }));

        let access = MemAccess::new(0x5 << 14, AccessKind::Store);
        let p_addr = mmu.process_access(&access).unwrap();
        assert_eq!(p_addr, 0x777 << 14);
        assert_eq!(*faults.borrow(), 1);
    }

    #[test]
    fn handler_failure_aborts_the_access() {
        let map = Rc::new(RefCell::new(BTreeMap::new()));
        let mut mmu = mmu_with(&map);
        mmu.set_page_fault_handler(Box::new(|_| Err(MmuError::OutOfMemory)));

        let access = MemAccess::new(0x5 << 14, AccessKind::Load);
        assert_eq!(mmu.process_access(&access), Err(MmuError::OutOfMemory));
    }

    #[test]
    fn fault_without_handler_is_fatal() {
        let map = Rc::new(RefCell::new(BTreeMap::new()));
        let mut mmu = mmu_with(&map);

        let access = MemAccess::new(0x5 << 14, AccessKind::Load);
        assert_eq!(mmu.process_access(&access), Err(MmuError::NoFaultHandler));
    }

    #[test]
    fn tlb_caches_walked_translations() {
        let map = Rc::new(RefCell::new(BTreeMap::new()));
        map.borrow_mut().insert(0x42, 0x99);
        let mut mmu = mmu_with(&map);
        mmu.set_tlb(Tlb::new(8));

        let access = MemAccess::new(0x42 << 14, AccessKind::Load);
        assert_eq!(mmu.process_access(&access).unwrap(), 0x99 << 14);

        // Second access must come from the TLB even after the walker's
        // backing map forgets the page.
        map.borrow_mut().clear();
        assert_eq!(mmu.process_access(&access).unwrap(), 0x99 << 14);

        let stats = mmu.tlb_statistics();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn asid_switch_separates_processes() {
        let map = Rc::new(RefCell::new(BTreeMap::new()));
        map.borrow_mut().insert(0x42, 0x11);
        let mut mmu = mmu_with(&map);
        mmu.set_tlb(Tlb::new(8));
        mmu.set_current_asid(1);

        let access = MemAccess::new(0x42 << 14, AccessKind::Load);
        assert_eq!(mmu.process_access(&access).unwrap(), 0x11 << 14);

        // New address space: the cached entry for ASID 1 must not be used.
        mmu.set_current_asid(2);
        map.borrow_mut().insert(0x42, 0x22);
        assert_eq!(mmu.process_access(&access).unwrap(), 0x22 << 14);

        let stats = mmu.tlb_statistics();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn structural_errors_bypass_fault_handler() {
        struct CorruptArch;
        impl MmuArch for CorruptArch {
            fn page_bits(&self) -> u8 {
                14
            }
            fn page_size(&self) -> u64 {
                1 << 14
            }
            fn address_space_bits(&self) -> u8 {
                48
            }
            fn perform_translation(&self, _: usize, _: u64, _: bool) -> Result<u64, MmuError> {
                Err(MmuError::StructureCorrupt)
            }
        }

        let mut mmu = Mmu::new(CorruptArch);
        mmu.set_page_table_pointer(0x4000);
        mmu.set_page_fault_handler(Box::new(|_| {
            panic!("handler must not run for structural errors");
        }));

        let access = MemAccess::new(0x1000, AccessKind::Load);
        assert_eq!(mmu.process_access(&access), Err(MmuError::StructureCorrupt));
    }

    #[test]
    fn statistics_without_tlb_are_zero() {
        let map = Rc::new(RefCell::new(BTreeMap::new()));
        let mmu = mmu_with(&map);
        assert_eq!(mmu.tlb_statistics(), TlbStats::default());
    }
}
