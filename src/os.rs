//! Host OS model.
//!
//! Owns the pieces the core components treat as external collaborators: the
//! physical memory manager, the page-table driver, the MMU, and the
//! per-process bookkeeping. Implements the two contracts the core consumes:
//! the host-kernel memory interface (page tables are carved out of the
//! simulated RAM arena) and the page-fault handler (allocate a frame, map
//! it, return).

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, trace};
use spin::Mutex;

use sim_hal::aarch64::mmu::{AArch64Mmu, AArch64MmuDriver};
use sim_hal::traits::{KernelAllocator, MmuDriver};
use sim_hal::{MemAccess, Mmu, MmuError, PhysPage, Tlb, TlbStats};
use sim_mm::{PhysMemError, PhysMemManager};

/// Host-kernel memory interface on top of the frame allocator.
///
/// Table allocations are rounded up to whole frames, so page tables live
/// inside the simulated RAM like everything else.
pub struct KernelHeap {
    phys: Arc<Mutex<PhysMemManager>>,
}

impl KernelAllocator for KernelHeap {
    fn allocate_memory(&self, size: usize, alignment: usize) -> Result<usize, MmuError> {
        let mut phys = self.phys.lock();
        let page_size = phys.page_size();

        // Frame-granular carving satisfies any alignment up to the frame
        // size; a larger alignment cannot be met.
        if alignment as u64 > page_size {
            return Err(MmuError::AllocationFailed);
        }

        let pages = (size as u64).div_ceil(page_size);
        phys.allocate_pages(pages).ok_or(MmuError::AllocationFailed)
    }

    fn release_memory(&self, addr: usize, size: usize) {
        let mut phys = self.phys.lock();
        let pages = (size as u64).div_ceil(phys.page_size());
        phys.release_pages(addr, pages);
    }
}

/// Driver and process bookkeeping shared with the page-fault handler.
struct KernelState {
    driver: AArch64MmuDriver,
    /// Frames handed to each process by the fault handler.
    frames: HashMap<u64, Vec<PhysPage>>,
    current_pid: u64,
}

/// The simulated operating system kernel.
pub struct OsKernel {
    // Dropped first so the MMU's end-of-life report precedes arena teardown.
    mmu: Mmu<AArch64Mmu>,
    state: Arc<Mutex<KernelState>>,
    phys: Arc<Mutex<PhysMemManager>>,
}

impl OsKernel {
    /// Boot the OS model: arena, driver, MMU and fault handler.
    pub fn new(
        page_size: u64,
        memory_size: u64,
        tlb_entries: usize,
    ) -> Result<Self, PhysMemError> {
        let phys = Arc::new(Mutex::new(PhysMemManager::new(page_size, memory_size)?));

        let mut driver = AArch64MmuDriver::new();
        driver.set_host_kernel(Arc::new(KernelHeap {
            phys: Arc::clone(&phys),
        }));

        let state = Arc::new(Mutex::new(KernelState {
            driver,
            frames: HashMap::new(),
            current_pid: 0,
        }));

        let mut mmu = Mmu::new(AArch64Mmu::new());
        if tlb_entries > 0 {
            mmu.set_tlb(Tlb::new(tlb_entries));
        }

        // The fault handler: back the faulting page with a fresh frame and
        // install the mapping for the current process. Arena exhaustion is
        // an ordinary outcome of a too-small configuration; it aborts the
        // access with an error instead of crashing the simulation.
        let handler_phys = Arc::clone(&phys);
        let handler_state = Arc::clone(&state);
        mmu.set_page_fault_handler(Box::new(move |v_addr| {
            trace!("page fault @ {v_addr:#x}");

            let frame_addr = handler_phys
                .lock()
                .allocate_pages(1)
                .ok_or(MmuError::OutOfMemory)?;

            let mut st = handler_state.lock();
            let pid = st.current_pid;
            let mut frame = PhysPage::new(frame_addr as u64);
            if let Err(err) = st.driver.set_mapping(pid, v_addr, &mut frame) {
                handler_phys.lock().release_pages(frame_addr, 1);
                return Err(err);
            }
            st.frames.entry(pid).or_default().push(frame);
            Ok(())
        }));

        Ok(Self { mmu, state, phys })
    }

    /// Emit one trace line per memory access and translation.
    pub fn set_access_logging(&mut self, enabled: bool) {
        self.mmu.set_access_logging(enabled);
    }

    /// Create the page table hierarchy for a new process.
    pub fn create_process(&mut self, pid: u64) -> Result<(), MmuError> {
        self.state.lock().driver.allocate_page_table(pid)?;
        info!("created process {pid}");
        Ok(())
    }

    /// Context-switch the MMU to `pid`.
    ///
    /// TLB entries are ASID-tagged, so no flush is needed; stale entries of
    /// other processes simply stop matching.
    pub fn switch_to(&mut self, pid: u64) -> Result<(), MmuError> {
        let root = {
            let st = self.state.lock();
            st.driver.page_table(pid).ok_or(MmuError::PidNotFound)?
        };
        self.mmu.set_page_table_pointer(root);
        self.mmu.set_current_asid(pid);
        self.state.lock().current_pid = pid;
        Ok(())
    }

    /// Run one access through the MMU, faulting pages in as needed.
    pub fn process_access(&mut self, access: &MemAccess) -> Result<u64, MmuError> {
        self.mmu.process_access(access)
    }

    /// Tear down a process: page tables, frames, and its TLB entries.
    pub fn terminate_process(&mut self, pid: u64) -> Result<(), MmuError> {
        let frames = {
            let mut st = self.state.lock();
            st.driver.release_page_table(pid)?;
            st.frames.remove(&pid).unwrap_or_default()
        };

        {
            let mut phys = self.phys.lock();
            for frame in &frames {
                phys.release_pages(frame.addr as usize, 1);
            }
        }

        self.mmu.flush_tlb_asid(pid);
        info!("terminated process {pid} ({} frames returned)", frames.len());
        Ok(())
    }

    /// Whether every frame in the arena has been returned.
    pub fn all_released(&self) -> bool {
        self.phys.lock().all_released()
    }

    /// High-water mark of simultaneously allocated frames.
    pub fn max_allocated_pages(&self) -> u64 {
        self.phys.lock().max_allocated_pages()
    }

    /// Snapshot of the MMU's TLB counters.
    pub fn tlb_statistics(&self) -> TlbStats {
        self.mmu.tlb_statistics()
    }
}
