//! OS-side page table driver for the AArch64 16 KiB granule.
//!
//! Owns the table hierarchy of every registered PID. Table storage comes
//! from the host kernel through [`KernelAllocator`]; the driver only owns
//! the tree as a logical structure and must hand every byte back on
//! teardown.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::mem::size_of;

use log::error;

use crate::mem::access::{MappingRef, PhysPage};
use crate::mmu::MmuError;
use crate::traits::{KernelAllocator, MmuDriver};

use super::constants::{
    ADDRESS_SPACE_BITS, L0_ENTRIES, L1_ENTRIES, L3_ENTRIES, PAGE_BITS, PAGE_SIZE, TABLE_ALIGN,
};
use super::ops::va_indices;
use super::types::{table_mut, TableEntry};

/// Per-PID page table driver.
pub struct AArch64MmuDriver {
    /// PID -> address of the L0 root table.
    page_tables: BTreeMap<u64, usize>,
    /// Bytes currently allocated for tables across all PIDs.
    bytes_allocated: u64,
    kernel: Option<Arc<dyn KernelAllocator>>,
}

impl AArch64MmuDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            page_tables: BTreeMap::new(),
            bytes_allocated: 0,
            kernel: None,
        }
    }

    fn kernel(&self) -> Result<&Arc<dyn KernelAllocator>, MmuError> {
        self.kernel.as_ref().ok_or(MmuError::NoHostKernel)
    }

    /// Allocate and zero one table of `entries` entries.
    fn allocate_table(&mut self, entries: usize) -> Result<usize, MmuError> {
        let size = entries * size_of::<TableEntry>();
        let addr = self.kernel()?.allocate_memory(size, TABLE_ALIGN)?;
        self.bytes_allocated += size as u64;

        // SAFETY: the region was just allocated for this table's exclusive
        // use and is `size` bytes long.
        unsafe { core::ptr::write_bytes(addr as *mut u8, 0, size) };
        Ok(addr)
    }

    /// Descend into the table referenced by `parent[index]`, allocating a
    /// fresh child table when the entry is still invalid.
    fn get_or_create_table(
        &mut self,
        parent_addr: usize,
        parent_entries: usize,
        index: usize,
    ) -> Result<usize, MmuError> {
        // SAFETY: parent_addr points at a live table owned by this driver;
        // no other reference to it is held across this call.
        let parent = unsafe { table_mut(parent_addr, parent_entries) };
        let entry = parent[index];

        if !entry.is_valid() {
            let child = self.allocate_table(L1_ENTRIES)?;
            parent[index] = TableEntry::new_table(child);
            Ok(child)
        } else if entry.is_table() {
            Ok(entry.address())
        } else {
            // A valid non-table entry at an interior level.
            Err(MmuError::StructureCorrupt)
        }
    }

    /// Recursively release the table at `table_addr` and all its children.
    ///
    /// Children are returned to the kernel before their parent table.
    fn release_level(
        &mut self,
        kernel: &Arc<dyn KernelAllocator>,
        table_addr: usize,
        level: usize,
    ) {
        let entries = if level == 0 { L0_ENTRIES } else { L1_ENTRIES };

        if level < 3 {
            // SAFETY: the table is live until the release below.
            let entry_table = unsafe { table_mut(table_addr, entries) };
            for i in 0..entries {
                let entry = entry_table[i];
                if entry.is_table() {
                    self.release_level(kernel, entry.address(), level + 1);
                }
            }
        }

        let size = entries * size_of::<TableEntry>();
        kernel.release_memory(table_addr, size);
        self.bytes_allocated -= size as u64;
    }

    /// Resolve the leaf entry a [`MappingRef`] points at.
    fn resolve_leaf(&mut self, mapping: MappingRef) -> Result<&mut TableEntry, MmuError> {
        let root = *self
            .page_tables
            .get(&mapping.pid)
            .ok_or(MmuError::PidNotFound)?;

        let v_addr = mapping.v_page << PAGE_BITS;
        let indices = va_indices(v_addr);

        let mut table_addr = root;
        for (level, &index) in indices.iter().take(3).enumerate() {
            let entries = if level == 0 { L0_ENTRIES } else { L1_ENTRIES };
            // SAFETY: table_addr is the PID's root or came out of a valid
            // interior entry; both are tables owned by this driver.
            let entry = unsafe { table_mut(table_addr, entries) }[index];
            if !entry.is_valid() {
                return Err(MmuError::NeverMapped);
            }
            if !entry.is_table() {
                return Err(MmuError::StructureCorrupt);
            }
            table_addr = entry.address();
        }

        // SAFETY: table_addr is the PID's live L3 table.
        let leaf_table = unsafe { table_mut(table_addr, L3_ENTRIES) };
        Ok(&mut leaf_table[indices[3]])
    }
}

impl Default for AArch64MmuDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MmuDriver for AArch64MmuDriver {
    fn set_host_kernel(&mut self, kernel: Arc<dyn KernelAllocator>) {
        self.kernel = Some(kernel);
    }

    fn page_size(&self) -> u64 {
        PAGE_SIZE
    }

    fn allocate_page_table(&mut self, pid: u64) -> Result<(), MmuError> {
        if self.page_tables.contains_key(&pid) {
            return Err(MmuError::PidInUse);
        }

        // The root L0 table only has 2 entries.
        let root = self.allocate_table(L0_ENTRIES)?;
        self.page_tables.insert(pid, root);
        Ok(())
    }

    fn release_page_table(&mut self, pid: u64) -> Result<(), MmuError> {
        let root = self
            .page_tables
            .remove(&pid)
            .ok_or(MmuError::PidNotFound)?;
        let kernel = Arc::clone(self.kernel()?);
        self.release_level(&kernel, root, 0);
        Ok(())
    }

    fn page_table(&self, pid: u64) -> Option<usize> {
        self.page_tables.get(&pid).copied()
    }

    fn set_mapping(
        &mut self,
        pid: u64,
        v_addr: u64,
        p_page: &mut PhysPage,
    ) -> Result<(), MmuError> {
        // Strip unused sign-extension bits.
        let v_addr = v_addr & ((1u64 << ADDRESS_SPACE_BITS) - 1);
        let indices = va_indices(v_addr);

        let root = *self.page_tables.get(&pid).ok_or(MmuError::PidNotFound)?;

        let l1 = self.get_or_create_table(root, L0_ENTRIES, indices[0])?;
        let l2 = self.get_or_create_table(l1, L1_ENTRIES, indices[1])?;
        let l3 = self.get_or_create_table(l2, L1_ENTRIES, indices[2])?;

        // SAFETY: l3 is the live leaf table just reached above.
        let leaf_table = unsafe { table_mut(l3, L3_ENTRIES) };
        leaf_table[indices[3]] = TableEntry::new_page(p_page.addr);

        p_page.driver_data = Some(MappingRef {
            pid,
            v_page: v_addr >> PAGE_BITS,
        });
        Ok(())
    }

    fn set_page_valid(&mut self, p_page: &PhysPage, setting: bool) -> Result<(), MmuError> {
        let mapping = p_page.driver_data.ok_or(MmuError::NeverMapped)?;
        let entry = self.resolve_leaf(mapping)?;

        // A slot set_mapping never touched is all zeroes; an installed leaf
        // keeps its PPN even while invalidated. Only the latter may be
        // toggled.
        if entry.raw() == 0 {
            return Err(MmuError::NeverMapped);
        }

        entry.set_valid(setting);
        Ok(())
    }

    fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated
    }
}

impl Drop for AArch64MmuDriver {
    fn drop(&mut self) {
        if !self.page_tables.is_empty() {
            error!(
                "AArch64MmuDriver: kernel did not release all page tables ({} PIDs live)",
                self.page_tables.len()
            );
        }
    }
}
