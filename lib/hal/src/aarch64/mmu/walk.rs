//! Hardware walker for the AArch64 16 KiB granule.

use crate::mem::is_aligned;
use crate::mmu::MmuError;
use crate::traits::MmuArch;

use super::constants::{
    ADDRESS_SPACE_BITS, L0_ENTRIES, L1_ENTRIES, L2_ENTRIES, L3_ENTRIES, PAGE_BITS, PAGE_SIZE,
    TABLE_ALIGN,
};
use super::ops::va_indices;
use super::types::{table, table_mut};

/// The MMU hardware part: a four-level page table walk from L0 to L3.
#[derive(Debug, Default)]
pub struct AArch64Mmu;

impl AArch64Mmu {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MmuArch for AArch64Mmu {
    fn page_bits(&self) -> u8 {
        PAGE_BITS as u8
    }

    fn page_size(&self) -> u64 {
        PAGE_SIZE
    }

    fn address_space_bits(&self) -> u8 {
        ADDRESS_SPACE_BITS as u8
    }

    fn perform_translation(
        &self,
        root: usize,
        v_page: u64,
        is_write: bool,
    ) -> Result<u64, MmuError> {
        if !is_aligned(root, TABLE_ALIGN) {
            return Err(MmuError::MisalignedRoot);
        }

        let v_addr = v_page << PAGE_BITS;
        let indices = va_indices(v_addr);
        let interior_entries = [L0_ENTRIES, L1_ENTRIES, L2_ENTRIES];

        // L0 -> L1 -> L2: each entry must be a valid table descriptor.
        let mut table_addr = root;
        for (level, &entries) in interior_entries.iter().enumerate() {
            // SAFETY: table_addr is the aligned root supplied by the driver,
            // or came out of a valid interior entry below; both point at
            // live tables of `entries` entries.
            let entry = unsafe { table(table_addr, entries) }[indices[level]];
            if !entry.is_valid() {
                return Err(MmuError::NotMapped);
            }
            if !entry.is_table() {
                // A valid interior entry without the table type cannot be
                // descended into; the tree is malformed.
                return Err(MmuError::StructureCorrupt);
            }
            table_addr = entry.address();
        }

        // L3: the leaf. The walk records the access in the entry itself.
        // SAFETY: table_addr came out of a valid L2 table entry and no other
        // reference to the leaf table is live during the walk.
        let leaf_table = unsafe { table_mut(table_addr, L3_ENTRIES) };
        let entry = &mut leaf_table[indices[3]];
        if !entry.is_valid() {
            return Err(MmuError::NotMapped);
        }

        entry.set_referenced();
        if is_write {
            entry.set_dirty();
        }

        Ok(entry.ppn())
    }
}
