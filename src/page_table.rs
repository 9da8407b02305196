//! Sv39 three-level page tables
//!
//! A 39-bit virtual address is split into three 9-bit table indices and a
//! 12-bit page offset. Table pages live in physical frames; `walk` returns
//! the physical address of a PTE slot, and all PTE traffic goes through the
//! [`Machine`] word accessors.

use crate::error::{VmError, VmResult};
use crate::machine::Machine;
use crate::pte::{Pte, PteFlags};
use crate::{PAGE_SHIFT, PAGE_SIZE};

/// PTEs per table page
pub const ENTRIES_PER_TABLE: usize = 512;

/// One past the highest valid user virtual address
///
/// Sv39 sign-extends bit 38; staying below it sidesteps addresses that
/// would need extension.
pub const MAXVA: u64 = 1 << 38;

/// A process's top-level page table
pub struct PageTable {
    /// Physical address of the root table frame
    root: u64,
}

impl PageTable {
    /// Allocate an empty page table
    pub fn new<M: Machine>(m: &M) -> VmResult<Self> {
        let root = m.alloc_frame().ok_or(VmError::OutOfMemory)?;
        Ok(Self { root })
    }

    /// Physical address of the root table (the value the hardware register
    /// would be programmed with)
    #[inline]
    pub fn root_phys(&self) -> u64 {
        self.root
    }

    /// Index into the level-`level` table for `va`
    #[inline]
    fn px(level: u32, va: u64) -> u64 {
        (va >> (PAGE_SHIFT + 9 * level)) & (ENTRIES_PER_TABLE as u64 - 1)
    }

    /// Find the PTE slot for `va`, optionally creating intermediate tables
    ///
    /// Returns the physical address of the leaf-level PTE slot. With
    /// `alloc` set, missing intermediate tables are allocated (zeroed);
    /// returns None if allocation fails or, without `alloc`, if the path
    /// does not exist.
    ///
    /// # Panics
    /// Panics if `va` is outside the Sv39 range.
    pub fn walk<M: Machine>(&self, m: &M, va: u64, alloc: bool) -> Option<u64> {
        if va >= MAXVA {
            panic!("walk: va {:#x} out of range", va);
        }

        let mut table = self.root;
        for level in [2u32, 1u32] {
            let slot = table + Self::px(level, va) * 8;
            let pte = Pte::from_raw(m.read_pte(slot));
            if pte.is_valid() {
                table = pte.addr();
            } else if alloc {
                let frame = m.alloc_frame()?;
                m.write_pte(slot, Pte::new(frame, PteFlags::VALID).raw());
                table = frame;
            } else {
                return None;
            }
        }
        Some(table + Self::px(0, va) * 8)
    }

    /// Map the page at `va` to the frame at `pa`
    ///
    /// # Panics
    /// Panics if `va` is already mapped - mapping over a live PTE would
    /// leak its frame.
    pub fn map<M: Machine>(&self, m: &M, va: u64, pa: u64, flags: PteFlags) -> VmResult<()> {
        let slot = self.walk(m, va, true).ok_or(VmError::OutOfMemory)?;
        if Pte::from_raw(m.read_pte(slot)).is_valid() {
            panic!("map: remap of va {:#x}", va);
        }
        m.write_pte(slot, Pte::new(pa, flags | PteFlags::VALID).raw());
        Ok(())
    }

    /// Look up a user virtual address
    ///
    /// Returns the physical address it maps to, or None if the page is not
    /// present or not user-accessible.
    pub fn translate<M: Machine>(&self, m: &M, va: u64) -> Option<u64> {
        if va >= MAXVA {
            return None;
        }
        let slot = self.walk(m, va, false)?;
        let pte = Pte::from_raw(m.read_pte(slot));
        if !pte.is_valid() || !pte.flags().contains(PteFlags::USER) {
            return None;
        }
        Some(pte.addr() + (va & (PAGE_SIZE as u64 - 1)))
    }

    /// Free all table frames
    ///
    /// Leaf mappings must already have been removed; paged-out entries
    /// (valid bit clear) are discarded along with the tables.
    ///
    /// # Panics
    /// Panics on a still-mapped leaf.
    pub fn free_tables<M: Machine>(self, m: &M) {
        free_level(m, self.root);
    }
}

fn free_level<M: Machine>(m: &M, table: u64) {
    for i in 0..ENTRIES_PER_TABLE {
        let slot = table + (i * 8) as u64;
        let pte = Pte::from_raw(m.read_pte(slot));
        if pte.is_valid() {
            if pte.is_leaf() {
                panic!("free_tables: mapped leaf");
            }
            free_level(m, pte.addr());
            m.write_pte(slot, 0);
        }
    }
    m.free_frame(table);
}
