//! Sv39 page-table entries
//!
//! A PTE packs a 44-bit physical page number above a 10-bit flag field:
//!
//! ```text
//! Bit 0:      V  (valid)
//! Bits 1-3:   R/W/X permissions (any set => leaf entry)
//! Bit 4:      U  (user accessible)
//! Bit 5:      G  (global)
//! Bit 6:      A  (accessed, set by hardware on load/store)
//! Bit 7:      D  (dirty, set by hardware on store)
//! Bits 8-9:   RSW (reserved for software)
//! Bits 10-53: PPN
//! ```
//!
//! The low RSW bit is claimed as `PAGED_OUT`: set (with V clear) when the
//! page's contents live in the swap file rather than a physical frame.

use bitflags::bitflags;

use crate::PAGE_SHIFT;

/// Shift from the physical address field down to bit 0.
const PPN_SHIFT: u32 = 10;

/// Mask covering the flag field (bits 0-9).
const FLAGS_MASK: u64 = (1 << PPN_SHIFT) - 1;

bitflags! {
    /// Sv39 PTE flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXEC = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
        /// Software bit: the page lives in the swap file (valid bit clear).
        const PAGED_OUT = 1 << 8;
    }
}

/// Page table entry
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Pte(u64);

impl Pte {
    /// Create an empty (unallocated) entry
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create an entry mapping `pa` with the given flags
    pub fn new(pa: u64, flags: PteFlags) -> Self {
        Self(((pa >> PAGE_SHIFT) << PPN_SHIFT) | flags.bits())
    }

    /// Reconstruct from a raw PTE word
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw PTE word
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Get the physical address of the mapped frame (or child table)
    #[inline]
    pub fn addr(&self) -> u64 {
        (self.0 >> PPN_SHIFT) << PAGE_SHIFT
    }

    /// Get the flag field
    #[inline]
    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & FLAGS_MASK)
    }

    /// Check if the valid bit is set
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags().contains(PteFlags::VALID)
    }

    /// Check if the page is on disk (paged-out bit set, valid clear)
    #[inline]
    pub fn is_paged_out(&self) -> bool {
        !self.is_valid() && self.flags().contains(PteFlags::PAGED_OUT)
    }

    /// Check if this is a leaf entry (any of R/W/X set)
    ///
    /// A valid entry with R/W/X all clear points at the next-level table.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.flags()
            .intersects(PteFlags::READ | PteFlags::WRITE | PteFlags::EXEC)
    }
}

impl core::fmt::Debug for Pte {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pte(pa={:#x}, {:?})", self.addr(), self.flags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pte_roundtrip() {
        let flags = PteFlags::VALID | PteFlags::READ | PteFlags::WRITE | PteFlags::USER;
        let pte = Pte::new(0x8000_3000, flags);
        assert_eq!(pte.addr(), 0x8000_3000);
        assert_eq!(pte.flags(), flags);
        assert!(pte.is_valid());
        assert!(pte.is_leaf());
        assert!(!pte.is_paged_out());
    }

    #[test]
    fn test_paged_out_entry() {
        let flags = PteFlags::READ | PteFlags::WRITE | PteFlags::USER | PteFlags::PAGED_OUT;
        let pte = Pte::new(0, flags);
        assert!(!pte.is_valid());
        assert!(pte.is_paged_out());
        // Permission bits survive the transition
        assert!(pte.flags().contains(PteFlags::WRITE));
    }

    #[test]
    fn test_non_leaf_entry() {
        let pte = Pte::new(0x8000_1000, PteFlags::VALID);
        assert!(pte.is_valid());
        assert!(!pte.is_leaf());
        assert_eq!(pte.addr(), 0x8000_1000);
    }

    #[test]
    fn test_empty_entry() {
        let pte = Pte::empty();
        assert_eq!(pte.raw(), 0);
        assert!(!pte.is_valid());
        assert!(!pte.is_paged_out());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn pte_addr_flags_roundtrip(
                frame in 0u64..0x10000,
                bits in 0u64..0x400,
            ) {
                let pa = 0x8000_0000 + (frame << 12);
                let flags = PteFlags::from_bits_truncate(bits);
                let pte = Pte::new(pa, flags);
                prop_assert_eq!(pte.addr(), pa);
                prop_assert_eq!(pte.flags(), flags);
                prop_assert_eq!(Pte::from_raw(pte.raw()), pte);
            }
        }
    }
}
