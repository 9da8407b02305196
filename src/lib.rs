//! Demand paging for a small Sv39 teaching kernel
//!
//! A process may have more virtual pages than fit in physical memory;
//! excess pages are evicted to a per-process swap file and faulted back in
//! transparently on access. The crate provides:
//!
//! - Per-process paging state: a fixed table of page residency, swap
//!   offsets, and aging history, plus a FIFO of resident pages
//! - Three replacement policies (NFUA, LAPA, SCFIFO) selectable per
//!   process at runtime, or none at all
//! - The swap protocol: coordinated PTE manipulation, frame (de)allocation,
//!   and swap-file I/O, hooked into heap growth, the page-fault handler,
//!   fork/exit, and the scheduler tick
//!
//! The machine itself - physical frames, page-table memory, the
//! translation fence - sits behind the [`Machine`] trait, with
//! [`PhysMemory`] as the soft implementation.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod machine;
pub mod meta;
pub mod page_table;
pub mod policy;
pub mod process;
pub mod pte;
pub mod swap;
pub mod vm;

pub use error::{VmError, VmResult};
pub use machine::{Machine, PhysMemory};
pub use page_table::PageTable;
pub use policy::Policy;
pub use process::Process;
pub use pte::{Pte, PteFlags};
pub use swap::{next_free_offset, page_out, swap_in, SwapFile};
pub use vm::{
    age_tick, copy_in, copy_out, handle_page_fault, uvm_alloc, uvm_copy, uvm_dealloc, uvm_first,
    uvm_unmap,
};

/// log2 of the page size
pub const PAGE_SHIFT: u32 = 12;

/// Page size in bytes (4 KiB)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Physical residency cap per process
pub const MAX_PSYC_PAGES: usize = 16;

/// Total virtual pages per process subject to paging
pub const MAX_TOTAL_PAGES: usize = 32;

/// Round an address up to the next page boundary
#[inline]
pub const fn page_round_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

/// Round an address down to its page boundary
#[inline]
pub const fn page_round_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        assert_eq!(page_round_up(0), 0);
        assert_eq!(page_round_up(1), PAGE_SIZE as u64);
        assert_eq!(page_round_up(PAGE_SIZE as u64), PAGE_SIZE as u64);
        assert_eq!(page_round_down(PAGE_SIZE as u64 + 17), PAGE_SIZE as u64);
    }
}
