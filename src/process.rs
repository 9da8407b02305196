//! Per-process address-space aggregate
//!
//! `Process` bundles everything the paging subsystem tracks for one
//! process: the page table, the paging metadata, the swap file, and the
//! replacement policy. Every operation takes the process and the machine
//! explicitly; there is no ambient current-process lookup.

use crate::error::VmResult;
use crate::machine::Machine;
use crate::meta::PagingState;
use crate::page_table::PageTable;
use crate::policy::Policy;
use crate::swap::SwapFile;
use crate::vm;
use crate::{page_round_up, PAGE_SIZE};

/// One process's address space and paging state
pub struct Process {
    /// Process id; ids 0 and 1 are the system/init processes, whose pages
    /// are permanently resident
    pub pid: u32,
    /// Current size of the user image in bytes
    pub size: u64,
    /// Top-level page table
    pub page_table: PageTable,
    /// Replacement policy chosen at creation
    pub policy: Policy,
    /// Residency, swap-offset, and aging metadata
    pub state: PagingState,
    /// Backing store for evicted pages
    pub swap: SwapFile,
}

impl Process {
    /// Create a process with an empty address space
    pub fn new<M: Machine>(m: &M, pid: u32, policy: Policy) -> VmResult<Self> {
        Ok(Self {
            pid,
            size: 0,
            page_table: PageTable::new(m)?,
            policy,
            state: PagingState::new(),
            swap: SwapFile::new(),
        })
    }

    /// Check if this is the system/init process (never paged)
    #[inline]
    pub fn is_system(&self) -> bool {
        self.pid <= 1
    }

    /// Check if this process's pages are subject to eviction
    #[inline]
    pub fn pageable(&self) -> bool {
        !self.policy.is_none() && !self.is_system()
    }

    /// Duplicate the address space for a child process
    ///
    /// Resident pages are copied frame-for-frame; on-disk pages are
    /// mirrored as paged-out PTEs backed by a deep copy of the swap file.
    /// On failure every page already given to the child is released.
    pub fn fork<M: Machine>(&self, m: &M, child_pid: u32) -> VmResult<Process> {
        let mut child = Process {
            pid: child_pid,
            size: self.size,
            page_table: PageTable::new(m)?,
            policy: self.policy,
            state: self.state.clone(),
            swap: self.swap.clone(),
        };
        if let Err(e) = vm::uvm_copy(self, &mut child, m) {
            child.teardown(m);
            return Err(e);
        }
        Ok(child)
    }

    /// Release the whole address space on exit
    ///
    /// Unmaps every page (freeing frames and paging state), frees the
    /// page-table frames, and drops the swap file with the process.
    pub fn teardown<M: Machine>(mut self, m: &M) {
        let npages = page_round_up(self.size) / PAGE_SIZE as u64;
        vm::uvm_unmap(&mut self, m, 0, npages, true);
        self.page_table.free_tables(m);
    }
}
