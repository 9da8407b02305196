//! Swap file and the swap-out / swap-in protocol
//!
//! This module implements:
//! - SwapFile: the per-process backing store for evicted pages
//! - page_out: evict one resident page to a given swap offset
//! - swap_in: fault an on-disk page back into a fresh frame
//! - next_free_offset: first-fit allocation of swap offsets
//!
//! Pages move whole: one `PAGE_SIZE` copy through a stack buffer per
//! transfer. Swap offsets are reused as soon as the page they held is
//! faulted back in.

extern crate alloc;

use alloc::vec::Vec;

use log::trace;

use crate::error::{VmError, VmResult};
use crate::machine::Machine;
use crate::meta::PagingState;
use crate::process::Process;
use crate::pte::{Pte, PteFlags};
use crate::{MAX_PSYC_PAGES, MAX_TOTAL_PAGES, PAGE_SHIFT, PAGE_SIZE};

// ============================================================================
// Swap file
// ============================================================================

/// Per-process swap file
///
/// Owned exclusively by its process; `fork` deep-copies it so the child's
/// on-disk pages fault in from the child's own store.
#[derive(Debug, Clone)]
pub struct SwapFile {
    data: Vec<u8>,
    limit: usize,
}

impl SwapFile {
    /// Create an empty swap file sized for a full address space
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            limit: MAX_TOTAL_PAGES * PAGE_SIZE,
        }
    }

    /// Bytes currently backed by the file
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read from `offset` into `buf`
    ///
    /// Short reads past the end of the file zero-fill the remainder.
    /// Returns the number of bytes actually backed by the file.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> VmResult<usize> {
        let off = offset as usize;
        if off >= self.data.len() {
            buf.fill(0);
            return Ok(0);
        }
        let avail = (self.data.len() - off).min(buf.len());
        buf[..avail].copy_from_slice(&self.data[off..off + avail]);
        buf[avail..].fill(0);
        Ok(avail)
    }

    /// Write `buf` at `offset`, growing the file as needed
    pub fn write(&mut self, buf: &[u8], offset: u64) -> VmResult<usize> {
        let off = offset as usize;
        let end = off
            .checked_add(buf.len())
            .ok_or(VmError::InvalidArgument)?;
        if end > self.limit {
            return Err(VmError::NoSpace);
        }
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[off..end].copy_from_slice(buf);
        Ok(buf.len())
    }
}

impl Default for SwapFile {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Offset allocation
// ============================================================================

/// First swap offset in `[0, limit)` not held by any page slot
pub(crate) fn next_free_offset_in(state: &PagingState, limit: u64) -> Option<u64> {
    let mut off = 0u64;
    while off < limit {
        if !state.meta.iter().any(|pm| pm.offset == off as i64) {
            return Some(off);
        }
        off += PAGE_SIZE as u64;
    }
    None
}

/// First swap offset within the process image not held by any page slot
///
/// Linear rescan on every call; eviction is rare enough that no free list
/// is kept. Returns None only if every page-aligned offset below the
/// process size is taken, which the residency invariants rule out.
pub fn next_free_offset(p: &Process) -> Option<u64> {
    next_free_offset_in(&p.state, p.size)
}

// ============================================================================
// Swap-out / swap-in
// ============================================================================

/// Evict one resident page to `offset` in the swap file
///
/// The victim comes from the process's replacement policy. Its frame is
/// written out and freed, its PTE flips from valid to paged-out (permission
/// bits preserved), and the paging state is updated in lockstep.
///
/// # Panics
/// Panics if the swap write fails - the page's contents exist nowhere else,
/// so the process cannot safely continue.
pub fn page_out<M: Machine>(p: &mut Process, m: &M, offset: u64) {
    let victim = p.policy.select_victim(&mut p.state, &p.page_table, m);
    let va = (victim as u64) << PAGE_SHIFT;
    let slot = p
        .page_table
        .walk(m, va, false)
        .expect("page_out: victim not mapped");
    let pte = Pte::from_raw(m.read_pte(slot));
    let pa = pte.addr();

    let mut buf = [0u8; PAGE_SIZE];
    m.read_frame(pa, &mut buf);
    if p.swap.write(&buf, offset).is_err() {
        panic!("page_out: swap write failed");
    }
    m.free_frame(pa);

    let flags = (pte.flags() - PteFlags::VALID) | PteFlags::PAGED_OUT;
    m.write_pte(slot, Pte::new(0, flags).raw());
    m.sfence_vma(va);

    p.state.make_paged_out(victim, offset);
    // The second-chance selector already dequeued the victim; for the aging
    // selectors this does the removal, otherwise it is a no-op.
    p.state.queue.remove(victim);

    trace!("page_out: pid {} page {} -> offset {}", p.pid, victim, offset);
}

/// Bring the on-disk page at `va` back into a fresh frame
///
/// If the process is at its residency cap, another page is first evicted
/// into the swap slot this page is vacating.
///
/// # Panics
/// Panics if the page has no swap slot (lost page) or if no frame can be
/// allocated - the faulting process cannot make progress either way.
pub fn swap_in<M: Machine>(p: &mut Process, m: &M, va: u64) {
    let page = (va >> PAGE_SHIFT) as usize;
    let offset = p.state.meta[page].offset;
    if offset < 0 {
        panic!("swap_in: page {} has no swap slot", page);
    }

    let slot = p
        .page_table
        .walk(m, va, false)
        .expect("swap_in: paged-out page has no pte");
    let pte = Pte::from_raw(m.read_pte(slot));

    let frame = match m.alloc_frame() {
        Some(f) => f,
        None => panic!("swap_in: out of physical frames"),
    };
    let mut buf = [0u8; PAGE_SIZE];
    if p.swap.read(&mut buf, offset as u64).is_err() {
        panic!("swap_in: swap read failed");
    }
    m.write_frame(frame, &buf);

    if p.state.pages_in_memory >= MAX_PSYC_PAGES {
        // Reuse the slot this page is vacating
        page_out(p, m, offset as u64);
    }

    let flags = (pte.flags() - PteFlags::PAGED_OUT) | PteFlags::VALID;
    m.write_pte(slot, Pte::new(frame, flags).raw());
    p.state.make_resident(page, p.policy.init_aging());
    m.sfence_vma(va);

    trace!("swap_in: pid {} page {} <- offset {}", p.pid, page, offset);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_file_write_read() {
        let mut f = SwapFile::new();
        let page = [0x5A; PAGE_SIZE];
        assert_eq!(f.write(&page, 8192).unwrap(), PAGE_SIZE);
        assert_eq!(f.len(), 8192 + PAGE_SIZE);

        let mut buf = [0u8; PAGE_SIZE];
        assert_eq!(f.read(&mut buf, 8192).unwrap(), PAGE_SIZE);
        assert_eq!(buf, page);
    }

    #[test]
    fn test_swap_file_short_read_zero_fills() {
        let mut f = SwapFile::new();
        f.write(&[1u8; 16], 0).unwrap();

        let mut buf = [0xFFu8; PAGE_SIZE];
        assert_eq!(f.read(&mut buf, 0).unwrap(), 16);
        assert_eq!(&buf[..16], &[1u8; 16]);
        assert!(buf[16..].iter().all(|&b| b == 0));

        // Entirely past the end
        let mut buf = [0xFFu8; PAGE_SIZE];
        assert_eq!(f.read(&mut buf, 1 << 20).unwrap(), 0);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_swap_file_respects_limit() {
        let mut f = SwapFile::new();
        let page = [0u8; PAGE_SIZE];
        let past_end = (MAX_TOTAL_PAGES * PAGE_SIZE) as u64;
        assert_eq!(f.write(&page, past_end), Err(VmError::NoSpace));
        // The last in-bounds page is fine
        assert!(f.write(&page, past_end - PAGE_SIZE as u64).is_ok());
    }

    #[test]
    fn test_next_free_offset_skips_taken_slots() {
        let mut state = PagingState::new();
        state.meta[4].offset = 0;
        state.meta[9].offset = PAGE_SIZE as i64;
        let limit = (4 * PAGE_SIZE) as u64;
        assert_eq!(next_free_offset_in(&state, limit), Some(2 * PAGE_SIZE as u64));
    }

    #[test]
    fn test_next_free_offset_exhausted() {
        let mut state = PagingState::new();
        state.meta[0].offset = 0;
        assert_eq!(next_free_offset_in(&state, PAGE_SIZE as u64), None);
        assert_eq!(next_free_offset_in(&state, 0), None);
    }
}
