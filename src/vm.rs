//! Address-space operations and paging hooks
//!
//! This module implements:
//! - uvm_alloc / uvm_dealloc: user heap growth and shrink, enforcing the
//!   physical-residency cap by evicting before allocating
//! - uvm_unmap: tear down a page range, releasing frames and paging state
//! - uvm_copy: duplicate an address space for fork
//! - uvm_first: load the boot image for the initial process
//! - handle_page_fault: trap-dispatcher entry, services paged-out PTEs
//! - age_tick: scheduler entry, advances the aging shift registers
//! - copy_in / copy_out: kernel<->user copies that fault pages in on
//!   demand and set the accessed/dirty bits the hardware would set

use log::debug;

use crate::error::{VmError, VmResult};
use crate::machine::Machine;
use crate::page_table::MAXVA;
use crate::process::Process;
use crate::pte::{Pte, PteFlags};
use crate::swap::{next_free_offset_in, page_out, swap_in};
use crate::{page_round_down, page_round_up, MAX_PSYC_PAGES, MAX_TOTAL_PAGES, PAGE_SHIFT, PAGE_SIZE};

/// Flags for freshly allocated user pages
const USER_RWX: PteFlags = PteFlags::READ
    .union(PteFlags::WRITE)
    .union(PteFlags::EXEC)
    .union(PteFlags::USER);

// ============================================================================
// Growth and shrink
// ============================================================================

/// Grow the user image from `old_sz` to `new_sz` bytes
///
/// Returns the new size, or 0 on failure with the address space rolled back
/// to `old_sz`. Pages past the residency cap evict a victim first; the new
/// page starts resident with no swap slot. The system process and the
/// pass-through policy take the plain allocate-and-map path with no paging
/// state.
pub fn uvm_alloc<M: Machine>(p: &mut Process, m: &M, old_sz: u64, new_sz: u64) -> u64 {
    if new_sz < old_sz {
        return old_sz;
    }
    if !p.pageable() {
        return plain_alloc(p, m, old_sz, new_sz);
    }

    let mut a = page_round_up(old_sz);
    while a < new_sz {
        let page = (a >> PAGE_SHIFT) as usize;
        if page >= MAX_TOTAL_PAGES {
            debug!(
                "uvm_alloc: pid {} growth past {} pages rejected",
                p.pid, MAX_TOTAL_PAGES
            );
            uvm_dealloc(p, m, a, old_sz);
            return 0;
        }
        if p.state.pages_in_memory >= MAX_PSYC_PAGES {
            let limit = p.size.max(a + PAGE_SIZE as u64);
            let offset =
                next_free_offset_in(&p.state, limit).expect("uvm_alloc: no free swap slot");
            page_out(p, m, offset);
        }
        let frame = match m.alloc_frame() {
            Some(f) => f,
            None => {
                uvm_dealloc(p, m, a, old_sz);
                return 0;
            }
        };
        if p.page_table.map(m, a, frame, USER_RWX).is_err() {
            m.free_frame(frame);
            uvm_dealloc(p, m, a, old_sz);
            return 0;
        }
        p.state.make_resident(page, p.policy.init_aging());
        a += PAGE_SIZE as u64;
        p.size = a;
    }
    p.size = new_sz;
    new_sz
}

/// Growth without paging state, for the system process and `Policy::None`
fn plain_alloc<M: Machine>(p: &mut Process, m: &M, old_sz: u64, new_sz: u64) -> u64 {
    let mut a = page_round_up(old_sz);
    while a < new_sz {
        let frame = match m.alloc_frame() {
            Some(f) => f,
            None => {
                uvm_dealloc(p, m, a, old_sz);
                return 0;
            }
        };
        if p.page_table.map(m, a, frame, USER_RWX).is_err() {
            m.free_frame(frame);
            uvm_dealloc(p, m, a, old_sz);
            return 0;
        }
        a += PAGE_SIZE as u64;
        p.size = a;
    }
    p.size = new_sz;
    new_sz
}

/// Shrink the user image from `old_sz` to `new_sz` bytes
///
/// Returns the new size. Growing via this path is a no-op.
pub fn uvm_dealloc<M: Machine>(p: &mut Process, m: &M, old_sz: u64, new_sz: u64) -> u64 {
    if new_sz >= old_sz {
        return old_sz;
    }
    if page_round_up(new_sz) < page_round_up(old_sz) {
        let npages = (page_round_up(old_sz) - page_round_up(new_sz)) / PAGE_SIZE as u64;
        uvm_unmap(p, m, page_round_up(new_sz), npages, true);
    }
    p.size = new_sz;
    new_sz
}

// ============================================================================
// Unmap
// ============================================================================

/// Remove `npages` of mappings starting at `va`
///
/// Missing PTEs are skipped, so sparse or already-unmapped ranges tear down
/// cleanly. With `free_frames`, resident pages return their frame and reset
/// their paging state; paged-out pages give up their swap slot either way.
///
/// # Panics
/// Panics on an unaligned `va` or a non-leaf mapping in the range.
pub fn uvm_unmap<M: Machine>(p: &mut Process, m: &M, va: u64, npages: u64, free_frames: bool) {
    if va % PAGE_SIZE as u64 != 0 {
        panic!("uvm_unmap: not aligned");
    }

    let mut a = va;
    let end = va + npages * PAGE_SIZE as u64;
    while a < end {
        let page = (a >> PAGE_SHIFT) as usize;
        if let Some(slot) = p.page_table.walk(m, a, false) {
            let pte = Pte::from_raw(m.read_pte(slot));
            if pte.is_valid() {
                if !pte.is_leaf() {
                    panic!("uvm_unmap: not a leaf");
                }
                if free_frames {
                    m.free_frame(pte.addr());
                    if p.pageable() && page < MAX_TOTAL_PAGES {
                        p.state.clear_resident(page);
                    }
                }
            } else if pte.is_paged_out() && p.pageable() && page < MAX_TOTAL_PAGES {
                p.state.meta[page].offset = -1;
            }
            m.write_pte(slot, 0);
        }
        a += PAGE_SIZE as u64;
    }
}

// ============================================================================
// Fork copy
// ============================================================================

/// Copy the parent's address space into the child's page table
///
/// Resident pages get a fresh frame and a byte copy with identical flags.
/// Paged-out PTEs are mirrored; the caller has already given the child its
/// own copy of the swap file and paging state. On failure the child's pages
/// are unmapped and freed.
pub fn uvm_copy<M: Machine>(parent: &Process, child: &mut Process, m: &M) -> VmResult<()> {
    let end = page_round_up(parent.size);
    let mut va = 0u64;
    while va < end {
        if let Some(slot) = parent.page_table.walk(m, va, false) {
            let pte = Pte::from_raw(m.read_pte(slot));
            if pte.is_valid() {
                let frame = match m.alloc_frame() {
                    Some(f) => f,
                    None => return copy_rollback(child, m, va),
                };
                let mut buf = [0u8; PAGE_SIZE];
                m.read_frame(pte.addr(), &mut buf);
                m.write_frame(frame, &buf);
                if child.page_table.map(m, va, frame, pte.flags()).is_err() {
                    m.free_frame(frame);
                    return copy_rollback(child, m, va);
                }
            } else if pte.is_paged_out() {
                let child_slot = match child.page_table.walk(m, va, true) {
                    Some(s) => s,
                    None => return copy_rollback(child, m, va),
                };
                m.write_pte(child_slot, Pte::new(0, pte.flags()).raw());
            }
        }
        va += PAGE_SIZE as u64;
    }
    Ok(())
}

fn copy_rollback<M: Machine>(child: &mut Process, m: &M, copied: u64) -> VmResult<()> {
    uvm_unmap(child, m, 0, copied / PAGE_SIZE as u64, true);
    Err(VmError::OutOfMemory)
}

// ============================================================================
// Boot image
// ============================================================================

/// Load the boot image into VA 0 of the initial process
///
/// # Panics
/// Panics if `src` exceeds one page or memory is exhausted; the kernel
/// cannot boot without its first process.
pub fn uvm_first<M: Machine>(p: &mut Process, m: &M, src: &[u8]) {
    if src.len() > PAGE_SIZE {
        panic!("uvm_first: more than a page");
    }
    let frame = m.alloc_frame().expect("uvm_first: out of memory");
    let mut buf = [0u8; PAGE_SIZE];
    buf[..src.len()].copy_from_slice(src);
    m.write_frame(frame, &buf);
    p.page_table
        .map(m, 0, frame, USER_RWX)
        .expect("uvm_first: out of memory");
    p.size = PAGE_SIZE as u64;
}

// ============================================================================
// Fault and scheduler hooks
// ============================================================================

/// Service a page fault at `fault_va`
///
/// Succeeds only for a paged-out PTE, which is swapped back in. Anything
/// else is the caller's problem (a genuine access violation).
pub fn handle_page_fault<M: Machine>(p: &mut Process, m: &M, fault_va: u64) -> VmResult<()> {
    if fault_va >= MAXVA || !p.pageable() {
        return Err(VmError::BadAddress);
    }
    let va = page_round_down(fault_va);
    let slot = p
        .page_table
        .walk(m, va, false)
        .ok_or(VmError::BadAddress)?;
    let pte = Pte::from_raw(m.read_pte(slot));
    if !pte.is_paged_out() {
        return Err(VmError::BadAddress);
    }
    swap_in(p, m, va);
    Ok(())
}

/// Advance the aging shift registers, called before each switch to `p`
///
/// Every resident page's counter shifts right once; a set accessed bit
/// credits bit 31 and is cleared in the same step, so one access is never
/// counted twice.
pub fn age_tick<M: Machine>(p: &mut Process, m: &M) {
    if !p.pageable() || !p.policy.uses_aging() {
        return;
    }
    for page in 0..MAX_TOTAL_PAGES {
        if !p.state.meta[page].in_use {
            continue;
        }
        let va = (page as u64) << PAGE_SHIFT;
        let slot = p
            .page_table
            .walk(m, va, false)
            .expect("age_tick: resident page not mapped");
        let pte = Pte::from_raw(m.read_pte(slot));
        let meta = &mut p.state.meta[page];
        meta.aging >>= 1;
        if pte.flags().contains(PteFlags::ACCESSED) {
            meta.aging |= 1 << 31;
            m.write_pte(slot, Pte::new(pte.addr(), pte.flags() - PteFlags::ACCESSED).raw());
        }
    }
}

// ============================================================================
// User copies
// ============================================================================

/// Find the PTE slot for a user page, faulting it in if it is on disk
///
/// Models the hardware access path: sets the accessed bit, and the dirty
/// bit for stores.
fn user_page_slot<M: Machine>(p: &mut Process, m: &M, base: u64, store: bool) -> VmResult<u64> {
    let slot = p
        .page_table
        .walk(m, base, false)
        .ok_or(VmError::BadAddress)?;
    let mut pte = Pte::from_raw(m.read_pte(slot));
    if pte.is_paged_out() {
        swap_in(p, m, base);
        pte = Pte::from_raw(m.read_pte(slot));
    }
    if !pte.is_valid() || !pte.flags().contains(PteFlags::USER) {
        return Err(VmError::BadAddress);
    }
    let mut flags = pte.flags() | PteFlags::ACCESSED;
    if store {
        flags |= PteFlags::DIRTY;
    }
    m.write_pte(slot, Pte::new(pte.addr(), flags).raw());
    Ok(slot)
}

/// Copy `src` into the process's address space at `dst_va`
pub fn copy_out<M: Machine>(p: &mut Process, m: &M, dst_va: u64, src: &[u8]) -> VmResult<()> {
    let mut va = dst_va;
    let mut done = 0;
    while done < src.len() {
        let base = page_round_down(va);
        let slot = user_page_slot(p, m, base, true)?;
        let pa = Pte::from_raw(m.read_pte(slot)).addr();

        let off = (va - base) as usize;
        let n = (PAGE_SIZE - off).min(src.len() - done);
        let mut buf = [0u8; PAGE_SIZE];
        m.read_frame(pa, &mut buf);
        buf[off..off + n].copy_from_slice(&src[done..done + n]);
        m.write_frame(pa, &buf);

        done += n;
        va = base + PAGE_SIZE as u64;
    }
    Ok(())
}

/// Copy from the process's address space at `src_va` into `buf`
pub fn copy_in<M: Machine>(p: &mut Process, m: &M, buf: &mut [u8], src_va: u64) -> VmResult<()> {
    let mut va = src_va;
    let mut done = 0;
    while done < buf.len() {
        let base = page_round_down(va);
        let slot = user_page_slot(p, m, base, false)?;
        let pa = Pte::from_raw(m.read_pte(slot)).addr();

        let off = (va - base) as usize;
        let n = (PAGE_SIZE - off).min(buf.len() - done);
        let mut page = [0u8; PAGE_SIZE];
        m.read_frame(pa, &mut page);
        buf[done..done + n].copy_from_slice(&page[off..off + n]);

        done += n;
        va = base + PAGE_SIZE as u64;
    }
    Ok(())
}
