//! Page replacement policies
//!
//! Three selectable victim-selection algorithms plus a pass-through:
//!
//! - **NFUA** (not frequently used, aging): evict the resident page with the
//!   smallest aging counter.
//! - **LAPA** (least accessed page, aging): evict the page whose counter has
//!   the fewest 1-bits; fresh pages start all-ones so they are not evicted
//!   before building history.
//! - **SCFIFO** (second-chance FIFO): scan the resident queue in arrival
//!   order; a page with its accessed bit set gets the bit cleared and moves
//!   to the tail, the first page found with the bit clear is the victim.
//! - **None**: paging disabled; allocation always uses a fresh frame and no
//!   swap state is kept.

use crate::machine::Machine;
use crate::meta::PagingState;
use crate::page_table::PageTable;
use crate::pte::{Pte, PteFlags};
use crate::{MAX_TOTAL_PAGES, PAGE_SHIFT};

/// First page index the aging policies will evict
///
/// Indices 0-2 hold the initial process image (text, data, guard) and are
/// never paged by NFUA/LAPA. The second-chance scan is queue-driven and does
/// not treat them specially.
pub const RESERVED_PAGES: usize = 3;

/// Replacement policy, chosen per process at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Paging disabled
    None,
    /// Not frequently used, with aging
    Nfua,
    /// Least accessed page, with aging
    Lapa,
    /// Second-chance FIFO
    Scfifo,
}

impl Policy {
    /// Initial aging counter for a page that just became resident
    pub fn init_aging(&self) -> u32 {
        match self {
            // All-ones biases fresh pages against immediate eviction
            Policy::Lapa => u32::MAX,
            _ => 0,
        }
    }

    /// Check if the whole paging subsystem is disabled
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Policy::None)
    }

    /// Check if the scheduler tick should age counters under this policy
    #[inline]
    pub fn uses_aging(&self) -> bool {
        matches!(self, Policy::Nfua | Policy::Lapa)
    }

    /// Pick the page index to evict
    ///
    /// The second-chance selector dequeues the victim (and rotates pages it
    /// spares); the aging selectors leave the queue untouched.
    ///
    /// # Panics
    /// Panics if no page is eligible, or under `Policy::None` - eviction
    /// cannot be reached in either case unless the residency invariants are
    /// already broken.
    pub fn select_victim<M: Machine>(
        &self,
        state: &mut PagingState,
        pt: &PageTable,
        m: &M,
    ) -> usize {
        match self {
            Policy::None => panic!("select_victim: paging disabled"),
            Policy::Nfua => nfua_victim(state),
            Policy::Lapa => lapa_victim(state),
            Policy::Scfifo => scfifo_victim(state, pt, m),
        }
    }
}

/// Smallest aging counter wins; ties go to the lowest index
fn nfua_victim(state: &PagingState) -> usize {
    state
        .meta
        .iter()
        .enumerate()
        .skip(RESERVED_PAGES)
        .filter(|(_, pm)| pm.in_use)
        .min_by_key(|(_, pm)| pm.aging)
        .map(|(i, _)| i)
        .expect("nfua: no page eligible for eviction")
}

/// Fewest 1-bits wins; ties go to the smaller counter, then the lowest index
fn lapa_victim(state: &PagingState) -> usize {
    state
        .meta
        .iter()
        .enumerate()
        .skip(RESERVED_PAGES)
        .filter(|(_, pm)| pm.in_use)
        .min_by_key(|(_, pm)| (pm.aging.count_ones(), pm.aging))
        .map(|(i, _)| i)
        .expect("lapa: no page eligible for eviction")
}

/// Rotate the resident queue, sparing accessed pages once
fn scfifo_victim<M: Machine>(state: &mut PagingState, pt: &PageTable, m: &M) -> usize {
    for _ in 0..state.queue.len() {
        let page = state.queue.dequeue();
        let va = (page as u64) << PAGE_SHIFT;
        let slot = pt
            .walk(m, va, false)
            .expect("scfifo: resident page not mapped");
        let pte = Pte::from_raw(m.read_pte(slot));
        if pte.flags().contains(PteFlags::ACCESSED) {
            // Second chance: clear the bit and send it to the tail
            let flags = pte.flags() - PteFlags::ACCESSED;
            m.write_pte(slot, Pte::new(pte.addr(), flags).raw());
            state.queue.enqueue(page);
        } else {
            return page;
        }
    }
    // Every page had its accessed bit set; all bits are now clear and the
    // original head is back at the front.
    state.queue.dequeue()
}

const _: () = assert!(RESERVED_PAGES < MAX_TOTAL_PAGES);

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_aging(pages: &[(usize, u32)]) -> PagingState {
        let mut s = PagingState::new();
        for &(i, aging) in pages {
            s.make_resident(i, aging);
            s.meta[i].aging = aging;
        }
        s
    }

    #[test]
    fn test_nfua_picks_smallest_counter() {
        let s = state_with_aging(&[(3, 0x4000_0000), (4, 0x1000_0000), (5, 0x8000_0000)]);
        assert_eq!(nfua_victim(&s), 4);
    }

    #[test]
    fn test_nfua_tie_breaks_to_lowest_index() {
        let s = state_with_aging(&[(3, 7), (6, 7), (9, 7)]);
        assert_eq!(nfua_victim(&s), 3);
    }

    #[test]
    fn test_nfua_skips_reserved_indices() {
        let s = state_with_aging(&[(0, 0), (1, 0), (2, 0), (8, u32::MAX)]);
        assert_eq!(nfua_victim(&s), 8);
    }

    #[test]
    fn test_lapa_picks_fewest_ones() {
        // 0x0F has four 1-bits, 0x8000_0001 has two
        let s = state_with_aging(&[(3, 0x0F), (4, 0x8000_0001)]);
        assert_eq!(lapa_victim(&s), 4);
    }

    #[test]
    fn test_lapa_equal_ones_tie_breaks_to_smaller_value() {
        // Both have two 1-bits; 0x03 < 0x06
        let s = state_with_aging(&[(3, 0x06), (4, 0x03)]);
        assert_eq!(lapa_victim(&s), 4);
    }

    #[test]
    fn test_init_aging_values() {
        assert_eq!(Policy::Nfua.init_aging(), 0);
        assert_eq!(Policy::Lapa.init_aging(), u32::MAX);
        assert_eq!(Policy::Scfifo.init_aging(), 0);
        assert_eq!(Policy::None.init_aging(), 0);
    }

    #[test]
    #[should_panic(expected = "paging disabled")]
    fn test_none_policy_cannot_select() {
        use crate::machine::PhysMemory;
        let m = PhysMemory::new(4);
        let pt = PageTable::new(&m).unwrap();
        let mut s = PagingState::new();
        Policy::None.select_victim(&mut s, &pt, &m);
    }
}
