//! Per-process paging state
//!
//! This module implements:
//! - PageMeta: per-page residency, swap offset, and aging history
//! - ResidentQueue: FIFO ordering of resident page indices (consulted by
//!   the second-chance policy, maintained under every paging policy)
//! - PagingState: the aggregate carried by each process
//!
//! A page slot is always in exactly one of three states: unallocated
//! (`!in_use`, `offset == -1`), resident (`in_use`, `offset == -1`), or
//! on disk (`!in_use`, `offset >= 0`).

use crate::MAX_TOTAL_PAGES;

/// Per-page paging metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    /// The page is resident in a physical frame
    pub in_use: bool,
    /// Byte offset of the page in the swap file, or -1 if not on disk
    pub offset: i64,
    /// Aging shift register: bit 31 set on access, shifted right each tick
    pub aging: u32,
}

impl PageMeta {
    pub const fn new() -> Self {
        Self {
            in_use: false,
            offset: -1,
            aging: 0,
        }
    }
}

impl Default for PageMeta {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Resident queue
// ============================================================================

/// Fixed-capacity circular queue of resident page indices
///
/// Overflow and underflow are programming bugs: the residency cap keeps the
/// population strictly below capacity, so both panic.
#[derive(Debug, Clone)]
pub struct ResidentQueue {
    pages: [usize; MAX_TOTAL_PAGES],
    head: usize,
    num_pages: usize,
}

impl ResidentQueue {
    pub const fn new() -> Self {
        Self {
            pages: [0; MAX_TOTAL_PAGES],
            head: 0,
            num_pages: 0,
        }
    }

    /// Number of queued page indices
    #[inline]
    pub fn len(&self) -> usize {
        self.num_pages
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_pages == 0
    }

    /// Append a page index at the tail
    pub fn enqueue(&mut self, page: usize) {
        if self.num_pages == MAX_TOTAL_PAGES {
            panic!("resident queue overflow");
        }
        let tail = (self.head + self.num_pages) % MAX_TOTAL_PAGES;
        self.pages[tail] = page;
        self.num_pages += 1;
    }

    /// Remove and return the page index at the head
    pub fn dequeue(&mut self) -> usize {
        if self.num_pages == 0 {
            panic!("resident queue underflow");
        }
        let page = self.pages[self.head];
        self.head = (self.head + 1) % MAX_TOTAL_PAGES;
        self.num_pages -= 1;
        page
    }

    /// Remove `page` from anywhere in the queue, preserving the relative
    /// order of the survivors
    ///
    /// One full rotation: every element is dequeued and re-enqueued except
    /// the target. Absent targets make this a no-op.
    pub fn remove(&mut self, page: usize) {
        for _ in 0..self.num_pages {
            let p = self.dequeue();
            if p != page {
                self.enqueue(p);
            }
        }
    }

    /// Check whether `page` is queued
    pub fn contains(&self, page: usize) -> bool {
        self.iter().any(|p| p == page)
    }

    /// Iterate the queued indices from head to tail
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_pages).map(move |i| self.pages[(self.head + i) % MAX_TOTAL_PAGES])
    }
}

impl Default for ResidentQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// The paging state carried by one process
#[derive(Debug, Clone)]
pub struct PagingState {
    /// One record per user page slot, indexed by `va / PAGE_SIZE`
    pub meta: [PageMeta; MAX_TOTAL_PAGES],
    /// Resident page indices in arrival order
    pub queue: ResidentQueue,
    /// Count of resident pages; equals the queue length and the number of
    /// set `in_use` flags
    pub pages_in_memory: usize,
}

impl PagingState {
    pub const fn new() -> Self {
        Self {
            meta: [PageMeta::new(); MAX_TOTAL_PAGES],
            queue: ResidentQueue::new(),
            pages_in_memory: 0,
        }
    }

    /// Record that `page` became resident with a fresh aging counter
    pub fn make_resident(&mut self, page: usize, aging: u32) {
        let meta = &mut self.meta[page];
        meta.in_use = true;
        meta.offset = -1;
        meta.aging = aging;
        self.queue.enqueue(page);
        self.pages_in_memory += 1;
    }

    /// Record that `page` was evicted to the swap file at `offset`
    ///
    /// The caller removes the page from the queue (the second-chance
    /// selector already has; the aging selectors have not).
    pub fn make_paged_out(&mut self, page: usize, offset: u64) {
        let meta = &mut self.meta[page];
        meta.in_use = false;
        meta.offset = offset as i64;
        self.pages_in_memory -= 1;
    }

    /// Reset `page` to the unallocated state after an unmap
    pub fn clear_resident(&mut self, page: usize) {
        let meta = &mut self.meta[page];
        meta.in_use = false;
        meta.offset = -1;
        self.pages_in_memory = self.pages_in_memory.saturating_sub(1);
        self.queue.remove(page);
    }
}

impl Default for PagingState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_fifo_order() {
        let mut q = ResidentQueue::new();
        q.enqueue(3);
        q.enqueue(7);
        q.enqueue(5);
        assert_eq!(q.len(), 3);
        assert_eq!(q.dequeue(), 3);
        assert_eq!(q.dequeue(), 7);
        assert_eq!(q.dequeue(), 5);
        assert!(q.is_empty());
    }

    #[test]
    fn test_queue_wraparound() {
        let mut q = ResidentQueue::new();
        // Drive head and tail all the way around the ring
        for round in 0..3 {
            for i in 0..MAX_TOTAL_PAGES {
                q.enqueue(round * 100 + i);
            }
            for i in 0..MAX_TOTAL_PAGES {
                assert_eq!(q.dequeue(), round * 100 + i);
            }
        }
    }

    #[test]
    fn test_queue_remove_preserves_order() {
        let mut q = ResidentQueue::new();
        for i in [4, 8, 15, 16, 23] {
            q.enqueue(i);
        }
        q.remove(15);
        let rest: alloc::vec::Vec<usize> = q.iter().collect();
        assert_eq!(rest, [4, 8, 16, 23]);
    }

    #[test]
    fn test_queue_remove_absent_is_noop() {
        let mut q = ResidentQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.remove(9);
        let rest: alloc::vec::Vec<usize> = q.iter().collect();
        assert_eq!(rest, [1, 2]);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_queue_overflow_panics() {
        let mut q = ResidentQueue::new();
        for i in 0..=MAX_TOTAL_PAGES {
            q.enqueue(i);
        }
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_queue_underflow_panics() {
        let mut q = ResidentQueue::new();
        q.dequeue();
    }

    #[test]
    fn test_state_resident_cycle() {
        let mut s = PagingState::new();
        s.make_resident(5, 0);
        assert!(s.meta[5].in_use);
        assert_eq!(s.meta[5].offset, -1);
        assert_eq!(s.pages_in_memory, 1);
        assert!(s.queue.contains(5));

        s.queue.remove(5);
        s.make_paged_out(5, 8192);
        assert!(!s.meta[5].in_use);
        assert_eq!(s.meta[5].offset, 8192);
        assert_eq!(s.pages_in_memory, 0);

        s.make_resident(5, 0);
        s.clear_resident(5);
        assert!(!s.meta[5].in_use);
        assert_eq!(s.meta[5].offset, -1);
        assert!(!s.queue.contains(5));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn remove_matches_retain(
                pages in proptest::collection::hash_set(0usize..MAX_TOTAL_PAGES, 1..MAX_TOTAL_PAGES),
                pick in any::<proptest::sample::Index>(),
            ) {
                let order: alloc::vec::Vec<usize> = pages.into_iter().collect();
                let target = order[pick.index(order.len())];

                let mut q = ResidentQueue::new();
                for &p in &order {
                    q.enqueue(p);
                }
                q.remove(target);

                let expected: alloc::vec::Vec<usize> =
                    order.iter().copied().filter(|&p| p != target).collect();
                let got: alloc::vec::Vec<usize> = q.iter().collect();
                prop_assert_eq!(got, expected);
            }
        }
    }
}
