use std::{
    alloc::{Layout, alloc, dealloc, handle_alloc_error},
    ptr,
    sync::atomic::{AtomicPtr, AtomicU64, Ordering},
};

use crate::{
    CACHE_LINE_SIZE,
    markable::Link,
    node::{Node, NodeId},
};

// Segment k holds FIRST_SEGMENT << k slots, so indices stay stable while
// the arena grows and the whole u32 index space (minus nil) is addressable.
const FIRST_SEGMENT_SHIFT: u32 = 6;
const FIRST_SEGMENT: u64 = 1 << FIRST_SEGMENT_SHIFT;
const MAX_SEGMENTS: usize = (u32::BITS - FIRST_SEGMENT_SHIFT) as usize;
const CAPACITY: u64 = FIRST_SEGMENT * ((1 << MAX_SEGMENTS) - 1);

const NIL: u32 = u32::MAX;

/// Slab of [`Node`] slots addressed by [`NodeId`].
///
/// Fresh slots come from a bump counter; recycled slots from a lock-free
/// free list whose head carries an ABA tag in its upper half.
pub struct NodeArena<T> {
    segments: [AtomicPtr<Node<T>>; MAX_SEGMENTS],
    bump: AtomicU64,
    free_head: AtomicU64,
}

unsafe impl<T: Send> Send for NodeArena<T> {}
unsafe impl<T: Send + Sync> Sync for NodeArena<T> {}

impl<T> Default for NodeArena<T> {
    fn default() -> Self {
        NodeArena::new()
    }
}

#[inline]
fn locate(index: u32) -> (usize, usize) {
    let biased = index as u64 + FIRST_SEGMENT;
    let segment = (63 - biased.leading_zeros() - FIRST_SEGMENT_SHIFT) as usize;
    let offset = (biased - (FIRST_SEGMENT << segment)) as usize;
    (segment, offset)
}

#[inline]
fn segment_len(segment: usize) -> usize {
    (FIRST_SEGMENT as usize) << segment
}

fn segment_layout<T>(segment: usize) -> Layout {
    let align = std::mem::align_of::<Node<T>>().max(*CACHE_LINE_SIZE);
    let size = std::mem::size_of::<Node<T>>() * segment_len(segment);
    // Round up to cache line size
    let aligned_size = (size + align - 1) & !(align - 1);
    match Layout::from_size_align(aligned_size, align) {
        Ok(layout) => layout,
        Err(_) => panic!("node arena segment {} does not fit in memory", segment),
    }
}

#[inline]
fn pack_free(index: u32, tag: u32) -> u64 {
    (tag as u64) << 32 | index as u64
}

#[inline]
fn unpack_free(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

impl<T> NodeArena<T> {
    pub fn new() -> Self {
        NodeArena {
            segments: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            bump: AtomicU64::new(0),
            free_head: AtomicU64::new(pack_free(NIL, 0)),
        }
    }

    /// Pre-allocates segments so that at least `slots` nodes fit without
    /// growing.
    pub fn with_reserve(slots: usize) -> Self {
        let arena = NodeArena::new();
        if slots > 0 {
            let last = (slots as u64 - 1).min(CAPACITY - 1) as u32;
            let (last_segment, _) = locate(last);
            for segment in 0..=last_segment {
                arena.segment(segment);
            }
        }
        arena
    }

    /// Number of slots ever handed out by the bump counter.
    pub fn high_water(&self) -> u64 {
        self.bump.load(Ordering::Relaxed)
    }

    /// Takes a slot and initializes it with `key` and `payload`. The slot's
    /// link is reset to nil; the caller links it before publishing.
    ///
    /// # Panics
    ///
    /// Panics if the `u32` index space is exhausted.
    pub(crate) fn allocate(&self, key: u32, payload: Option<T>) -> NodeId {
        let id = match self.pop_free() {
            Some(id) => id,
            None => self.bump_slot(),
        };

        let node = self.get(id);
        node.key.store(key, Ordering::Relaxed);
        node.next.set(Link::new(NodeId::NIL, node.next.read().version));
        // SAFETY: the slot is exclusively owned until it is published.
        unsafe { *node.payload.get() = payload };
        id
    }

    /// Drops the slot's payload and pushes it onto the free list.
    ///
    /// # Safety
    ///
    /// No other thread may still observe `id`: it was never published, or
    /// the epoch manager has proven every reader gone.
    pub(crate) unsafe fn deallocate(&self, id: NodeId) {
        let node = self.get(id);
        // SAFETY: exclusive ownership is guaranteed by the caller.
        let payload = unsafe { (*node.payload.get()).take() };
        drop(payload);

        let mut head = self.free_head.load(Ordering::Acquire);
        loop {
            let (top, tag) = unpack_free(head);
            node.free_next.store(top, Ordering::Relaxed);
            match self.free_head.compare_exchange_weak(
                head,
                pack_free(id.index(), tag.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Resolves an id to its slot.
    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &Node<T> {
        debug_assert!(!id.is_nil());
        let (segment, offset) = locate(id.index());
        let base = self.segments[segment].load(Ordering::Acquire);
        debug_assert!(!base.is_null());
        // SAFETY: ids are only handed out after their segment is installed,
        // and segments live as long as the arena.
        unsafe { &*base.add(offset) }
    }

    fn pop_free(&self) -> Option<NodeId> {
        let mut head = self.free_head.load(Ordering::Acquire);
        loop {
            let (top, tag) = unpack_free(head);
            if top == NIL {
                return None;
            }
            let next = self.get(NodeId::from_index(top)).free_next.load(Ordering::Relaxed);
            match self.free_head.compare_exchange_weak(
                head,
                pack_free(next, tag.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(NodeId::from_index(top)),
                Err(actual) => head = actual,
            }
        }
    }

    fn bump_slot(&self) -> NodeId {
        let index = self.bump.fetch_add(1, Ordering::Relaxed);
        if index >= CAPACITY {
            panic!("node arena exhausted: {} slots in use", CAPACITY);
        }
        let index = index as u32;
        let (segment, _) = locate(index);
        self.segment(segment);
        NodeId::from_index(index)
    }

    // Returns the base of `segment`, installing it if this is the first use.
    fn segment(&self, segment: usize) -> *mut Node<T> {
        let current = self.segments[segment].load(Ordering::Acquire);
        if !current.is_null() {
            return current;
        }

        let layout = segment_layout::<T>(segment);
        // SAFETY: the layout has a non-zero size.
        let fresh = unsafe { alloc(layout) as *mut Node<T> };
        if fresh.is_null() {
            handle_alloc_error(layout);
        }
        for i in 0..segment_len(segment) {
            // SAFETY: `i` is within the freshly allocated segment.
            unsafe { fresh.add(i).write(Node::vacant()) };
        }

        match self.segments[segment].compare_exchange(
            ptr::null_mut(),
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                log::debug!(
                    "node arena: installed segment {} ({} slots)",
                    segment,
                    segment_len(segment)
                );
                fresh
            }
            Err(installed) => {
                // Lost the race; the vacant nodes own nothing.
                unsafe { Self::free_segment(fresh, segment) };
                installed
            }
        }
    }

    unsafe fn free_segment(base: *mut Node<T>, segment: usize) {
        for i in 0..segment_len(segment) {
            // SAFETY: every slot of an installed segment was initialized.
            unsafe { ptr::drop_in_place(base.add(i)) };
        }
        unsafe { dealloc(base as *mut u8, segment_layout::<T>(segment)) };
    }
}

impl<T> Drop for NodeArena<T> {
    fn drop(&mut self) {
        for (segment, slot) in self.segments.iter_mut().enumerate() {
            let base = *slot.get_mut();
            if !base.is_null() {
                // SAFETY: `&mut self` proves no reader is left.
                unsafe { Self::free_segment(base, segment) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn locate_segments() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(63), (0, 63));
        assert_eq!(locate(64), (1, 0));
        assert_eq!(locate(191), (1, 127));
        assert_eq!(locate(192), (2, 0));
        assert_eq!(locate((CAPACITY - 1) as u32), (MAX_SEGMENTS - 1, segment_len(MAX_SEGMENTS - 1) - 1));
    }

    #[test]
    fn node_allocation() {
        let arena = NodeArena::<u64>::new();
        let a = arena.allocate(7, Some(70));
        let b = arena.allocate(9, None);

        assert_ne!(a, b);
        assert_eq!(arena.get(a).key(), 7);
        assert!(!arena.get(a).is_anchor());
        assert_eq!(arena.get(b).key(), 9);
        assert!(arena.get(b).is_anchor());
        assert!(arena.get(a).next.read().node.is_nil());
        assert_eq!(arena.high_water(), 2);
    }

    #[test]
    fn memory_alignment() {
        let arena = NodeArena::<u64>::new();
        for i in 0..200 {
            let id = arena.allocate(i, None);
            let addr = arena.get(id) as *const Node<u64> as usize;
            assert_eq!(addr % 64, 0);
        }
    }

    #[test]
    fn freed_slots_are_reused() {
        let arena = NodeArena::<u64>::new();
        let a = arena.allocate(1, Some(1));
        unsafe { arena.deallocate(a) };

        let b = arena.allocate(2, Some(2));
        assert_eq!(a, b);
        assert_eq!(arena.get(b).key(), 2);
        assert_eq!(arena.high_water(), 1);
    }

    #[test]
    fn payloads_dropped_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let arena = NodeArena::new();
            let a = arena.allocate(1, Some(DropCounter(Arc::clone(&drops))));
            let _b = arena.allocate(2, Some(DropCounter(Arc::clone(&drops))));

            unsafe { arena.deallocate(a) };
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reserve_installs_segments() {
        let arena = NodeArena::<u64>::with_reserve(100);
        assert!(!arena.segments[0].load(Ordering::Relaxed).is_null());
        assert!(!arena.segments[1].load(Ordering::Relaxed).is_null());
        assert!(arena.segments[2].load(Ordering::Relaxed).is_null());
        assert_eq!(arena.high_water(), 0);
    }

    #[test]
    fn concurrent_allocation() {
        let arena = Arc::new(NodeArena::<u64>::new());
        let num_threads = 8;
        let per_thread = 500;

        let handles: Vec<_> = (0..num_threads)
            .map(|t| {
                let arena = Arc::clone(&arena);
                thread::spawn(move || {
                    let mut ids = Vec::new();
                    for i in 0..per_thread {
                        let id = arena.allocate(t * 1000 + i, Some(i as u64));
                        // Recycle every other slot to exercise the free list.
                        if i % 2 == 0 {
                            unsafe { arena.deallocate(id) };
                        } else {
                            ids.push(id);
                        }
                    }
                    ids
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "slot {:?} handed out twice", id);
            }
        }
        assert_eq!(seen.len(), (num_threads * per_thread / 2) as usize);
    }
}
