use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering, fence};

use thread_local::ThreadLocal;

use crate::node::{Node, NodeId};
use crate::node_allocator::NodeArena;

// A local state of 0 means "not pinned"; otherwise it is (epoch << 1) | 1.
const INACTIVE: usize = 0;

// Global epoch counter
struct GlobalEpoch {
    epoch: AtomicUsize,
}

// Thread-local epoch tracker
struct LocalEpoch {
    state: AtomicUsize,
    // Nesting depth of guards on the owning thread.
    depth: AtomicUsize,
}

impl LocalEpoch {
    fn new() -> Self {
        LocalEpoch {
            state: AtomicUsize::new(INACTIVE),
            depth: AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    fn is_active(&self) -> bool {
        self.state.load(Ordering::Relaxed) != INACTIVE
    }

    fn epoch(&self) -> usize {
        self.state.load(Ordering::Relaxed) >> 1
    }
}

// Garbage collection entry
struct GarbageEntry {
    node: NodeId,
    epoch_deleted: usize,
}

// Thread-local garbage collection list
#[derive(Default)]
struct GarbageList {
    entries: Vec<GarbageEntry>,
}

impl GarbageList {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Epoch-based reclamation manager owning the node arena.
///
/// A node unlinked at global epoch `e` goes back to the arena once the
/// global epoch reaches `e + 2`. The global epoch only advances when every
/// pinned thread has observed the current one, so no thread that could still
/// hold the node's id is left by then.
pub struct EpochManager<T> {
    global: GlobalEpoch,
    locals: ThreadLocal<LocalEpoch>,
    garbage: ThreadLocal<RefCell<GarbageList>>,
    arena: NodeArena<T>,
    retire_threshold: usize,
}

unsafe impl<T: Send> Send for EpochManager<T> {}
unsafe impl<T: Send + Sync> Sync for EpochManager<T> {}

impl<T> Default for EpochManager<T> {
    fn default() -> Self {
        EpochManager::new(NodeArena::new(), crate::config::DEFAULT_RETIRE_THRESHOLD)
    }
}

impl<T> EpochManager<T> {
    pub fn new(arena: NodeArena<T>, retire_threshold: usize) -> Self {
        EpochManager {
            global: GlobalEpoch {
                epoch: AtomicUsize::new(0),
            },
            locals: ThreadLocal::new(),
            garbage: ThreadLocal::new(),
            arena,
            retire_threshold: retire_threshold.max(1),
        }
    }

    pub fn global_epoch(&self) -> usize {
        self.global.epoch.load(Ordering::Acquire)
    }

    fn local(&self) -> &LocalEpoch {
        self.locals.get_or(LocalEpoch::new)
    }

    /// Enter a critical section. Node ids read while the guard lives stay
    /// valid until it is dropped. Guards nest.
    pub fn pin(&self) -> Guard<'_, T> {
        let local = self.local();
        if local.depth.fetch_add(1, Ordering::Relaxed) == 0 {
            let epoch = self.global.epoch.load(Ordering::Relaxed);
            local.state.store((epoch << 1) | 1, Ordering::Relaxed);
            fence(Ordering::SeqCst);
        }
        Guard {
            manager: self,
            local,
            _not_send: PhantomData,
        }
    }

    // Exit a critical section
    fn unpin(&self, local: &LocalEpoch) {
        if local.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            local.state.store(INACTIVE, Ordering::Release);
        }
    }

    /// Try to advance the global epoch. Fails while some pinned thread has
    /// not yet observed the current epoch.
    pub fn try_advance(&self) -> bool {
        let current_epoch = self.global.epoch.load(Ordering::Relaxed);
        fence(Ordering::SeqCst);

        for local in self.locals.iter() {
            let state = local.state.load(Ordering::Relaxed);
            if state != INACTIVE && state >> 1 != current_epoch {
                return false;
            }
        }
        fence(Ordering::Acquire);

        self.global
            .epoch
            .compare_exchange(
                current_epoch,
                current_epoch + 1,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    #[inline]
    pub fn node(&self, id: NodeId, _guard: &Guard<'_, T>) -> &Node<T> {
        self.arena.get(id)
    }

    pub(crate) fn arena(&self) -> &NodeArena<T> {
        &self.arena
    }

    pub(crate) fn allocate_node(&self, key: u32, payload: Option<T>) -> NodeId {
        self.arena.allocate(key, payload)
    }

    /// Returns a node that was never published straight to the arena.
    pub(crate) fn free_unpublished(&self, id: NodeId) {
        // SAFETY: no other thread ever saw the id.
        unsafe { self.arena.deallocate(id) }
    }

    /// Add an unlinked node to this thread's garbage list for later
    /// collection.
    pub(crate) fn defer_free(&self, node: NodeId, _guard: &Guard<'_, T>) {
        let garbage = self.garbage.get_or(Default::default);
        let size = {
            let mut list = garbage.borrow_mut();
            list.entries.push(GarbageEntry {
                node,
                epoch_deleted: self.global.epoch.load(Ordering::SeqCst),
            });
            list.len()
        };

        // Try to collect garbage if we've accumulated enough
        if size >= self.retire_threshold {
            self.try_advance();
            self.collect();
        }
    }

    /// Reclaims every entry of this thread's garbage list that no pinned
    /// thread can still observe. Returns the number of reclaimed nodes.
    pub fn collect(&self) -> usize {
        let Some(garbage) = self.garbage.get() else {
            return 0;
        };
        let current_epoch = self.global.epoch.load(Ordering::Acquire);

        // Detach the expired entries before dropping any payload: a payload
        // destructor may retire nodes on this thread again.
        let (expired, pending): (Vec<_>, Vec<_>) = {
            let mut list = garbage.borrow_mut();
            std::mem::take(&mut list.entries)
                .into_iter()
                .partition(|entry| entry.epoch_deleted + 2 <= current_epoch)
        };
        garbage.borrow_mut().entries.extend(pending);

        for entry in &expired {
            // SAFETY: two epoch advances since the unlink prove that no
            // thread still holds this id.
            unsafe { self.arena.deallocate(entry.node) };
        }

        let reclaimed = expired.len();
        if reclaimed > 0 {
            log::debug!(
                "epoch {}: reclaimed {} nodes, {} still pending",
                current_epoch,
                reclaimed,
                self.pending()
            );
        }
        reclaimed
    }

    /// Number of nodes waiting in this thread's garbage list.
    pub fn pending(&self) -> usize {
        self.garbage.get().map_or(0, |g| g.borrow().len())
    }
}

/// Keeps the owning thread pinned in the current epoch.
///
/// A guard unpins the thread that created it, so it must not leave that
/// thread:
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<split_list::epoch_manager::Guard<'static, u64>>();
/// ```
pub struct Guard<'a, T> {
    manager: &'a EpochManager<T>,
    local: &'a LocalEpoch,
    _not_send: PhantomData<*const ()>,
}

impl<T> Guard<'_, T> {
    pub fn epoch(&self) -> usize {
        self.local.epoch()
    }
}

impl<T> Drop for Guard<'_, T> {
    fn drop(&mut self) {
        self.manager.unpin(self.local);
    }
}
