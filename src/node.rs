use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::markable::{Link, MarkableReference};

/// Stable index of a node slot in the arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const NIL: NodeId = NodeId(u32::MAX);

    #[inline]
    pub(crate) fn from_index(index: u32) -> Self {
        NodeId(index)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "NodeId(nil)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

// One list cell. Slots are recycled by the arena, so `key` and `payload` are
// only written while the slot is exclusively owned (before publish, or after
// reclamation).
#[repr(C, align(64))] // Align to cache line boundaries
pub struct Node<T> {
    pub(crate) key: AtomicU32,
    pub(crate) next: MarkableReference,
    // Free-list successor while the slot sits in the arena's free list.
    pub(crate) free_next: AtomicU32,
    pub(crate) payload: UnsafeCell<Option<T>>,
}

impl<T> Node<T> {
    pub(crate) fn vacant() -> Self {
        Node {
            key: AtomicU32::new(0),
            next: MarkableReference::new(Link::new(NodeId::NIL, 0)),
            free_next: AtomicU32::new(u32::MAX),
            payload: UnsafeCell::new(None),
        }
    }

    #[inline]
    pub fn key(&self) -> u32 {
        self.key.load(Ordering::Relaxed)
    }

    /// Anchors carry no payload.
    #[inline]
    pub fn is_anchor(&self) -> bool {
        // SAFETY: the payload is never written while the node is reachable.
        unsafe { (*self.payload.get()).is_none() }
    }
}
