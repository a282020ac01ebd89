//! Atomically updatable `(node, tag)` link packed into one word.
//!
//! Bit layout of the packed `u64`:
//!
//! ```text
//!   0..32  node index (u32::MAX = nil)
//!   32     marked  - the referenced node is logically deleted
//!   33     sealed  - the node owning this link is logically deleted and the
//!                    link is frozen; no further CAS against it may succeed
//!   34..64 version - bumped on every successful non-deleting update
//! ```
//!
//! Keeping the deletion mark apart from the version counter means a
//! wrapping counter can never be mistaken for a deletion.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::node::NodeId;

const INDEX_MASK: u64 = 0xFFFF_FFFF;
const MARKED_BIT: u64 = 1 << 32;
const SEALED_BIT: u64 = 1 << 33;
const VERSION_SHIFT: u32 = 34;
const VERSION_MASK: u32 = (1 << (64 - VERSION_SHIFT)) - 1;

/// Snapshot of a [`MarkableReference`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Link {
    pub node: NodeId,
    pub marked: bool,
    pub sealed: bool,
    pub version: u32,
}

impl Link {
    /// An unmarked, unsealed link to `node` at `version`.
    #[inline]
    pub fn new(node: NodeId, version: u32) -> Self {
        Link {
            node,
            marked: false,
            sealed: false,
            version: version & VERSION_MASK,
        }
    }

    /// The same link with the version advanced by one (wrapping).
    #[inline]
    pub fn bumped(self, node: NodeId) -> Self {
        Link::new(node, self.version.wrapping_add(1))
    }

    #[inline]
    fn pack(self) -> u64 {
        let mut word = self.node.index() as u64 & INDEX_MASK;
        if self.marked {
            word |= MARKED_BIT;
        }
        if self.sealed {
            word |= SEALED_BIT;
        }
        word | ((self.version & VERSION_MASK) as u64) << VERSION_SHIFT
    }

    #[inline]
    fn unpack(word: u64) -> Self {
        Link {
            node: NodeId::from_index((word & INDEX_MASK) as u32),
            marked: word & MARKED_BIT != 0,
            sealed: word & SEALED_BIT != 0,
            version: (word >> VERSION_SHIFT) as u32 & VERSION_MASK,
        }
    }
}

/// A successor link that can be read, swapped and marked atomically.
pub struct MarkableReference {
    word: AtomicU64,
}

impl MarkableReference {
    pub fn new(link: Link) -> Self {
        MarkableReference {
            word: AtomicU64::new(link.pack()),
        }
    }

    /// Atomic snapshot of every field.
    #[inline]
    pub fn read(&self) -> Link {
        Link::unpack(self.word.load(Ordering::Acquire))
    }

    /// Unconditional store. Only valid while the owning node is unpublished
    /// or exclusively owned by the allocator.
    #[inline]
    pub fn set(&self, link: Link) {
        self.word.store(link.pack(), Ordering::Release);
    }

    /// Replaces the link with `new` iff it still equals `expected` in every
    /// field.
    #[inline]
    pub fn compare_and_set(&self, expected: Link, new: Link) -> bool {
        self.word
            .compare_exchange(
                expected.pack(),
                new.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Sets the deletion mark iff the link still references `expected`,
    /// whatever its version. Fails if the reference moved, if the link is
    /// already marked (someone else deleted that node) or if the link is
    /// sealed.
    pub fn mark_if_reference_unchanged(&self, expected: NodeId) -> bool {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let link = Link::unpack(current);
            if link.node != expected || link.marked || link.sealed {
                return false;
            }
            match self.word.compare_exchange_weak(
                current,
                current | MARKED_BIT,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Freezes the link and returns the frozen snapshot. Idempotent.
    #[inline]
    pub fn seal(&self) -> Link {
        Link::unpack(self.word.fetch_or(SEALED_BIT, Ordering::AcqRel) | SEALED_BIT)
    }
}
