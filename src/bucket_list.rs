use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crate::config::Config;
use crate::epoch_manager::{EpochManager, Guard};
use crate::error::BucketListError;
use crate::key;
use crate::markable::Link;
use crate::node::{Node, NodeId};
use crate::node_allocator::NodeArena;

/// Capability contract consumed by an extensible hash set: a set that can
/// hand out bucket-relative views of itself.
pub trait BucketSet<T>: Sized {
    /// Inserts `item`. Returns `false` if an entry with the same key is
    /// already present.
    fn add(&self, item: T) -> bool;

    /// Logically deletes the entry with `item`'s key. Returns `false` if
    /// none is present.
    fn remove(&self, item: &T) -> bool;

    fn contains(&self, item: &T) -> bool;

    /// Returns a view whose operations start at the anchor of
    /// `bucket_index`, creating the anchor if needed.
    fn get_anchor(&self, bucket_index: u32) -> Result<Self, BucketListError>;

    /// Always fails: consistent iteration over a concurrently mutating
    /// lock-free list is not offered.
    fn iter(&self) -> Result<std::iter::Empty<&T>, BucketListError>;
}

struct Shared<T, S> {
    epochs: EpochManager<T>,
    head: NodeId,
    hasher: S,
}

// Result of a traversal: `pred.key < key <= curr.key`, and `link` is the
// snapshot of `pred.next` that was observed pointing at `curr`.
#[derive(Clone, Copy, Debug)]
struct Window {
    pred: NodeId,
    curr: NodeId,
    link: Link,
}

/// A lock-free, split-ordered, singly linked list.
///
/// Data entries are ordered by the bit-reversed restricted hash of the
/// element; bucket anchors by the bit-reversed bucket index. Cloning (and
/// [`get_anchor`](BucketSet::get_anchor)) produces handles over the same
/// nodes.
pub struct BucketList<T, S = RandomState> {
    shared: Arc<Shared<T, S>>,
    entry: NodeId,
    entry_key: u32,
}

impl<T, S> Clone for BucketList<T, S> {
    fn clone(&self) -> Self {
        BucketList {
            shared: Arc::clone(&self.shared),
            entry: self.entry,
            entry_key: self.entry_key,
        }
    }
}

impl<T, S> fmt::Debug for BucketList<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketList")
            .field("entry", &self.entry)
            .field("entry_key", &format_args!("{:#08x}", self.entry_key))
            .finish()
    }
}

impl<T: Hash> Default for BucketList<T> {
    fn default() -> Self {
        BucketList::new()
    }
}

impl<T: Hash> BucketList<T> {
    pub fn new() -> Self {
        BucketList::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        BucketList::with_hasher_and_config(RandomState::new(), config)
    }
}

impl<T: Hash, S: BuildHasher> BucketList<T, S> {
    pub fn with_hasher(hasher: S) -> Self {
        BucketList::with_hasher_and_config(hasher, Config::default())
    }

    /// Creates an empty list holding only the head and tail anchors.
    pub fn with_hasher_and_config(hasher: S, config: Config) -> Self {
        let epochs = EpochManager::new(
            NodeArena::with_reserve(config.reserve),
            config.retire_threshold,
        );
        let tail = epochs.allocate_node(key::TAIL_KEY, None);
        let head = epochs.allocate_node(key::HEAD_KEY, None);
        epochs.arena().get(head).next.set(Link::new(tail, 0));

        BucketList {
            shared: Arc::new(Shared {
                epochs,
                head,
                hasher,
            }),
            entry: head,
            entry_key: key::HEAD_KEY,
        }
    }

    /// Key of the node this handle starts its traversals at: 0 for the
    /// root list, the anchor key for a bucket view.
    pub fn entry_key(&self) -> u32 {
        self.entry_key
    }

    /// The element's hash restricted to 24 bits, as used for ordering.
    /// Callers map it to a bucket index.
    pub fn restricted_hash_of(&self, item: &T) -> u32 {
        key::restricted_hash(self.shared.hasher.hash_one(item))
    }

    /// Advances the epoch if possible and reclaims this thread's unlinked
    /// nodes that no other thread can observe any more. Returns the number
    /// of reclaimed nodes.
    pub fn reclaim(&self) -> usize {
        self.shared.epochs.try_advance();
        self.shared.epochs.collect()
    }

    fn regular_key(&self, item: &T) -> u32 {
        key::regular_key(self.shared.hasher.hash_one(item))
    }

    /// Inserts `item` unless an entry with the same key is present.
    ///
    /// Two elements whose restricted hashes are equal share a key and are
    /// indistinguishable here: the second `add` returns `false`.
    ///
    /// # Panics
    ///
    /// Panics if the node arena runs out of `u32` indices.
    pub fn add(&self, item: T) -> bool {
        let key = self.regular_key(&item);
        let guard = self.shared.epochs.pin();
        let start = self.start_for(key);
        let mut item = Some(item);
        let mut prepared: Option<NodeId> = None;

        loop {
            let window = self.find(start, key, &guard);
            if self.node(window.curr, &guard).key() == key {
                if let Some(id) = prepared {
                    self.shared.epochs.free_unpublished(id);
                }
                return false;
            }

            let id = *prepared
                .get_or_insert_with(|| self.shared.epochs.allocate_node(key, item.take()));
            self.node(id, &guard)
                .next
                .set(Link::new(window.curr, window.link.version));

            if self
                .node(window.pred, &guard)
                .next
                .compare_and_set(window.link, window.link.bumped(id))
            {
                return true;
            }
        }
    }

    /// Logically deletes the entry with `item`'s key. The node is unlinked
    /// by a later traversal and reclaimed once no thread can observe it.
    pub fn remove(&self, item: &T) -> bool {
        let key = self.regular_key(item);
        let guard = self.shared.epochs.pin();
        let start = self.start_for(key);

        loop {
            let window = self.find(start, key, &guard);
            if self.node(window.curr, &guard).key() != key {
                return false;
            }
            if self
                .node(window.pred, &guard)
                .next
                .mark_if_reference_unchanged(window.curr)
            {
                return true;
            }
        }
    }

    /// Read-only membership test. Walks the successor links once without
    /// helping or restarting; marked and sealed links are simply followed,
    /// which is sound because the guard keeps every visited node alive.
    pub fn contains(&self, item: &T) -> bool {
        let key = self.regular_key(item);
        let guard = self.shared.epochs.pin();
        let mut link = self.node(self.start_for(key), &guard).next.read();
        while self.node(link.node, &guard).key() < key {
            link = self.node(link.node, &guard).next.read();
        }
        self.node(link.node, &guard).key() == key && !link.marked
    }

    /// Returns a view anchored at bucket `bucket_index`, splicing in the
    /// anchor if it does not exist yet. Concurrent callers for the same
    /// index converge on the same anchor node.
    pub fn get_anchor(&self, bucket_index: u32) -> Result<Self, BucketListError> {
        let key = key::anchor_key(bucket_index)?;
        let head = self.shared.head;
        if key == key::HEAD_KEY {
            return Ok(self.view(head, key));
        }

        let guard = self.shared.epochs.pin();
        let mut prepared: Option<NodeId> = None;

        loop {
            let window = self.find(head, key, &guard);
            if self.node(window.curr, &guard).key() == key {
                if let Some(id) = prepared {
                    self.shared.epochs.free_unpublished(id);
                }
                return Ok(self.view(window.curr, key));
            }

            let id = *prepared.get_or_insert_with(|| self.shared.epochs.allocate_node(key, None));
            self.node(id, &guard)
                .next
                .set(Link::new(window.curr, window.link.version.wrapping_add(1)));

            if self
                .node(window.pred, &guard)
                .next
                .compare_and_set(window.link, window.link.bumped(id))
            {
                log::debug!("spliced anchor for bucket {} (key {:#08x})", bucket_index, key);
                return Ok(self.view(id, key));
            }
        }
    }

    /// Always fails with [`BucketListError::Unsupported`].
    pub fn iter(&self) -> Result<std::iter::Empty<&T>, BucketListError> {
        Err(BucketListError::Unsupported { operation: "iter" })
    }

    fn view(&self, entry: NodeId, entry_key: u32) -> Self {
        BucketList {
            shared: Arc::clone(&self.shared),
            entry,
            entry_key,
        }
    }

    // A key that sorts before this view's anchor cannot be reached from it.
    #[inline]
    fn start_for(&self, key: u32) -> NodeId {
        if key > self.entry_key {
            self.entry
        } else {
            log::trace!(
                "key {:#08x} precedes anchor {:#08x}, starting from head",
                key,
                self.entry_key
            );
            self.shared.head
        }
    }

    #[inline]
    fn node(&self, id: NodeId, guard: &Guard<'_, T>) -> &Node<T> {
        self.shared.epochs.node(id, guard)
    }

    /// Walks from `start` to the first node whose key is `>= key`, helping
    /// unlink every marked node on the way. `start` must be an anchor with a
    /// key below `key`.
    fn find(&self, start: NodeId, key: u32, guard: &Guard<'_, T>) -> Window {
        'retry: loop {
            let mut pred = start;
            let Some(mut link) = self.get_next(pred, guard) else {
                continue 'retry;
            };

            while self.node(link.node, guard).key() < key {
                pred = link.node;
                match self.get_next(pred, guard) {
                    Some(next) => link = next,
                    None => continue 'retry,
                }
            }

            return Window {
                pred,
                curr: link.node,
                link,
            };
        }
    }

    /// Returns `node`'s outgoing link once it points at a live successor,
    /// splicing out marked successors first. `None` means `node` itself is
    /// being deleted (its link is sealed) and the caller must re-traverse.
    fn get_next(&self, node: NodeId, guard: &Guard<'_, T>) -> Option<Link> {
        let next = &self.node(node, guard).next;
        let mut link = next.read();

        loop {
            if link.sealed {
                return None;
            }
            if !link.marked {
                return Some(link);
            }

            // Freeze the victim's own link first so nothing can be inserted
            // behind it after we read its successor.
            let victim = link.node;
            let succ = self.node(victim, guard).next.seal();
            let replacement = Link {
                node: succ.node,
                marked: succ.marked,
                sealed: false,
                version: succ.version,
            };

            if next.compare_and_set(link, replacement) {
                log::trace!(
                    "unlinked node {:?} (key {:#08x})",
                    victim,
                    self.node(victim, guard).key()
                );
                self.shared.epochs.defer_free(victim, guard);
            }
            link = next.read();
        }
    }
}

impl<T: Hash, S: BuildHasher> BucketSet<T> for BucketList<T, S> {
    fn add(&self, item: T) -> bool {
        BucketList::add(self, item)
    }

    fn remove(&self, item: &T) -> bool {
        BucketList::remove(self, item)
    }

    fn contains(&self, item: &T) -> bool {
        BucketList::contains(self, item)
    }

    fn get_anchor(&self, bucket_index: u32) -> Result<Self, BucketListError> {
        BucketList::get_anchor(self, bucket_index)
    }

    fn iter(&self) -> Result<std::iter::Empty<&T>, BucketListError> {
        BucketList::iter(self)
    }
}
