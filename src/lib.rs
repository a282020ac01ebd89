//! A lock-free, split-ordered bucket list.
//!
//! [`BucketList`] is a sorted singly linked list whose keys are bit-reversed
//! hashes. Bucket anchors ([`BucketList::get_anchor`]) can be spliced in at
//! any time without moving existing entries, which makes the list the
//! shared backbone of an extensible lock-free hash set.
//!
//! Nodes live in an index-addressed arena; every link is a single
//! `AtomicU64` packing `(index, marked, sealed, version)`. Unlinked nodes are
//! recycled through epoch-based reclamation.
//!
//! ```
//! use split_list::BucketList;
//!
//! let list = BucketList::new();
//! assert!(list.add("apple"));
//! assert!(!list.add("apple"));
//!
//! let bucket = list.get_anchor(1).unwrap();
//! assert!(bucket.contains(&"apple"));
//! assert!(list.remove(&"apple"));
//! assert!(list.iter().is_err());
//! ```

use once_cell::sync::Lazy;

pub mod bucket_list;
pub mod config;
pub mod epoch_manager;
pub mod error;
pub mod key;
pub mod markable;
pub mod node;
pub mod node_allocator;

pub use bucket_list::{BucketList, BucketSet};
pub use config::Config;
pub use error::BucketListError;

/// Alignment for cache lines (typically 64 bytes on modern CPUs)
pub(crate) static CACHE_LINE_SIZE: Lazy<usize> = Lazy::new(|| {
    // Try data cache first (most relevant for our use case)
    cache_size::cache_line_size(1, cache_size::CacheType::Data)
        // Fall back to unified cache if data cache info isn't available
        .or_else(|| cache_size::cache_line_size(1, cache_size::CacheType::Unified))
        // Try L2 cache if L1 isn't available
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Data))
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Unified))
        // Default to 64 bytes if all detection fails
        .unwrap_or(64)
});
