//! Split-ordered key derivation.
//!
//! Keys live in a 24-bit word. A data key is the bit-reversal of the
//! element's restricted hash with the top bit forced on, so it is always
//! odd. An anchor key is the bit-reversal of a bucket index whose top bit is
//! clear, so it is always even. Inserting a new anchor therefore lands
//! between existing data keys and never relabels them.

use crate::error::BucketListError;

/// Width of the key word in bits.
pub const WORD_SIZE: u32 = 24;
/// Mask selecting the 24-bit key domain.
pub const MASK: u32 = 0x00FF_FFFF;
/// Top bit of the key domain.
pub const HI_MASK: u32 = 0x0080_0000;

/// Key of the permanent head anchor (bucket 0).
pub const HEAD_KEY: u32 = 0;
/// Key of the permanent tail anchor. Sits above the 24-bit domain so it can
/// never collide with a data key.
pub const TAIL_KEY: u32 = u32::MAX;

/// Restricts a full hash value to the low 24 bits.
#[inline]
pub fn restricted_hash(hash: u64) -> u32 {
    (hash as u32) & MASK
}

/// Reverses the low 24 bits of `word`. Bits above the domain are dropped.
#[inline]
pub fn reverse_bits(word: u32) -> u32 {
    (word & MASK).reverse_bits() >> (u32::BITS - WORD_SIZE)
}

/// Key for a data entry with the given hash.
#[inline]
pub fn regular_key(hash: u64) -> u32 {
    reverse_bits(restricted_hash(hash) | HI_MASK)
}

/// Key for the anchor of bucket `index`.
pub fn anchor_key(index: u32) -> Result<u32, BucketListError> {
    if index >= HI_MASK {
        return Err(BucketListError::BucketIndexOutOfRange { index });
    }
    Ok(reverse_bits(index))
}
