use std::fmt;

/// Errors reported by [`BucketList`](crate::bucket_list::BucketList).
///
/// Ordinary outcomes such as a duplicate `add` or an absent `remove` are
/// plain booleans and never show up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketListError {
    /// The operation is permanently unsupported by this structure.
    Unsupported { operation: &'static str },
    /// The bucket index sets the top bit of the 24-bit key domain (or a
    /// bit above it), which would alias data keys with anchor keys.
    BucketIndexOutOfRange { index: u32 },
}

impl fmt::Display for BucketListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketListError::Unsupported { operation } => {
                write!(f, "operation '{}' is not supported", operation)
            }
            BucketListError::BucketIndexOutOfRange { index } => {
                write!(
                    f,
                    "bucket index {:#x} is out of range (must be below {:#x})",
                    index,
                    crate::key::HI_MASK
                )
            }
        }
    }
}

impl std::error::Error for BucketListError {}
