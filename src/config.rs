/// Retired nodes a thread accumulates before it tries to advance the epoch
/// and reclaim.
pub const DEFAULT_RETIRE_THRESHOLD: usize = 128;

/// Tuning knobs for a [`BucketList`](crate::bucket_list::BucketList).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Size of a thread's garbage list that triggers a collection pass.
    pub retire_threshold: usize,
    /// Node slots to pre-allocate at construction. The arena grows on
    /// demand either way.
    pub reserve: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            retire_threshold: DEFAULT_RETIRE_THRESHOLD,
            reserve: 0,
        }
    }
}

impl Config {
    pub fn retire_threshold(mut self, retire_threshold: usize) -> Self {
        self.retire_threshold = retire_threshold;
        self
    }

    pub fn reserve(mut self, reserve: usize) -> Self {
        self.reserve = reserve;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let config = Config::default();
        assert_eq!(config.retire_threshold, DEFAULT_RETIRE_THRESHOLD);
        assert_eq!(config.reserve, 0);

        let config = Config::default().retire_threshold(4).reserve(1024);
        assert_eq!(config.retire_threshold, 4);
        assert_eq!(config.reserve, 1024);
    }
}
