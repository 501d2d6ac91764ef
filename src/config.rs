use crate::header::MIN_SPLIT_REMAINDER;

/// Default arena capacity, one page on most machines.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Heap settings, fixed for the lifetime of a [`crate::Heap`].
///
/// # Examples
///
/// ```rust
/// use worstfit::{Heap, HeapConfig};
///
/// // Only split when at least 64 bytes (prefix included) would be left over.
/// let config = HeapConfig::with_capacity(1024).min_split_remainder(64);
/// let heap = Heap::with_config(config).unwrap();
///
/// assert_eq!(heap.capacity(), 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Arena size in bytes, rounded down to 8 when the arena is mapped.
    pub capacity: usize,
    /// Minimum leftover, metadata prefix included, for a free chunk to be
    /// split on allocation. Smaller leftovers are handed out with the
    /// allocation instead of becoming unusable slivers.
    pub min_split_remainder: usize,
}

impl HeapConfig {
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            min_split_remainder: MIN_SPLIT_REMAINDER,
        }
    }

    pub const fn min_split_remainder(mut self, threshold: usize) -> Self {
        self.min_split_remainder = threshold;
        self
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
