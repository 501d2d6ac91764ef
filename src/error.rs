use crate::{align::CHUNK_ALIGNMENT, header::METADATA_SIZE};

/// Errors returned while setting up a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("arena capacity {capacity} cannot hold a single chunk (minimum is {minimum} bytes)")]
    CapacityTooSmall { capacity: usize, minimum: usize },

    #[error("arena capacity {capacity} exceeds the {maximum} byte limit")]
    CapacityTooLarge { capacity: usize, maximum: usize },

    #[error("split threshold {threshold} is smaller than the {prefix} byte metadata prefix", prefix = METADATA_SIZE)]
    SplitThresholdTooSmall { threshold: usize },

    #[error("the kernel refused to map {length} bytes for the arena")]
    MapFailed { length: usize },
}

/// Errors returned by allocate and release. None of them mutates the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("allocation size must be positive, got {requested}")]
    BadSize { requested: isize },

    #[error("no free chunk can hold {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("address {address} does not point at the payload of an allocated chunk")]
    InvalidRelease { address: usize },
}

/// Structural invariant violation found by [`crate::Heap::validate`]. Every
/// variant carries the arena offset of the chunk where the walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CorruptionReport {
    #[error("chunk at {address} is not {alignment}-byte aligned", alignment = CHUNK_ALIGNMENT)]
    Misaligned { address: usize },

    #[error("chunk at {address} with size {size} crosses the arena end at {arena_end}")]
    Overrun {
        address: usize,
        size: usize,
        arena_end: usize,
    },

    #[error("chunk at {address} has unknown state byte {found:#04x}")]
    UnknownState { address: usize, found: u8 },

    #[error("allocated chunk at {address} has tag {found_tag:#x}, expected {expected_tag:#x}")]
    BadTag {
        address: usize,
        expected_tag: u64,
        found_tag: u64,
    },

    #[error("free chunk at {address} follows {previous} in the free list")]
    FreeListOutOfOrder { address: usize, previous: usize },

    #[error("free chunks at {address} and {neighbor} are adjacent")]
    AdjacentFree { address: usize, neighbor: usize },

    #[error("free chunk at {address} is missing from the free list")]
    UnlistedFree { address: usize },

    #[error("free list entry {address} is not a free chunk in the arena")]
    ListedNotFree { address: usize },

    #[error("free chunk at {address} links to {link}, which is not a chunk start")]
    BrokenLink { address: usize, link: u64 },
}

impl CorruptionReport {
    /// Arena offset of the chunk where the violation was found.
    pub fn address(&self) -> usize {
        match *self {
            Self::Misaligned { address }
            | Self::Overrun { address, .. }
            | Self::UnknownState { address, .. }
            | Self::BadTag { address, .. }
            | Self::FreeListOutOfOrder { address, .. }
            | Self::AdjacentFree { address, .. }
            | Self::UnlistedFree { address }
            | Self::ListedNotFree { address }
            | Self::BrokenLink { address, .. } => address,
        }
    }
}

/// Normal operations only run into corruption when the engine's own
/// invariants were broken (or someone scribbled over the arena). The arena
/// can't be trusted past that point, so we stop instead of repairing it.
#[cold]
#[track_caller]
pub(crate) fn corrupted(report: CorruptionReport) -> ! {
    tracing::error!(%report, address = report.address(), "heap corrupted mid-operation");
    panic!("heap corrupted: {report}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_know_their_address() {
        let report = CorruptionReport::BadTag {
            address: 32,
            expected_tag: 1,
            found_tag: 2,
        };
        assert_eq!(report.address(), 32);
        assert_eq!(
            report.to_string(),
            "allocated chunk at 32 has tag 0x2, expected 0x1"
        );
    }

    #[test]
    fn heap_errors_render() {
        assert_eq!(
            HeapError::BadSize { requested: -5 }.to_string(),
            "allocation size must be positive, got -5"
        );
        assert_eq!(
            HeapError::OutOfMemory { requested: 64 }.to_string(),
            "no free chunk can hold 64 bytes"
        );
    }
}
