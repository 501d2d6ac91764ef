use std::fmt;

use crate::{
    chunk::{ChunkInfo, ChunkState},
    header::METADATA_SIZE,
};

/// Snapshot of how the arena is split up, built from one walk over every
/// chunk. See [`crate::Heap::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Arena size in bytes.
    pub capacity: usize,
    /// Bytes covered by the walk, prefixes included. Equals `capacity`
    /// unless the walk stopped early on a corrupted prefix.
    pub accounted_bytes: usize,
    pub allocated_chunks: usize,
    pub free_chunks: usize,
    /// Payload bytes of allocated chunks.
    pub allocated_bytes: usize,
    /// Payload bytes of free chunks.
    pub free_bytes: usize,
    /// Payload size of the largest free chunk, which is also the largest
    /// request that can succeed right now.
    pub largest_free: usize,
}

impl HeapStats {
    pub(crate) fn collect(capacity: usize, chunks: impl Iterator<Item = ChunkInfo>) -> Self {
        chunks.fold(
            Self {
                capacity,
                ..Default::default()
            },
            |mut stats, chunk| {
                stats.accounted_bytes += METADATA_SIZE + chunk.size;

                match chunk.state {
                    ChunkState::Allocated => {
                        stats.allocated_chunks += 1;
                        stats.allocated_bytes += chunk.size;
                    }
                    ChunkState::Free => {
                        stats.free_chunks += 1;
                        stats.free_bytes += chunk.size;
                        stats.largest_free = stats.largest_free.max(chunk.size);
                    }
                }

                stats
            },
        )
    }

    /// Bytes spent on metadata prefixes.
    pub fn overhead(&self) -> usize {
        (self.allocated_chunks + self.free_chunks) * METADATA_SIZE
    }

    /// Whether every byte of the arena belongs to some chunk.
    pub fn is_fully_accounted(&self) -> bool {
        self.accounted_bytes == self.capacity
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} allocated chunks ({} bytes), {} free chunks ({} bytes, largest {}), \
             {} bytes of metadata, accounted for {} of {} bytes",
            self.allocated_chunks,
            self.allocated_bytes,
            self.free_chunks,
            self.free_bytes,
            self.largest_free,
            self.overhead(),
            self.accounted_bytes,
            self.capacity,
        )
    }
}
