//! Read-only walks over the arena for shells, diagnostics and tests. Every
//! iterator borrows the heap immutably, visits chunks in ascending address
//! order and can be restarted by asking the heap for a new one.
//!
//! These walks are forgiving: they stop quietly at the first prefix that
//! doesn't make sense instead of reporting it. Use [`crate::Heap::validate`]
//! to find out what went wrong.

use std::iter::FusedIterator;

use crate::{
    arena::{Arena, ChunkOffset},
    chunk::{ChunkInfo, ChunkState},
    freelist::{self, FreeList},
};

/// Every chunk, found by hopping from prefix to prefix using the size field
/// and the state byte. See [`crate::Heap::chunks`].
pub struct Chunks<'a> {
    arena: &'a Arena,
    cursor: Option<ChunkOffset>,
}

impl<'a> Chunks<'a> {
    pub(crate) fn new(arena: &'a Arena) -> Self {
        Self {
            arena,
            cursor: Some(ChunkOffset::START),
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<ChunkInfo> {
        let chunk = self.cursor.take()?;
        let metadata = self.arena.metadata(chunk);
        let state = metadata.state()?;

        let end = chunk.get().checked_add(metadata.total_size())?;
        if end > self.arena.size() {
            return None;
        }

        // `None` once we've reached the end of the arena.
        self.cursor = self.arena.chunk_at(end);

        Some(ChunkInfo {
            address: chunk.get(),
            size: metadata.size(),
            state,
        })
    }
}

impl FusedIterator for Chunks<'_> {}

/// Free chunks, found by following the free list. See
/// [`crate::Heap::free_chunks`].
pub struct FreeChunks<'a> {
    nodes: freelist::Iter<'a>,
}

impl<'a> FreeChunks<'a> {
    pub(crate) fn new(arena: &'a Arena, free_list: &FreeList) -> Self {
        Self {
            nodes: free_list.iter(arena),
        }
    }
}

impl Iterator for FreeChunks<'_> {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<ChunkInfo> {
        let (chunk, metadata) = self.nodes.next()?.ok()?;

        Some(ChunkInfo {
            address: chunk.get(),
            size: metadata.size(),
            state: ChunkState::Free,
        })
    }
}

impl FusedIterator for FreeChunks<'_> {}

/// Allocated chunks in address order. See [`crate::Heap::allocated_chunks`].
pub struct AllocatedChunks<'a> {
    chunks: Chunks<'a>,
}

impl<'a> AllocatedChunks<'a> {
    pub(crate) fn new(arena: &'a Arena) -> Self {
        Self {
            chunks: Chunks::new(arena),
        }
    }
}

impl Iterator for AllocatedChunks<'_> {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<ChunkInfo> {
        self.chunks.find(|chunk| chunk.state == ChunkState::Allocated)
    }
}

impl FusedIterator for AllocatedChunks<'_> {}
