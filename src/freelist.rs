use crate::{
    arena::{Arena, ChunkOffset},
    chunk::ChunkState,
    error::{corrupted, CorruptionReport},
    header::{Metadata, METADATA_SIZE},
};

/// When a chunk is free, the `link` slot of its prefix stores the offset of
/// the next free chunk, so the free list is threaded through the arena itself
/// and needs no memory of its own. We only keep the head around:
///
/// ```text
///            head
///             |
///             v
/// +-------+-------+-------+-------+-------+-------+
/// | Alloc | Free  | Alloc | Alloc | Free  | Alloc |
/// +-------+---|---+-------+-------+---^---+-------+
///             |                       |
///             +-----------------------+
///                   next free chunk
/// ```
///
/// Two invariants hold between operations:
///
/// 1. Nodes are sorted by strictly increasing address, so a walk of the list
/// visits free chunks in the same order as a walk of the arena.
///
/// 2. No two free chunks are adjacent in memory. Release merges them right
/// away, see [`crate::Heap::release`].
///
/// The list is singly linked. Removing a node means walking from the head to
/// find its predecessor, which is O(n), but the list is short and this is
/// easy to audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeList {
    head: Option<ChunkOffset>,
    len: usize,
}

impl FreeList {
    /// Empty list, the arena is fully allocated.
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Walks the list without trusting the arena. Stops after the first
    /// inconsistency, which is yielded as an error.
    pub fn iter<'a>(&self, arena: &'a Arena) -> Iter<'a> {
        Iter {
            arena,
            current: self.head,
        }
    }

    /// Node after `node`, which must be in the list.
    #[inline]
    pub fn next_of(&self, arena: &Arena, node: ChunkOffset) -> Option<ChunkOffset> {
        entry(arena, node).1
    }

    /// Worst-fit search: returns the free chunk with the largest payload that
    /// can hold `size` bytes, or `None` if no chunk is big enough. Since the
    /// list is sorted and only a strictly larger chunk replaces the current
    /// candidate, ties go to the lowest address.
    pub fn find_worst_fit(&self, arena: &Arena, size: usize) -> Option<ChunkOffset> {
        let mut worst: Option<(ChunkOffset, usize)> = None;
        let mut current = self.head;

        while let Some(node) = current {
            let (metadata, next) = entry(arena, node);
            let available = metadata.size();

            if available >= size && worst.map_or(true, |(_, largest)| available > largest) {
                worst = Some((node, available));
            }

            current = next;
        }

        tracing::trace!(size, chosen = ?worst, "worst fit search");

        worst.map(|(chunk, _)| chunk)
    }

    /// Links `chunk` between the two nodes that bracket its address. The
    /// prefix of `chunk` must already describe a free chunk. Returns the node
    /// right before it, if any, which is the only candidate for a merge on
    /// the left.
    pub fn insert_sorted(&mut self, arena: &mut Arena, chunk: ChunkOffset) -> Option<ChunkOffset> {
        let mut prev = None;
        let mut current = self.head;

        while let Some(node) = current {
            if node > chunk {
                break;
            }
            prev = Some(node);
            current = entry(arena, node).1;
        }

        set_next(arena, chunk, current);
        self.link_after(arena, prev, Some(chunk));
        self.len += 1;

        prev
    }

    /// Unlinks `chunk`, which must be in the list.
    pub fn remove(&mut self, arena: &mut Arena, chunk: ChunkOffset) {
        let prev = self.predecessor_of(arena, chunk);
        let next = entry(arena, chunk).1;

        self.link_after(arena, prev, next);
        self.len -= 1;
    }

    /// Puts `new` in the list position of `old`. Used when splitting moves a
    /// free chunk forward: nothing can sit between `old` and `new` in memory,
    /// so the order is preserved. The prefix of `new` must already describe
    /// a free chunk, its link is overwritten here.
    pub fn replace(&mut self, arena: &mut Arena, old: ChunkOffset, new: ChunkOffset) {
        let prev = self.predecessor_of(arena, old);
        let next = entry(arena, old).1;

        set_next(arena, new, next);
        self.link_after(arena, prev, Some(new));
    }

    /// Merges the next free chunk into `chunk`. Blocks can only be merged
    /// from right to left because the merged chunk keeps the lower address.
    /// Both chunks must be adjacent in memory.
    ///
    /// ```text
    /// +----------------+---------------+
    /// |    Chunk A     |    Chunk B    |
    /// +----------------+---------------+
    ///        ^                 |
    ///        |                 |
    ///        +-----------------+
    ///           Merge B into A
    /// ```
    ///
    /// B's prefix becomes payload of A. Returns the merged payload size.
    pub fn merge_next(&mut self, arena: &mut Arena, chunk: ChunkOffset) -> usize {
        let (metadata, next) = entry(arena, chunk);
        let Some(next) = next else {
            corrupted(CorruptionReport::UnlistedFree {
                address: arena.end_of(chunk),
            });
        };

        debug_assert_eq!(arena.end_of(chunk), next.get(), "merging non adjacent chunks");

        let (absorbed, after) = entry(arena, next);
        let size = metadata.size() + METADATA_SIZE + absorbed.size();

        arena.set_metadata(chunk, Metadata::free(size, after));
        self.len -= 1;

        tracing::trace!(%chunk, %next, size, "merged free chunks");

        size
    }

    /// Node before `chunk`, `None` if `chunk` is the head.
    fn predecessor_of(&self, arena: &Arena, chunk: ChunkOffset) -> Option<ChunkOffset> {
        let mut prev = None;
        let mut current = self.head;

        while let Some(node) = current {
            if node == chunk {
                return prev;
            }
            if node > chunk {
                break;
            }
            prev = Some(node);
            current = entry(arena, node).1;
        }

        corrupted(CorruptionReport::UnlistedFree {
            address: chunk.get(),
        })
    }

    /// Points `prev` (or the head when `prev` is `None`) to `next`.
    fn link_after(&mut self, arena: &mut Arena, prev: Option<ChunkOffset>, next: Option<ChunkOffset>) {
        match prev {
            Some(prev) => set_next(arena, prev, next),
            None => self.head = next,
        }
    }
}

/// Rewrites the link of a free chunk, keeping its size.
fn set_next(arena: &mut Arena, chunk: ChunkOffset, next: Option<ChunkOffset>) {
    let size = arena.metadata(chunk).size();
    arena.set_metadata(chunk, Metadata::free(size, next));
}

/// Reads a free list node and decodes its link. Panics if the node is not a
/// free chunk or the link is broken, see [`corrupted`].
fn entry(arena: &Arena, node: ChunkOffset) -> (Metadata, Option<ChunkOffset>) {
    try_entry(arena, node).unwrap_or_else(|report| corrupted(report))
}

/// Fallible version of [`entry`] for audits.
fn try_entry(
    arena: &Arena,
    node: ChunkOffset,
) -> Result<(Metadata, Option<ChunkOffset>), CorruptionReport> {
    let metadata = arena.metadata(node);
    let address = node.get();

    if metadata.state() != Some(ChunkState::Free) {
        return Err(CorruptionReport::ListedNotFree { address });
    }

    let Some(link) = metadata.next_free() else {
        return Ok((metadata, None));
    };

    let next = arena
        .chunk_at_link(link)
        .ok_or(CorruptionReport::BrokenLink { address, link })?;

    // Links only go forward. This also rules out cycles.
    if next <= node {
        return Err(CorruptionReport::FreeListOutOfOrder {
            address: next.get(),
            previous: address,
        });
    }

    Ok((metadata, Some(next)))
}

/// See [`FreeList::iter`].
pub(crate) struct Iter<'a> {
    arena: &'a Arena,
    current: Option<ChunkOffset>,
}

impl Iterator for Iter<'_> {
    type Item = Result<(ChunkOffset, Metadata), CorruptionReport>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current.take()?;

        Some(try_entry(self.arena, node).map(|(metadata, next)| {
            self.current = next;
            (node, metadata)
        }))
    }
}
