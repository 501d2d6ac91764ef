use std::mem;

use crate::{arena::ChunkOffset, chunk::ChunkState};

/// Size of the metadata prefix in bytes. Allocated and free chunks share the
/// same prefix, so the arena can be walked chunk by chunk without knowing
/// anything else about it.
pub const METADATA_SIZE: usize = mem::size_of::<Metadata>();

/// Written into the prefix of every allocated chunk and checked again when the
/// chunk is released. Anything else there means double release, a bogus
/// address or a caller that wrote past its allocation.
pub const SENTINEL: u64 = 0xA110_C8ED_5EA1_ED00;

/// Default minimum leftover (prefix included) required to split a free chunk.
/// Anything smaller would become a free chunk with no payload at all.
pub const MIN_SPLIT_REMAINDER: usize = METADATA_SIZE + 1;

/// Stored in `link` when a free chunk is the last one in the free list.
const NO_LINK: u64 = u64::MAX;

/// Metadata prefix located right before every payload. Here's how a chunk
/// looks like in memory:
///
/// ```text
/// +----------------------------+  <------+
/// | payload size (u32)         |         |
/// +----------------------------+         |
/// | state (u8) | reserved (3)  |         | Metadata, 16 bytes.
/// +----------------------------+         |
/// | sentinel or next free (u64)|         |
/// +----------------------------+  <------+
/// |          Payload           |  <------+
/// |            ...             |         | `size` bytes.
/// |            ...             |  <------+
/// +----------------------------+
/// ```
///
/// When the chunk is allocated `link` holds [`SENTINEL`]. When it's free,
/// `link` holds the arena offset of the next free chunk, so the free list
/// lives entirely inside the arena. The explicit `state` byte means a walk
/// never has to cross-reference the free list to know what a chunk is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub(crate) struct Metadata {
    size: u32,
    state: u8,
    reserved: [u8; 3],
    link: u64,
}

impl Metadata {
    /// Prefix of a chunk handed out to a caller.
    #[inline]
    pub fn allocated(size: usize) -> Self {
        Self::new(size, ChunkState::Allocated, SENTINEL)
    }

    /// Prefix of a free chunk followed by `next` in the free list.
    #[inline]
    pub fn free(size: usize, next: Option<ChunkOffset>) -> Self {
        let link = next.map_or(NO_LINK, |next| next.get() as u64);
        Self::new(size, ChunkState::Free, link)
    }

    #[inline]
    fn new(size: usize, state: ChunkState, link: u64) -> Self {
        // Arena capacity is capped at u32::MAX, so no payload can exceed it.
        debug_assert!(size <= u32::MAX as usize);
        Self {
            size: size as u32,
            state: state as u8,
            reserved: [0; 3],
            link,
        }
    }

    /// Payload capacity, prefix excluded.
    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    #[inline]
    pub fn state(&self) -> Option<ChunkState> {
        ChunkState::from_byte(self.state)
    }

    /// Raw discriminant, for corruption reports.
    #[inline]
    pub fn state_byte(&self) -> u8 {
        self.state
    }

    /// Sentinel tag slot. Only meaningful for allocated chunks.
    #[inline]
    pub fn tag(&self) -> u64 {
        self.link
    }

    /// Raw offset of the next free chunk, `None` at the end of the list. The
    /// offset is not checked here, see [`crate::arena::Arena::chunk_at`].
    #[inline]
    pub fn next_free(&self) -> Option<u64> {
        (self.link != NO_LINK).then_some(self.link)
    }

    /// Total chunk size, prefix included.
    #[inline]
    pub fn total_size(&self) -> usize {
        METADATA_SIZE + self.size()
    }
}
