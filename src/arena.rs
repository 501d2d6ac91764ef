use std::{fmt, ptr::NonNull, slice};

use crate::{
    align::{align_down, align_to, is_aligned, CHUNK_ALIGNMENT},
    chunk::PayloadAddress,
    error::InitError,
    header::{Metadata, METADATA_SIZE},
    platform,
};

/// Smallest usable arena: one prefix plus one aligned word of payload.
pub(crate) const MIN_CAPACITY: usize = METADATA_SIZE + CHUNK_ALIGNMENT;

/// Sizes are stored in 32 bits inside the prefix.
pub(crate) const MAX_CAPACITY: usize = align_down(u32::MAX as usize);

/// Opaque handle to a chunk: the arena offset of its metadata prefix. It can
/// only be built through [`Arena::chunk_at`] and friends, which check that the
/// offset is aligned and that a whole prefix fits before the arena end, so
/// reading the prefix through a handle is always in bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ChunkOffset(usize);

impl ChunkOffset {
    /// First chunk of every arena.
    pub const START: Self = Self(0);

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }

    /// Returns the address right after the prefix.
    ///
    /// ```text
    /// +-------------+
    /// |  Metadata   | <- self.
    /// +-------------+
    /// |   Payload   | <- Returned address points here.
    /// +-------------+
    /// ```
    #[inline]
    pub fn payload(self) -> PayloadAddress {
        PayloadAddress::from_offset(self.0 + METADATA_SIZE)
    }
}

impl fmt::Display for ChunkOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-size region mapped once from the kernel. All chunk memory lives here,
/// and nothing but the heap writes to it except through payload slices.
///
/// ```text
///  base                                                       base + size
///   |                                                              |
///   v                                                              v
///   +----------+---------+----------+-------------+----------+-----+
///   | Metadata | Payload | Metadata |   Payload   | Metadata | ... |
///   +----------+---------+----------+-------------+----------+-----+
/// ```
#[derive(Debug)]
pub(crate) struct Arena {
    /// First byte of the mapping. Page aligned.
    base: NonNull<u8>,
    /// Usable capacity in bytes, multiple of [`CHUNK_ALIGNMENT`].
    size: usize,
    /// Mapping length, `size` rounded up to the page size.
    length: usize,
}

// The arena exclusively owns its mapping, nothing else points into it.
unsafe impl Send for Arena {}

impl Arena {
    /// Maps a zero-filled region able to hold `capacity` bytes. The capacity
    /// is rounded down to [`CHUNK_ALIGNMENT`].
    pub fn new(capacity: usize) -> Result<Self, InitError> {
        let size = align_down(capacity);

        if size < MIN_CAPACITY {
            return Err(InitError::CapacityTooSmall {
                capacity,
                minimum: MIN_CAPACITY,
            });
        }

        if size > MAX_CAPACITY {
            return Err(InitError::CapacityTooLarge {
                capacity,
                maximum: MAX_CAPACITY,
            });
        }

        let length = align_to(size, platform::page_size());

        let Some(base) = (unsafe { platform::map_zeroed(length) }) else {
            return Err(InitError::MapFailed { length });
        };

        tracing::trace!(size, length, "mapped arena");

        Ok(Self { base, size, length })
    }

    /// Usable capacity in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns a handle to the chunk starting at `offset` if a prefix can
    /// live there.
    #[inline]
    pub fn chunk_at(&self, offset: usize) -> Option<ChunkOffset> {
        let fits = offset
            .checked_add(METADATA_SIZE)
            .is_some_and(|end| end <= self.size);

        (is_aligned(offset) && fits).then_some(ChunkOffset(offset))
    }

    /// Same as [`Self::chunk_at`] for a raw link read from the arena.
    #[inline]
    pub fn chunk_at_link(&self, link: u64) -> Option<ChunkOffset> {
        usize::try_from(link).ok().and_then(|offset| self.chunk_at(offset))
    }

    /// Backs up from a payload address to the prefix of its chunk.
    ///
    /// ```text
    /// +-------------+
    /// |  Metadata   | <- Returned handle points here.
    /// +-------------+
    /// |   Payload   | <- Given address should point here.
    /// +-------------+
    /// ```
    #[inline]
    pub fn chunk_of(&self, payload: PayloadAddress) -> Option<ChunkOffset> {
        self.chunk_at(payload.chunk_offset()?)
    }

    /// Offset of the first byte after `chunk`, according to its prefix.
    #[inline]
    pub fn end_of(&self, chunk: ChunkOffset) -> usize {
        chunk.0 + self.metadata(chunk).total_size()
    }

    /// Copies the prefix of `chunk` out of the arena.
    #[inline]
    pub fn metadata(&self, chunk: ChunkOffset) -> Metadata {
        // SAFETY: `ChunkOffset` guarantees a full prefix in bounds, the base
        // is page aligned and the offset is 8-byte aligned, which satisfies
        // the alignment of `Metadata`. Every bit pattern is a valid
        // `Metadata` and the mapping is zero-filled, so it's initialized.
        unsafe { self.base.as_ptr().add(chunk.0).cast::<Metadata>().read() }
    }

    /// Overwrites the prefix of `chunk`.
    #[inline]
    pub fn set_metadata(&mut self, chunk: ChunkOffset, metadata: Metadata) {
        // SAFETY: see `Self::metadata`. `&mut self` means no payload slice
        // is alive while we write.
        unsafe {
            self.base
                .as_ptr()
                .add(chunk.0)
                .cast::<Metadata>()
                .write(metadata)
        }
    }

    /// Zeroes the whole arena, wiping every stale prefix.
    pub fn clear(&mut self) {
        // SAFETY: `size` bytes from `base` belong to the mapping.
        unsafe { self.base.as_ptr().write_bytes(0, self.size) }
    }

    /// Payload bytes of `chunk`, as described by its prefix.
    pub fn payload(&self, chunk: ChunkOffset) -> &[u8] {
        let (start, len) = self.payload_bounds(chunk);
        // SAFETY: bounds checked above, the memory is initialized and the
        // shared borrow of `self` prevents concurrent writes.
        unsafe { slice::from_raw_parts(self.base.as_ptr().add(start), len) }
    }

    /// Mutable version of [`Self::payload`].
    pub fn payload_mut(&mut self, chunk: ChunkOffset) -> &mut [u8] {
        let (start, len) = self.payload_bounds(chunk);
        // SAFETY: same as `Self::payload`, with an exclusive borrow.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr().add(start), len) }
    }

    fn payload_bounds(&self, chunk: ChunkOffset) -> (usize, usize) {
        let start = chunk.0 + METADATA_SIZE;
        let len = self.metadata(chunk).size();
        assert!(
            start + len <= self.size,
            "chunk at {chunk} overruns the arena"
        );
        (start, len)
    }

    /// Translates an arena offset into a raw pointer.
    #[inline]
    pub fn pointer_to(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.size, "offset {offset} is outside the arena");
        // SAFETY: in bounds (one past the end at most) of the mapping.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Translates a raw pointer back into an arena offset, if it points
    /// inside the arena.
    #[inline]
    pub fn offset_of(&self, address: *const u8) -> Option<usize> {
        let offset = (address as usize).checked_sub(self.base.as_ptr() as usize)?;
        (offset < self.size).then_some(offset)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { platform::unmap(self.base, self.length) }
    }
}
