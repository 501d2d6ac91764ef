use std::ptr::NonNull;

use crate::{
    align::align,
    arena::{Arena, ChunkOffset},
    chunk::{ChunkInfo, ChunkState, PayloadAddress},
    config::HeapConfig,
    error::{corrupted, CorruptionReport, HeapError, InitError},
    freelist::FreeList,
    header::{Metadata, METADATA_SIZE, SENTINEL},
    introspect::{AllocatedChunks, Chunks, FreeChunks},
    stats::HeapStats,
    validate,
};

/// The allocator engine. Owns the arena and the head of the free list, and is
/// the only thing that changes the structure of the arena. Chunk prefixes,
/// the arena and the free list all come together here:
///
/// ```text
///                        Next Free Chunk                 Next Free Chunk
///                  +-------------------------+   +-----------------------+
///                  |                         |   |                       |
/// +-------+-------+|------+-------+-------+--|---|-+-------+-------+-----|-+
/// | Alloc | Alloc | Free  | Alloc | Alloc |  Free  | Alloc | Alloc | Free  |
/// +-------+-------+-------+-------+-------+--------+-------+-------+-------+
///                  ^
///                  |
///                  +--- Head of the free list.
/// ```
///
/// Allocation uses the worst-fit policy: the largest free chunk that can hold
/// the request is split, so the leftover is as big as possible. Release puts
/// the chunk back in address order and merges it with free neighbours right
/// away, so two free chunks are never adjacent.
///
/// The heap is not thread safe. Every operation runs to completion and needs
/// `&mut self`; callers that share a heap across threads should wrap the
/// whole value in a single [`std::sync::Mutex`].
///
/// # Examples
///
/// ```rust
/// use worstfit::Heap;
///
/// let mut heap = Heap::initialize(256).unwrap();
///
/// let address = heap.allocate(32).unwrap();
/// heap.payload_mut(address).unwrap().fill(69);
///
/// heap.release(address).unwrap();
/// assert!(heap.validate().is_ok());
/// ```
#[derive(Debug)]
pub struct Heap {
    arena: Arena,
    free_list: FreeList,
    config: HeapConfig,
}

impl Heap {
    /// Maps an arena of `capacity` bytes with default settings. See
    /// [`Self::with_config`].
    pub fn initialize(capacity: usize) -> Result<Self, InitError> {
        Self::with_config(HeapConfig::with_capacity(capacity))
    }

    /// Maps the arena and installs one free chunk spanning all of it.
    pub fn with_config(config: HeapConfig) -> Result<Self, InitError> {
        if config.min_split_remainder < METADATA_SIZE {
            return Err(InitError::SplitThresholdTooSmall {
                threshold: config.min_split_remainder,
            });
        }

        let mut heap = Self {
            arena: Arena::new(config.capacity)?,
            free_list: FreeList::new(),
            config,
        };

        heap.reset();

        tracing::debug!(
            capacity = heap.capacity(),
            min_split_remainder = config.min_split_remainder,
            "heap initialized"
        );

        Ok(heap)
    }

    /// Arena size in bytes, prefixes included.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.size()
    }

    #[inline]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocates a chunk that can hold at least `size` bytes and returns the
    /// address of its payload. The size is rounded up to 8 bytes and the
    /// chunk may be bigger than that when splitting would leave a sliver
    /// behind. Fails with [`HeapError::BadSize`] for `size <= 0` and with
    /// [`HeapError::OutOfMemory`] when no free chunk is large enough. The
    /// arena is untouched on failure.
    pub fn allocate(&mut self, size: isize) -> Result<PayloadAddress, HeapError> {
        let requested = match usize::try_from(size) {
            Ok(requested) if requested > 0 => requested,
            _ => {
                tracing::warn!(size, "rejected non-positive allocation");
                return Err(HeapError::BadSize { requested: size });
            }
        };

        let chunk = align(requested)
            .filter(|aligned| *aligned <= self.capacity())
            .and_then(|aligned| {
                let chunk = self.free_list.find_worst_fit(&self.arena, aligned)?;
                Some((chunk, aligned))
            });

        let Some((chunk, aligned)) = chunk else {
            tracing::warn!(requested, "out of memory");
            return Err(HeapError::OutOfMemory { requested });
        };

        let granted = self.split_free_chunk_if_possible(chunk, aligned);
        self.arena.set_metadata(chunk, Metadata::allocated(granted));

        tracing::debug!(requested, granted, %chunk, "allocated chunk");

        Ok(chunk.payload())
    }

    /// Chunk splitting. Let's say we have a free chunk that can hold 64 bytes
    /// and the request is 8 bytes. The front of the chunk becomes the
    /// allocation and the back becomes a smaller free chunk, which takes the
    /// old chunk's place in the free list:
    ///
    /// **Before**:
    ///
    /// ```text
    ///         +-->  +-----------+
    ///         |     |  Metadata | <- H bytes.
    /// Chunk   |     +-----------+
    ///         |     |  Payload  | <- 64 bytes.
    ///         +-->  +-----------+
    /// ```
    /// **After**:
    ///
    /// ```text
    ///         +-->  +-----------+
    ///         |     |  Metadata | <- H bytes.
    /// Alloc   |     +-----------+
    ///         |     |  Payload  | <- 8 bytes.
    ///         +-->  +-----------+
    ///         |     |  Metadata | <- H bytes.
    /// Free    |     +-----------+
    ///         |     |  Payload  | <- 64 bytes - 8 bytes - H bytes.
    ///         +-->  +-----------+
    /// ```
    ///
    /// If the leftover (prefix included) is below the configured threshold,
    /// the whole chunk is handed out and unlinked instead. Returns the
    /// payload size of the allocation.
    fn split_free_chunk_if_possible(&mut self, chunk: ChunkOffset, size: usize) -> usize {
        let available = self.arena.metadata(chunk).size();
        let leftover = available - size;

        if leftover < self.config.min_split_remainder {
            tracing::trace!(%chunk, available, leftover, "granting whole chunk");
            self.free_list.remove(&mut self.arena, chunk);
            return available;
        }

        let Some(remainder) = self.arena.chunk_at(chunk.get() + METADATA_SIZE + size) else {
            corrupted(CorruptionReport::Overrun {
                address: chunk.get(),
                size: available,
                arena_end: self.capacity(),
            });
        };

        self.arena
            .set_metadata(remainder, Metadata::free(leftover - METADATA_SIZE, None));
        self.free_list.replace(&mut self.arena, chunk, remainder);

        tracing::trace!(%chunk, %remainder, size, leftover, "split free chunk");

        size
    }

    /// Releases the allocation at `address`. The sentinel tag is checked
    /// first: anything that is not the payload of a live allocation (double
    /// release, an address in the middle of a chunk, a free chunk) fails with
    /// [`HeapError::InvalidRelease`] and nothing changes.
    pub fn release(&mut self, address: PayloadAddress) -> Result<(), HeapError> {
        let chunk = self.allocated_chunk(address).map_err(|err| {
            tracing::warn!(%address, "rejected release");
            err
        })?;

        let size = self.arena.metadata(chunk).size();
        self.arena.set_metadata(chunk, Metadata::free(size, None));

        let prev = self.free_list.insert_sorted(&mut self.arena, chunk);
        let merged = self.merge_free_chunks_if_possible(chunk, prev);

        tracing::debug!(%address, size, merged_into = %merged, "released chunk");

        Ok(())
    }

    /// Inverse of [`Self::split_free_chunk_if_possible`]. If the chunks right
    /// before and after the freshly released one are free, they all become
    /// one bigger chunk.
    ///
    /// **Before**:
    ///
    /// ```text
    ///                         +-->  +-----------+
    ///                         |     |  Metadata | <- H bytes.
    /// Chunk A, Free           |     +-----------+
    ///                         |     |  Payload  | <- A bytes.
    ///                         +-->  +-----------+
    ///                         |     |  Metadata | <- H bytes.
    /// Chunk B, Just released  |     +-----------+
    ///                         |     |  Payload  | <- B bytes.
    ///                         +-->  +-----------+
    ///                         |     |  Metadata | <- H bytes.
    /// Chunk C, Free           |     +-----------+
    ///                         |     |  Payload  | <- C bytes.
    ///                         +-->  +-----------+
    /// ```
    ///
    /// **After**:
    ///
    /// ```text
    ///                         +-->  +-----------+
    ///                         |     |  Metadata | <- H bytes.
    /// Chunk D, Merged         |     +-----------+
    ///                         |     |  Payload  | <- A + B + C + 2H bytes.
    ///                         +-->  +-----------+
    /// ```
    ///
    /// `prev` is the free list node before `chunk`. Because the list is
    /// sorted, only `prev` and the node after `chunk` can be adjacent to it.
    /// Returns the chunk that ends up containing `chunk`.
    fn merge_free_chunks_if_possible(
        &mut self,
        chunk: ChunkOffset,
        prev: Option<ChunkOffset>,
    ) -> ChunkOffset {
        let end = self.arena.end_of(chunk);

        if self
            .free_list
            .next_of(&self.arena, chunk)
            .is_some_and(|next| next.get() == end)
        {
            self.free_list.merge_next(&mut self.arena, chunk);
        }

        match prev {
            Some(prev) if self.arena.end_of(prev) == chunk.get() => {
                self.free_list.merge_next(&mut self.arena, prev);
                prev
            }
            _ => chunk,
        }
    }

    /// Discards every chunk and starts over with a single free chunk spanning
    /// the arena. The arena is zeroed, so addresses handed out before the
    /// reset can't pass the sentinel check anymore.
    pub fn reset(&mut self) {
        self.arena.clear();
        self.free_list = FreeList::new();

        let size = self.capacity() - METADATA_SIZE;
        self.arena
            .set_metadata(ChunkOffset::START, Metadata::free(size, None));
        self.free_list
            .insert_sorted(&mut self.arena, ChunkOffset::START);

        tracing::debug!(capacity = self.capacity(), "heap reset");
    }

    /// Walks the whole arena and the free list and checks every structural
    /// invariant. Returns the first violation found.
    pub fn validate(&self) -> Result<(), CorruptionReport> {
        validate::audit(&self.arena, &self.free_list).map_err(|report| {
            tracing::debug!(%report, "validation failed");
            report
        })
    }

    /// Payload bytes of the allocation at `address`.
    pub fn payload(&self, address: PayloadAddress) -> Result<&[u8], HeapError> {
        let chunk = self.allocated_chunk(address)?;
        Ok(self.arena.payload(chunk))
    }

    /// Mutable payload bytes of the allocation at `address`.
    pub fn payload_mut(&mut self, address: PayloadAddress) -> Result<&mut [u8], HeapError> {
        let chunk = self.allocated_chunk(address)?;
        Ok(self.arena.payload_mut(chunk))
    }

    /// Raw pointer to the payload of the allocation at `address`. Valid until
    /// the allocation is released, the heap is reset or dropped.
    pub fn payload_ptr(&self, address: PayloadAddress) -> Result<NonNull<u8>, HeapError> {
        let chunk = self.allocated_chunk(address)?;
        Ok(self.arena.pointer_to(chunk.payload().offset()))
    }

    /// Translates a raw pointer back into the payload address of a live
    /// allocation. `None` if it points anywhere else.
    pub fn resolve(&self, pointer: *const u8) -> Option<PayloadAddress> {
        let address = PayloadAddress::from_offset(self.arena.offset_of(pointer)?);
        self.allocated_chunk(address).ok()?;
        Some(address)
    }

    /// Every chunk in the arena, in address order.
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks::new(&self.arena)
    }

    /// Free chunks, following the free list.
    pub fn free_chunks(&self) -> FreeChunks<'_> {
        FreeChunks::new(&self.arena, &self.free_list)
    }

    /// Allocated chunks, in address order.
    pub fn allocated_chunks(&self) -> AllocatedChunks<'_> {
        AllocatedChunks::new(&self.arena)
    }

    pub fn for_each_free_chunk(&self, visit: impl FnMut(ChunkInfo)) {
        self.free_chunks().for_each(visit)
    }

    pub fn for_each_allocated_chunk(&self, visit: impl FnMut(ChunkInfo)) {
        self.allocated_chunks().for_each(visit)
    }

    /// Payload address of the `index`-th allocated chunk, counting from 1 in
    /// address order.
    pub fn nth_allocated(&self, index: usize) -> Option<PayloadAddress> {
        let chunk = self.allocated_chunks().nth(index.checked_sub(1)?)?;
        Some(chunk.payload())
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats::collect(self.capacity(), self.chunks())
    }

    /// Number of nodes in the free list.
    pub fn free_list_len(&self) -> usize {
        self.free_list.len()
    }

    /// Resolves `address` to an allocated chunk, checking the state byte, the
    /// sentinel tag and that the chunk stays inside the arena. The prefix
    /// must also be one the arena walk lands on: a prefix copied into some
    /// payload passes every other check.
    fn allocated_chunk(&self, address: PayloadAddress) -> Result<ChunkOffset, HeapError> {
        let invalid = HeapError::InvalidRelease {
            address: address.offset(),
        };

        let chunk = self.arena.chunk_of(address).ok_or(invalid)?;
        let metadata = self.arena.metadata(chunk);

        let live = metadata.state() == Some(ChunkState::Allocated)
            && metadata.tag() == SENTINEL
            && chunk.get() + metadata.total_size() <= self.capacity()
            && self
                .allocated_chunks()
                .any(|allocated| allocated.address == chunk.get());

        live.then_some(chunk).ok_or(invalid)
    }

    #[cfg(test)]
    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }
}
