//! Full consistency audit. The arena walk and the free list are checked
//! against each other, so this catches both scribbled prefixes and bookkeeping
//! bugs in the engine. Nothing is mutated and the first violation found is
//! returned.
//!
//! Checks, in the order they are made:
//!
//! 1. Every chunk starts on an 8-byte boundary and its prefix and payload fit
//! in the arena. Together with the walk ending exactly at the arena end, this
//! means chunks tile the arena with no gaps or overlaps.
//!
//! 2. Every state byte is known and every allocated chunk carries the
//! sentinel tag.
//!
//! 3. No two free chunks are adjacent.
//!
//! 4. The free list visits exactly the free chunks found by the walk, in
//! strictly increasing address order.

use crate::{
    align::is_aligned,
    arena::{Arena, ChunkOffset},
    chunk::ChunkState,
    error::CorruptionReport,
    freelist::FreeList,
    header::SENTINEL,
};

pub(crate) fn audit(arena: &Arena, free_list: &FreeList) -> Result<(), CorruptionReport> {
    let free = walk_arena(arena)?;
    match_free_list(arena, free_list, &free)
}

/// Hops from prefix to prefix and returns the offsets of free chunks.
fn walk_arena(arena: &Arena) -> Result<Vec<ChunkOffset>, CorruptionReport> {
    let arena_end = arena.size();
    let mut free = Vec::new();
    let mut previous_free: Option<ChunkOffset> = None;
    let mut address = 0;

    while address < arena_end {
        if !is_aligned(address) {
            return Err(CorruptionReport::Misaligned { address });
        }

        // Not even the prefix fits.
        let Some(chunk) = arena.chunk_at(address) else {
            return Err(CorruptionReport::Overrun {
                address,
                size: 0,
                arena_end,
            });
        };

        let metadata = arena.metadata(chunk);
        let size = metadata.size();

        let Some(state) = metadata.state() else {
            return Err(CorruptionReport::UnknownState {
                address,
                found: metadata.state_byte(),
            });
        };

        let end = address + metadata.total_size();
        if end > arena_end {
            return Err(CorruptionReport::Overrun {
                address,
                size,
                arena_end,
            });
        }

        match state {
            ChunkState::Allocated => {
                if metadata.tag() != SENTINEL {
                    return Err(CorruptionReport::BadTag {
                        address,
                        expected_tag: SENTINEL,
                        found_tag: metadata.tag(),
                    });
                }
                previous_free = None;
            }
            ChunkState::Free => {
                if let Some(previous) = previous_free {
                    return Err(CorruptionReport::AdjacentFree {
                        address: previous.get(),
                        neighbor: address,
                    });
                }
                previous_free = Some(chunk);
                free.push(chunk);
            }
        }

        address = end;
    }

    Ok(free)
}

/// Compares the free list node by node with the free chunks of the walk.
fn match_free_list(
    arena: &Arena,
    free_list: &FreeList,
    free: &[ChunkOffset],
) -> Result<(), CorruptionReport> {
    let mut expected = free.iter().copied();

    for entry in free_list.iter(arena) {
        let (listed, _) = entry?;

        match expected.next() {
            Some(chunk) if chunk == listed => continue,
            // The walk found a free chunk before the one in the list.
            Some(chunk) if chunk < listed => {
                return Err(CorruptionReport::UnlistedFree {
                    address: chunk.get(),
                })
            }
            // The list points somewhere the walk never saw a free chunk.
            _ => {
                return Err(CorruptionReport::ListedNotFree {
                    address: listed.get(),
                })
            }
        }
    }

    match expected.next() {
        Some(chunk) => Err(CorruptionReport::UnlistedFree {
            address: chunk.get(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{header::Metadata, Heap, PayloadAddress};

    /// 0: alloc 16, 32: alloc 16, 64: alloc 16, 96: free 144.
    fn heap() -> (Heap, PayloadAddress) {
        let mut heap = Heap::initialize(256).unwrap();
        let first = heap.allocate(16).unwrap();
        heap.allocate(16).unwrap();
        heap.allocate(16).unwrap();
        assert_eq!(heap.validate(), Ok(()));
        (heap, first)
    }

    fn overwrite(heap: &mut Heap, offset: usize, metadata: Metadata) {
        let chunk = heap.arena_mut().chunk_at(offset).unwrap();
        heap.arena_mut().set_metadata(chunk, metadata);
    }

    #[test]
    fn payload_overrun_clobbers_the_tag() {
        let (mut heap, first) = heap();
        let pointer = heap.payload_ptr(first).unwrap();

        // 16 byte payload, then 8 bytes of size and state, then the tag.
        unsafe { pointer.as_ptr().add(24).write_bytes(0xAB, 8) };

        assert_eq!(
            heap.validate(),
            Err(CorruptionReport::BadTag {
                address: 32,
                expected_tag: SENTINEL,
                found_tag: 0xABAB_ABAB_ABAB_ABAB,
            })
        );
    }

    #[test]
    fn payload_overrun_clobbers_the_state() {
        let (mut heap, first) = heap();
        let pointer = heap.payload_ptr(first).unwrap();

        unsafe { pointer.as_ptr().add(20).write(0x7F) };

        assert_eq!(
            heap.validate(),
            Err(CorruptionReport::UnknownState {
                address: 32,
                found: 0x7F,
            })
        );
    }

    #[test]
    fn chunk_past_the_arena_end() {
        let (mut heap, _) = heap();
        overwrite(&mut heap, 96, Metadata::free(1000, None));

        assert_eq!(
            heap.validate(),
            Err(CorruptionReport::Overrun {
                address: 96,
                size: 1000,
                arena_end: 256,
            })
        );
    }

    #[test]
    fn size_that_breaks_alignment() {
        let (mut heap, _) = heap();
        overwrite(&mut heap, 64, Metadata::allocated(12));

        assert_eq!(
            heap.validate(),
            Err(CorruptionReport::Misaligned { address: 92 })
        );
    }

    #[test]
    fn adjacent_free_chunks() {
        let (mut heap, _) = heap();
        overwrite(&mut heap, 64, Metadata::free(16, None));

        assert_eq!(
            heap.validate(),
            Err(CorruptionReport::AdjacentFree {
                address: 64,
                neighbor: 96,
            })
        );
    }

    #[test]
    fn free_chunk_missing_from_the_list() {
        let (mut heap, _) = heap();
        overwrite(&mut heap, 32, Metadata::free(16, None));

        assert_eq!(
            heap.validate(),
            Err(CorruptionReport::UnlistedFree { address: 32 })
        );
    }

    #[test]
    fn listed_chunk_is_allocated() {
        let (mut heap, _) = heap();
        overwrite(&mut heap, 96, Metadata::allocated(144));

        assert_eq!(
            heap.validate(),
            Err(CorruptionReport::ListedNotFree { address: 96 })
        );
    }

    #[test]
    fn free_list_goes_backwards() {
        let (mut heap, _) = heap();
        let back = heap.arena_mut().chunk_at(32);
        overwrite(&mut heap, 96, Metadata::free(144, back));

        assert_eq!(
            heap.validate(),
            Err(CorruptionReport::FreeListOutOfOrder {
                address: 32,
                previous: 96,
            })
        );
    }

    #[test]
    fn free_list_link_into_nowhere() {
        let (mut heap, _) = heap();

        // Link slot of the free chunk at 96.
        let link = heap.arena_mut().pointer_to(96 + 8);
        unsafe { link.as_ptr().cast::<u64>().write(13) };

        assert_eq!(
            heap.validate(),
            Err(CorruptionReport::BrokenLink {
                address: 96,
                link: 13,
            })
        );
    }
}
