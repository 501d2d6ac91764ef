//! Scripted allocator scenarios: reuse, sorted free list, splitting,
//! coalescing, alternating sequences, worst fit and bad requests. Every test
//! starts from a fresh heap and ends with a full validation.

use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use worstfit::{
    ChunkState::{self, Allocated, Free},
    Heap, HeapError, PayloadAddress, METADATA_SIZE, SENTINEL,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[fixture]
fn heap() -> Heap {
    init_tracing();
    Heap::initialize(256).unwrap()
}

/// `(address, size, state)` of every chunk, in address order.
fn layout(heap: &Heap) -> Vec<(usize, usize, ChunkState)> {
    heap.chunks()
        .map(|chunk| (chunk.address, chunk.size, chunk.state))
        .collect()
}

/// Allocates whatever is left in the largest free chunk.
fn fill(heap: &mut Heap) -> PayloadAddress {
    let largest = heap.stats().largest_free;
    heap.allocate(largest as isize).unwrap()
}

#[rstest]
#[case::arena_already_full(96)]
#[case::rest_of_the_arena_filled(256)]
fn free_chunk_reuse(#[case] capacity: usize) {
    init_tracing();
    let mut heap = Heap::initialize(capacity).unwrap();

    let first = heap.allocate(32).unwrap();
    let second = heap.allocate(32).unwrap();
    if heap.free_list_len() > 0 {
        fill(&mut heap);
    }
    assert_eq!(heap.free_list_len(), 0);

    heap.release(first).unwrap();
    let reused = heap.allocate(16).unwrap();

    assert_eq!(reused, first);
    // 16 bytes left over can't hold a prefix and a payload, so the whole
    // chunk is handed out again.
    assert_eq!(heap.chunks().next().map(|chunk| chunk.size), Some(32));
    assert!(heap.payload(second).is_ok());
    assert_eq!(heap.validate(), Ok(()));
}

#[rstest]
fn free_list_stays_sorted(mut heap: Heap) {
    let addresses: Vec<_> = (0..6).map(|_| heap.allocate(16).unwrap()).collect();
    fill(&mut heap);

    for index in [4, 0, 2] {
        heap.release(addresses[index]).unwrap();
    }

    let free: Vec<_> = heap.free_chunks().map(|chunk| chunk.address).collect();
    assert_eq!(free, vec![0, 64, 128]);

    // Lands right after the chunk at 128 and merges into it.
    heap.release(addresses[5]).unwrap();
    let free: Vec<_> = heap
        .free_chunks()
        .map(|chunk| (chunk.address, chunk.size))
        .collect();
    assert_eq!(free, vec![(0, 16), (64, 16), (128, 48)]);
    assert_eq!(heap.validate(), Ok(()));
}

#[rstest]
fn splitting_free_chunks(mut heap: Heap) {
    heap.allocate(40).unwrap();
    assert_eq!(layout(&heap), vec![(0, 40, Allocated), (56, 184, Free)]);

    // Request gets rounded up to 8 before splitting.
    heap.allocate(13).unwrap();
    assert_eq!(
        layout(&heap),
        vec![(0, 40, Allocated), (56, 16, Allocated), (88, 152, Free)]
    );

    // Leftover of exactly one prefix plus 8 bytes is still split.
    heap.allocate(128).unwrap();
    assert_eq!(
        layout(&heap),
        vec![
            (0, 40, Allocated),
            (56, 16, Allocated),
            (88, 128, Allocated),
            (232, 8, Free),
        ]
    );
    assert_eq!(heap.validate(), Ok(()));
}

#[rstest]
fn coalescing(mut heap: Heap) {
    let first = heap.allocate(16).unwrap();
    let second = heap.allocate(16).unwrap();
    let third = heap.allocate(16).unwrap();
    heap.payload_mut(third).unwrap().fill(0xCD);

    heap.release(second).unwrap();
    heap.release(first).unwrap();

    assert_eq!(
        layout(&heap),
        vec![(0, 16 + METADATA_SIZE + 16, Free), (64, 16, Allocated), (96, 144, Free)]
    );
    assert!(heap.payload(third).unwrap().iter().all(|byte| *byte == 0xCD));
    assert_eq!(heap.validate(), Ok(()));

    // Both neighbours free now, everything becomes one chunk again.
    heap.release(third).unwrap();
    assert_eq!(layout(&heap), vec![(0, 240, Free)]);
}

#[rstest]
fn alternating_sequence(mut heap: Heap) {
    for size in (8..=240).step_by(8) {
        let address = heap.allocate(size).unwrap();
        assert_eq!(address.offset(), METADATA_SIZE);
        heap.release(address).unwrap();
        assert_eq!(layout(&heap), vec![(0, 240, Free)]);
    }

    // Keep one allocation pinned between the alternating ones.
    let pinned = heap.allocate(24).unwrap();
    for _ in 0..10 {
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(32).unwrap();
        heap.release(a).unwrap();
        heap.release(b).unwrap();
        assert_eq!(heap.validate(), Ok(()));
        assert_eq!(heap.free_list_len(), 1);
    }
    heap.release(pinned).unwrap();
    assert_eq!(layout(&heap), vec![(0, 240, Free)]);
}

#[test]
fn worst_fit_picks_the_largest_free_chunk() {
    init_tracing();
    let mut heap = Heap::initialize(512).unwrap();

    let a = heap.allocate(64).unwrap();
    heap.allocate(16).unwrap();
    let b = heap.allocate(128).unwrap();
    heap.allocate(16).unwrap();
    let c = heap.allocate(64).unwrap();
    heap.allocate(16).unwrap();

    for address in [a, b, c] {
        heap.release(address).unwrap();
    }

    let free: Vec<_> = heap
        .free_chunks()
        .map(|chunk| (chunk.address, chunk.size))
        .collect();
    assert_eq!(free, vec![(0, 64), (112, 128), (288, 64), (400, 96)]);

    // A first fit would take `a`, a best fit `c`. Worst fit takes `b`.
    assert_eq!(heap.allocate(50).unwrap(), b);
    assert_eq!(heap.validate(), Ok(()));
}

#[test]
fn worst_fit_ties_go_to_the_lowest_address() {
    init_tracing();
    let mut heap = Heap::initialize(512).unwrap();

    let a = heap.allocate(64).unwrap();
    heap.allocate(16).unwrap();
    let b = heap.allocate(64).unwrap();
    heap.allocate(16).unwrap();
    fill(&mut heap);

    heap.release(b).unwrap();
    heap.release(a).unwrap();

    assert_eq!(heap.allocate(8).unwrap(), a);
    assert_eq!(heap.validate(), Ok(()));
}

#[rstest]
#[case::zero(0)]
#[case::negative(-5)]
#[case::most_negative(isize::MIN)]
fn bad_sizes_leave_the_heap_untouched(mut heap: Heap, #[case] size: isize) {
    heap.allocate(24).unwrap();
    let before = layout(&heap);

    assert_eq!(
        heap.allocate(size),
        Err(HeapError::BadSize { requested: size })
    );
    assert_eq!(layout(&heap), before);
    assert_eq!(heap.validate(), Ok(()));
}

#[rstest]
fn out_of_memory_leaves_the_heap_untouched(mut heap: Heap) {
    heap.allocate(100).unwrap();
    let before = layout(&heap);
    let largest = heap.stats().largest_free;

    assert_eq!(
        heap.allocate(largest as isize + 1),
        Err(HeapError::OutOfMemory {
            requested: largest + 1
        })
    );
    assert_eq!(layout(&heap), before);

    fill(&mut heap);
    assert_eq!(
        heap.allocate(1),
        Err(HeapError::OutOfMemory { requested: 1 })
    );
    assert_eq!(heap.validate(), Ok(()));
}

#[rstest]
fn invalid_releases(mut heap: Heap) {
    let address = heap.allocate(64).unwrap();
    let inside = PayloadAddress::from_offset(address.offset() + 8);

    assert_eq!(
        heap.release(inside),
        Err(HeapError::InvalidRelease {
            address: inside.offset()
        })
    );

    heap.release(address).unwrap();
    let before = layout(&heap);

    assert_eq!(
        heap.release(address),
        Err(HeapError::InvalidRelease {
            address: address.offset()
        })
    );
    assert_eq!(layout(&heap), before);
    assert_eq!(heap.validate(), Ok(()));
}

#[rstest]
fn prefix_written_into_a_payload_is_not_releasable(mut heap: Heap) {
    let address = heap.allocate(64).unwrap();

    // Same bytes as the prefix of a live 16 byte allocation.
    let payload = heap.payload_mut(address).unwrap();
    payload[0..4].copy_from_slice(&16u32.to_ne_bytes());
    payload[4] = 0xA1;
    payload[8..16].copy_from_slice(&SENTINEL.to_ne_bytes());

    let before = layout(&heap);
    let forged = PayloadAddress::from_offset(address.offset() + METADATA_SIZE);

    assert_eq!(
        heap.release(forged),
        Err(HeapError::InvalidRelease {
            address: forged.offset()
        })
    );
    assert_eq!(layout(&heap), before);
    assert_eq!(heap.validate(), Ok(()));

    heap.release(address).unwrap();
    assert_eq!(layout(&heap), vec![(0, 240, Free)]);
}

#[rstest]
fn reset_between_scenarios(mut heap: Heap) {
    for size in [8, 16, 24, 32] {
        heap.allocate(size).unwrap();
    }
    heap.reset();

    assert_eq!(layout(&heap), vec![(0, 240, Free)]);
    assert_eq!(heap.stats().allocated_chunks, 0);
    assert_eq!(heap.validate(), Ok(()));
}
