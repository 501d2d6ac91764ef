//! Walks through chunk reuse and coalescing, printing the arena after every
//! step. Run with `RUST_LOG=worstfit=trace` to see the engine's decisions.

use tracing_subscriber::EnvFilter;
use worstfit::{Heap, HeapError};

fn print_heap(heap: &Heap) {
    for chunk in heap.chunks() {
        println!("    {chunk}");
    }
    println!("    {}", heap.stats());
}

fn main() -> Result<(), HeapError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut heap = match Heap::initialize(96) {
        Ok(heap) => heap,
        Err(err) => {
            eprintln!("could not create the heap: {err}");
            std::process::exit(1);
        }
    };

    println!("Fresh heap of {} bytes:", heap.capacity());
    print_heap(&heap);

    println!("\nAllocating 32 bytes twice fills the arena...");
    let first = heap.allocate(32)?;
    let second = heap.allocate(32)?;
    println!("Received addresses {first} and {second}");
    print_heap(&heap);

    println!("\nReleasing {first} and asking for 16 bytes...");
    heap.release(first)?;
    let reused = heap.allocate(16)?;
    println!("Received address {reused}, the released chunk was reused");
    print_heap(&heap);

    heap.reset();

    println!("\nThree allocations of 16 bytes...");
    let addresses = [heap.allocate(16)?, heap.allocate(16)?, heap.allocate(16)?];
    print_heap(&heap);

    println!("\nReleasing the middle one, then the first one...");
    heap.release(addresses[1])?;
    heap.release(addresses[0])?;
    print_heap(&heap);

    match heap.validate() {
        Ok(()) => println!("\nHeap is consistent"),
        Err(report) => println!("\nHeap is corrupted: {report}"),
    }

    println!("\nNow a couple of requests that must fail:");
    for size in [0, -5, 1024] {
        if let Err(err) = heap.allocate(size) {
            println!("    allocate({size}): {err}");
        }
    }
    if let Err(err) = heap.release(addresses[0]) {
        println!("    release({}): {err}", addresses[0]);
    }

    Ok(())
}
