//! Single-arena heap allocator. One fixed region is mapped when the heap is
//! created and carved into chunks, each made of a 16 byte metadata prefix and
//! a payload:
//!
//! ```text
//! +----------+---------+----------+-------------+----------+---------+
//! | Metadata | Payload | Metadata |   Payload   | Metadata | Payload |
//! +----------+---------+----------+-------------+----------+---------+
//!   Allocated            Free                     Allocated
//! ```
//!
//! Free chunks are threaded into a list sorted by address. Allocation picks
//! the largest free chunk that fits (worst fit) and splits it, release merges
//! the chunk with its free neighbours right away. Allocated chunks carry a
//! sentinel tag that release checks, so double releases and bogus addresses
//! are rejected without touching the arena.
//!
//! Addresses handed out by the heap are [`PayloadAddress`] values, offsets
//! into the arena. [`Heap::payload_mut`] gives access to the bytes behind
//! them and [`Heap::payload_ptr`] to a raw pointer when one is needed.
//!
//! ```rust
//! use worstfit::Heap;
//!
//! let mut heap = Heap::initialize(4096).unwrap();
//!
//! let a = heap.allocate(100).unwrap();
//! let b = heap.allocate(24).unwrap();
//! heap.release(a).unwrap();
//!
//! for chunk in heap.chunks() {
//!     println!("{chunk}");
//! }
//!
//! heap.release(b).unwrap();
//! assert_eq!(heap.chunks().count(), 1);
//! ```

use std::ptr::NonNull;

mod align;
mod arena;
mod chunk;
mod config;
mod error;
mod freelist;
mod header;
mod heap;
mod introspect;
mod platform;
mod stats;
mod validate;

/// Non-null pointer to `T`. We use this instead of `*mut T` so that the
/// compiler makes us handle the `None` case.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

pub use align::{align, CHUNK_ALIGNMENT};
pub use chunk::{ChunkInfo, ChunkState, PayloadAddress};
pub use config::{HeapConfig, DEFAULT_CAPACITY};
pub use error::{CorruptionReport, HeapError, InitError};
pub use header::{METADATA_SIZE, MIN_SPLIT_REMAINDER, SENTINEL};
pub use heap::Heap;
pub use introspect::{AllocatedChunks, Chunks, FreeChunks};
pub use stats::HeapStats;
