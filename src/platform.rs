//! Backing pages for the arena. The heap maps its region exactly once, when
//! it's created, and hands it back when it's dropped. Each target provides an
//! `os` module with three functions:
//!
//! - `map_zeroed(length)`: a fresh read-write region, zero-filled, or `None`.
//! - `unmap(base, length)`: gives the region back, `false` if the kernel
//!   refused.
//! - `query_page_size()`: page size in bytes.

use std::{ptr::NonNull, sync::OnceLock};

use crate::Pointer;

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Page size, asked to the kernel the first time and cached after that.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { os::query_page_size() })
}

/// Maps `length` zero-filled bytes. `length` should be a multiple of
/// [`page_size`].
///
/// # Safety
///
/// The returned region must be given back through [`unmap`] with the same
/// `length`, and only once.
pub(crate) unsafe fn map_zeroed(length: usize) -> Pointer<u8> {
    let base = os::map_zeroed(length);

    if base.is_none() {
        tracing::warn!(length, "kernel refused to map the arena");
    }

    base
}

/// Returns a region obtained from [`map_zeroed`].
///
/// # Safety
///
/// Nothing may read or write the region after this call.
pub(crate) unsafe fn unmap(base: NonNull<u8>, length: usize) {
    if !os::unmap(base, length) {
        tracing::warn!(length, "could not unmap the arena, pages leaked");
    }
}

#[cfg(all(unix, not(miri)))]
mod os {
    use std::ptr::{self, NonNull};

    use crate::Pointer;

    pub unsafe fn map_zeroed(length: usize) -> Pointer<u8> {
        // Anonymous private mappings come zero-filled and are never executed.
        let address = libc::mmap(
            ptr::null_mut(),
            length,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );

        (address != libc::MAP_FAILED)
            .then(|| NonNull::new(address.cast()))
            .flatten()
    }

    pub unsafe fn unmap(base: NonNull<u8>, length: usize) -> bool {
        libc::munmap(base.as_ptr().cast(), length) == 0
    }

    pub unsafe fn query_page_size() -> usize {
        libc::sysconf(libc::_SC_PAGESIZE) as usize
    }
}

#[cfg(all(windows, not(miri)))]
mod os {
    use std::{mem::MaybeUninit, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use crate::Pointer;

    pub unsafe fn map_zeroed(length: usize) -> Pointer<u8> {
        // Committed pages are zeroed.
        let address = Memory::VirtualAlloc(
            None,
            length,
            Memory::MEM_RESERVE | Memory::MEM_COMMIT,
            Memory::PAGE_READWRITE,
        );

        NonNull::new(address.cast())
    }

    pub unsafe fn unmap(base: NonNull<u8>, _length: usize) -> bool {
        // MEM_RELEASE frees the whole reservation and wants a length of 0.
        Memory::VirtualFree(base.as_ptr().cast(), 0, Memory::MEM_RELEASE).as_bool()
    }

    pub unsafe fn query_page_size() -> usize {
        let mut info = MaybeUninit::uninit();
        SystemInformation::GetSystemInfo(info.as_mut_ptr());

        info.assume_init().dwPageSize as usize
    }
}

/// Miri can't call into the kernel, so the arena comes from the global
/// allocator, zeroed to match what `mmap` hands out.
#[cfg(miri)]
mod os {
    use std::{
        alloc::{self, Layout},
        ptr::NonNull,
    };

    use crate::Pointer;

    const PAGE_SIZE: usize = 4096;

    fn layout(length: usize) -> Option<Layout> {
        Layout::from_size_align(length, PAGE_SIZE).ok()
    }

    pub unsafe fn map_zeroed(length: usize) -> Pointer<u8> {
        NonNull::new(alloc::alloc_zeroed(layout(length)?))
    }

    pub unsafe fn unmap(base: NonNull<u8>, length: usize) -> bool {
        let Some(layout) = layout(length) else {
            return false;
        };
        alloc::dealloc(base.as_ptr(), layout);
        true
    }

    pub unsafe fn query_page_size() -> usize {
        PAGE_SIZE
    }
}
