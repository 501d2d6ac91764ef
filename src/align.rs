/// Every chunk starts on an 8-byte boundary, regardless of the machine word
/// size. Payload sizes are rounded to this value so that the next chunk start
/// stays aligned too.
pub const CHUNK_ALIGNMENT: usize = 8;

/// Rounds `to_be_aligned` up to the next multiple of [`CHUNK_ALIGNMENT`].
/// Returns `None` on overflow.
///
/// # Examples
///
/// ```rust
/// use worstfit::align;
///
/// assert_eq!(align(13), Some(16));
/// assert_eq!(align(16), Some(16));
/// assert_eq!(align(usize::MAX), None);
/// ```
#[inline]
pub fn align(to_be_aligned: usize) -> Option<usize> {
    Some(to_be_aligned.checked_add(CHUNK_ALIGNMENT - 1)? & !(CHUNK_ALIGNMENT - 1))
}

/// Rounds `value` down to a multiple of [`CHUNK_ALIGNMENT`].
#[inline]
pub(crate) const fn align_down(value: usize) -> usize {
    value & !(CHUNK_ALIGNMENT - 1)
}

#[inline]
pub(crate) fn is_aligned(value: usize) -> bool {
    value % CHUNK_ALIGNMENT == 0
}

/// Rounds `value` up to a multiple of `to`, which must be a power of two.
#[inline]
pub(crate) fn align_to(value: usize, to: usize) -> usize {
    (value + to - 1) & !(to - 1)
}
