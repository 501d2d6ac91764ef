use std::fmt;

use crate::header::METADATA_SIZE;

/// State discriminant stored in every metadata prefix. Zero is deliberately
/// not a valid state, so freshly mapped (zeroed) memory never looks like a
/// chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkState {
    /// Linked into the free list, available for allocation.
    Free = 0xFE,
    /// Handed out to a caller and protected by the sentinel tag.
    Allocated = 0xA1,
}

impl ChunkState {
    /// Decodes the discriminant byte. `None` means the prefix is garbage.
    #[inline]
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b if b == Self::Free as u8 => Some(Self::Free),
            b if b == Self::Allocated as u8 => Some(Self::Allocated),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("free"),
            Self::Allocated => f.write_str("allocated"),
        }
    }
}

/// Arena-relative address of the first payload byte of an allocation. This is
/// what [`crate::Heap::allocate`] hands out and [`crate::Heap::release`] takes
/// back.
///
/// Anyone can build one from a raw offset (a shell reading addresses from the
/// user, for example), so the heap validates it on every use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PayloadAddress(usize);

impl PayloadAddress {
    #[inline]
    pub const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }

    /// Byte offset from the arena base.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// Offset of the metadata prefix that precedes this payload, if there is
    /// room for one.
    #[inline]
    pub(crate) fn chunk_offset(self) -> Option<usize> {
        self.0.checked_sub(METADATA_SIZE)
    }
}

impl fmt::Display for PayloadAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only description of one chunk, as reported by the introspection
/// iterators. `address` is the arena offset of the metadata prefix and `size`
/// is the payload capacity, prefix excluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkInfo {
    pub address: usize,
    pub size: usize,
    pub state: ChunkState,
}

impl ChunkInfo {
    /// Address handed out to the caller for this chunk.
    #[inline]
    pub fn payload(&self) -> PayloadAddress {
        PayloadAddress(self.address + METADATA_SIZE)
    }

    /// Offset of the first byte after this chunk, where the next one starts.
    #[inline]
    pub fn end(&self) -> usize {
        self.address + METADATA_SIZE + self.size
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == ChunkState::Free
    }
}

impl fmt::Display for ChunkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} chunk at {} with size {}", self.state, self.address, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_discriminant_rejects_zero_and_garbage() {
        assert_eq!(ChunkState::from_byte(0xFE), Some(ChunkState::Free));
        assert_eq!(ChunkState::from_byte(0xA1), Some(ChunkState::Allocated));
        assert_eq!(ChunkState::from_byte(0), None);
        assert_eq!(ChunkState::from_byte(0x69), None);
    }

    #[test]
    fn payload_sits_right_after_the_prefix() {
        let chunk = ChunkInfo {
            address: 48,
            size: 32,
            state: ChunkState::Allocated,
        };

        assert_eq!(chunk.payload().offset(), 48 + METADATA_SIZE);
        assert_eq!(chunk.payload().chunk_offset(), Some(48));
        assert_eq!(chunk.end(), 48 + METADATA_SIZE + 32);
        assert_eq!(PayloadAddress::from_offset(4).chunk_offset(), None);
    }
}
