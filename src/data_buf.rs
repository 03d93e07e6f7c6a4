use std::ops::{Deref, DerefMut};

/// An owned, sized byte buffer.
///
/// A `DataBuf` returned by a read holds exactly the bytes that were
/// available, which may be fewer than were requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBuf {
    data: Vec<u8>,
}

#[allow(clippy::len_without_is_empty)]
impl DataBuf {
    /// Allocate a zero-filled buffer of `size` bytes.
    #[inline]
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0_u8; size],
        }
    }

    /// Copy `bytes` into a new buffer.
    #[inline]
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
        }
    }

    /// Returns the logical size of the buffer.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Shrink the logical size to `size` after a short read. Has no effect if
    /// `size` is not smaller than the current size.
    #[inline]
    pub fn truncate(&mut self, size: usize) {
        self.data.truncate(size);
    }

    /// Give up the buffer, returning its bytes.
    #[inline]
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl Deref for DataBuf {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for DataBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl From<Vec<u8>> for DataBuf {
    #[inline]
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}
