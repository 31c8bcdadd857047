//! Opaque byte chunks, the `bytes` element type.
//!
//! A chunk is an immutable, cheaply sliceable view into shared bytes.
//! Slicing never copies; the underlying buffer lives until the last chunk
//! referencing it drops.

use std::fmt;
use std::sync::Arc;

/// An immutable chunk of bytes with zero-copy slicing.
#[derive(Clone, Default)]
pub struct Chunk {
    data: Arc<Vec<u8>>,
    offset: usize,
    length: usize,
}

impl Chunk {
    pub fn new(data: Vec<u8>) -> Self {
        let length = data.len();
        Chunk {
            data: Arc::new(data),
            offset: 0,
            length,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.length]
    }

    /// A sub-chunk of `length` bytes starting at `offset`, clamped to the
    /// chunk bounds.
    pub fn slice(&self, offset: usize, length: usize) -> Chunk {
        let offset = offset.min(self.length);
        let length = length.min(self.length - offset);
        Chunk {
            data: Arc::clone(&self.data),
            offset: self.offset + offset,
            length,
        }
    }

    /// Splits into the first `at` bytes and the rest.
    pub fn split_at(&self, at: usize) -> (Chunk, Chunk) {
        let at = at.min(self.length);
        (self.slice(0, at), self.slice(at, self.length - at))
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk({} bytes)", self.length)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(data: Vec<u8>) -> Self {
        Chunk::new(data)
    }
}

impl From<&[u8]> for Chunk {
    fn from(data: &[u8]) -> Self {
        Chunk::new(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_is_zero_copy() {
        let chunk = Chunk::new(vec![0, 1, 2, 3, 4, 5]);
        let sub = chunk.slice(2, 3);
        assert_eq!(sub.as_bytes(), &[2, 3, 4]);
        let subsub = sub.slice(1, 1);
        assert_eq!(subsub.as_bytes(), &[3]);
    }

    #[test]
    fn test_split_at() {
        let chunk = Chunk::new(vec![1, 2, 3]);
        let (head, rest) = chunk.split_at(2);
        assert_eq!(head.as_bytes(), &[1, 2]);
        assert_eq!(rest.as_bytes(), &[3]);
        let (all, none) = chunk.split_at(10);
        assert_eq!(all.len(), 3);
        assert!(none.is_empty());
    }

    #[test]
    fn test_clamping() {
        let chunk = Chunk::new(vec![1, 2, 3]);
        assert!(chunk.slice(5, 1).is_empty());
        assert_eq!(chunk.slice(1, 100).as_bytes(), &[2, 3]);
    }
}
