//! Opaque tile payload.

use bytes::Bytes;

/// Tile payload: an opaque byte container with a declared writability.
///
/// The cache treats the payload as a whole; the disk serializer reads and
/// writes it in one piece. Cloning is cheap (the underlying buffer is
/// reference-counted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    data: Bytes,
    writable: bool,
}

impl Raster {
    /// Create a read-only payload.
    ///
    /// Read-only payloads are never re-serialized at eviction time: if the
    /// tile has no disk copy by then, its data is dropped.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            writable: false,
        }
    }

    /// Create a writable payload.
    ///
    /// Writable payloads are written back to disk when the tile is evicted
    /// from memory.
    pub fn writable(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            writable: true,
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the payload can be re-serialized.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// The raw payload bytes.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_by_default() {
        let raster = Raster::new(vec![1, 2, 3]);
        assert!(!raster.is_writable());
        assert_eq!(raster.size(), 3);
    }

    #[test]
    fn writable_constructor() {
        let raster = Raster::writable(vec![0u8; 10]);
        assert!(raster.is_writable());
        assert_eq!(raster.size(), 10);
    }

    #[test]
    fn clone_shares_payload() {
        let raster = Raster::new(vec![5u8; 1000]);
        let copy = raster.clone();
        assert_eq!(raster, copy);
        assert_eq!(copy.as_bytes(), raster.as_bytes());
    }
}
