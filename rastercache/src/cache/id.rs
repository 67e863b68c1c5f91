//! Tile identity derivation.

use std::fmt;

use crate::image::{ImageId, RenderedImage};

/// Unique identifier of a tile within the cache.
///
/// Derived from the owning image's identity plus the tile's position in the
/// image grid. Stable while the owning image is alive, and distinct across
/// `(image, x, y)` triples.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TileId {
    /// The image's wide identity bytes followed by 8 big-endian bytes of the
    /// 64-bit tile index.
    Wide(Box<[u8]>),
    /// 32-bit image identity in the upper half, 32-bit tile index in the
    /// lower half.
    Packed(u64),
}

impl TileId {
    /// Derive the id of tile `(tile_x, tile_y)` of `owner`.
    ///
    /// The wide branch is used whenever the image exposes a wide identity,
    /// so images that happen to share a 32-bit identity remain
    /// distinguishable.
    pub fn for_tile(owner: &dyn RenderedImage, tile_x: i32, tile_y: i32) -> TileId {
        let tile_index = tile_y as i64 * owner.num_x_tiles() as i64 + tile_x as i64;

        match owner.image_id() {
            ImageId::Wide(image_id) => {
                let mut buf = Vec::with_capacity(image_id.len() + 8);
                buf.extend_from_slice(&image_id);
                buf.extend_from_slice(&(tile_index as u64).to_be_bytes());
                TileId::Wide(buf.into_boxed_slice())
            }
            ImageId::Packed(image_id) => {
                let index = (tile_index as u64) & 0xffff_ffff;
                TileId::Packed(((image_id as u64) << 32) | index)
            }
        }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileId::Packed(value) => write!(f, "{value:016x}"),
            TileId::Wide(bytes) => {
                for byte in bytes.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{SampleModel, SampleType};

    struct StubImage {
        id: ImageId,
        num_x: i32,
    }

    impl RenderedImage for StubImage {
        fn image_id(&self) -> ImageId {
            self.id.clone()
        }
        fn sample_model(&self) -> SampleModel {
            SampleModel {
                sample_type: SampleType::U8,
                bands: 1,
            }
        }
        fn min_tile_x(&self) -> i32 {
            0
        }
        fn min_tile_y(&self) -> i32 {
            0
        }
        fn num_x_tiles(&self) -> i32 {
            self.num_x
        }
        fn num_y_tiles(&self) -> i32 {
            4
        }
    }

    #[test]
    fn packed_layout() {
        let image = StubImage {
            id: ImageId::Packed(0xabcd),
            num_x: 10,
        };
        // tile index = 2 * 10 + 3 = 23
        let id = TileId::for_tile(&image, 3, 2);
        assert_eq!(id, TileId::Packed((0xabcd_u64 << 32) | 23));
    }

    #[test]
    fn wide_layout_appends_tile_index() {
        let image = StubImage {
            id: ImageId::Wide(vec![0x01, 0x02, 0x03]),
            num_x: 10,
        };
        let id = TileId::for_tile(&image, 3, 2);
        let TileId::Wide(bytes) = id else {
            panic!("expected wide id");
        };
        assert_eq!(&bytes[..3], &[0x01, 0x02, 0x03]);
        assert_eq!(&bytes[3..], &23u64.to_be_bytes());
    }

    #[test]
    fn derivation_is_deterministic() {
        let image = StubImage {
            id: ImageId::Packed(42),
            num_x: 8,
        };
        assert_eq!(TileId::for_tile(&image, 1, 1), TileId::for_tile(&image, 1, 1));
    }

    #[test]
    fn distinct_positions_get_distinct_ids() {
        let image = StubImage {
            id: ImageId::Packed(42),
            num_x: 8,
        };
        let mut ids = vec![];
        for y in 0..4 {
            for x in 0..8 {
                ids.push(TileId::for_tile(&image, x, y));
            }
        }
        let count = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), count);
    }

    #[test]
    fn same_packed_identity_collides_wide_does_not() {
        let a = StubImage {
            id: ImageId::Wide(vec![0x00, 0x07]),
            num_x: 8,
        };
        let b = StubImage {
            id: ImageId::Wide(vec![0x01, 0x07]),
            num_x: 8,
        };
        assert_ne!(TileId::for_tile(&a, 0, 0), TileId::for_tile(&b, 0, 0));
    }

    #[test]
    fn display_is_hex() {
        let id = TileId::Packed(0x1f);
        assert_eq!(id.to_string(), "000000000000001f");
        let id = TileId::Wide(vec![0xab, 0x01].into_boxed_slice());
        assert_eq!(id.to_string(), "ab01");
    }
}
