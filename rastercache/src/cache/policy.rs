//! Priority order for resident tiles.

use std::cmp::Ordering;

use crate::cache::tile::DiskBackedTile;

/// Total order over resident tiles used to pick eviction victims.
///
/// The eviction engine sorts the resident list with this order and always
/// takes the *last* element as the next victim. Ties are allowed; the sort
/// is stable, so tied tiles keep their relative order within a single pass.
pub trait TilePriority: Send + Sync {
    fn compare(&self, a: &DiskBackedTile, b: &DiskBackedTile) -> Ordering;
}

/// Default priority: most recently accessed tiles sort first, so the tile
/// that has gone longest without an access is evicted first.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessTimePriority;

impl TilePriority for AccessTimePriority {
    fn compare(&self, a: &DiskBackedTile, b: &DiskBackedTile) -> Ordering {
        b.last_access().cmp(&a.last_access())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::cache::id::TileId;
    use crate::image::{ImageId, RenderedImage, SampleModel, SampleType};
    use crate::raster::Raster;

    struct NeverImage;

    impl RenderedImage for NeverImage {
        fn image_id(&self) -> ImageId {
            ImageId::Packed(0)
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
            1
        }
        fn num_y_tiles(&self) -> i32 {
            1
        }
    }

    fn tile_accessed_at(index: u64, at: Instant) -> DiskBackedTile {
        let mut tile = DiskBackedTile::new(
            TileId::Packed(index),
            Weak::<NeverImage>::new(),
            index as i32,
            0,
            &Raster::new(vec![0u8; 8]),
            std::env::temp_dir(),
            None,
        );
        tile.set_last_access(at);
        tile
    }

    #[test]
    fn oldest_access_sorts_last() {
        let now = Instant::now();
        let old = tile_accessed_at(0, now - Duration::from_secs(10));
        let recent = tile_accessed_at(1, now);

        let policy = AccessTimePriority;
        assert_eq!(policy.compare(&recent, &old), Ordering::Less);
        assert_eq!(policy.compare(&old, &recent), Ordering::Greater);
    }

    #[test]
    fn equal_access_times_tie() {
        let now = Instant::now();
        let a = tile_accessed_at(0, now);
        let b = tile_accessed_at(1, now);
        assert_eq!(AccessTimePriority.compare(&a, &b), Ordering::Equal);
    }
}
