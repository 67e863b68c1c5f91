//! Per-tile record with disk spill support.

use std::any::Any;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Instant;

use tempfile::NamedTempFile;
use tracing::warn;

use crate::cache::error::CacheError;
use crate::cache::id::TileId;
use crate::image::RenderedImage;
use crate::raster::Raster;

/// Lifecycle label of a cached tile, reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileAction {
    /// Added to the cache without becoming resident.
    Added,
    /// Added to the cache and made resident.
    AddedResident,
    /// Read back from disk and made resident.
    Resident,
    /// Evicted from memory.
    NonResident,
    /// Returned by a lookup.
    Accessed,
    /// Removed from the cache.
    Removed,
}

/// Opaque user-supplied tag, available to custom [`TilePriority`]
/// implementations for priority decisions.
///
/// [`TilePriority`]: crate::cache::TilePriority
pub type TileMetric = Arc<dyn Any + Send + Sync>;

/// A tile known to the cache: metadata plus an optional on-disk copy.
///
/// The cache owns every `DiskBackedTile` and the backing file it creates.
/// The owning image is referenced weakly; a collected owner does not break
/// the record.
pub struct DiskBackedTile {
    id: TileId,
    owner: Weak<dyn RenderedImage>,
    tile_x: i32,
    tile_y: i32,
    size: u64,
    writable: bool,
    disk_file: Option<PathBuf>,
    last_access: Instant,
    action: TileAction,
    metric: Option<TileMetric>,
    spill_dir: PathBuf,
}

impl DiskBackedTile {
    pub(crate) fn new(
        id: TileId,
        owner: Weak<dyn RenderedImage>,
        tile_x: i32,
        tile_y: i32,
        data: &Raster,
        spill_dir: PathBuf,
        metric: Option<TileMetric>,
    ) -> Self {
        Self {
            id,
            owner,
            tile_x,
            tile_y,
            size: data.size(),
            writable: data.is_writable(),
            disk_file: None,
            last_access: Instant::now(),
            action: TileAction::Added,
            metric,
            spill_dir,
        }
    }

    pub fn id(&self) -> &TileId {
        &self.id
    }

    /// The owning image, if it is still alive.
    pub fn owner(&self) -> Option<Arc<dyn RenderedImage>> {
        self.owner.upgrade()
    }

    pub fn tile_x(&self) -> i32 {
        self.tile_x
    }

    pub fn tile_y(&self) -> i32 {
        self.tile_y
    }

    /// Payload size in bytes, fixed at construction.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the payload can be re-serialized at eviction time.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Path of the persisted copy, if one exists.
    pub fn disk_file(&self) -> Option<&Path> {
        self.disk_file.as_deref()
    }

    /// Whether a persisted copy exists.
    pub fn cached_to_disk(&self) -> bool {
        self.disk_file.is_some()
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn action(&self) -> TileAction {
        self.action
    }

    /// The user-supplied metric tag, if any.
    pub fn metric(&self) -> Option<&TileMetric> {
        self.metric.as_ref()
    }

    pub(crate) fn set_action(&mut self, action: TileAction) {
        self.action = action;
    }

    pub(crate) fn set_last_access(&mut self, at: Instant) {
        self.last_access = at;
    }

    pub(crate) fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    /// Serialize the payload to this tile's backing file.
    ///
    /// The data is written to a fresh temporary file which is then renamed
    /// over the target, so an existing copy stays intact if the write fails.
    pub(crate) fn write_data(&mut self, data: &Raster) -> Result<(), CacheError> {
        let target = match &self.disk_file {
            Some(path) => path.clone(),
            None => self.spill_dir.join(format!("{}.tile", self.id)),
        };

        let mut file = NamedTempFile::new_in(&self.spill_dir)
            .map_err(|e| self.disk_error("creating spill file", e))?;
        file.write_all(data.as_bytes())
            .map_err(|e| self.disk_error("writing spill file", e))?;
        file.persist(&target)
            .map_err(|e| self.disk_error("renaming spill file", e.error))?;

        self.disk_file = Some(target);
        Ok(())
    }

    /// Read the payload back from the persisted copy.
    ///
    /// Returns `None` when no copy exists or the file cannot be read; the
    /// caller treats either as a cache miss.
    pub(crate) fn read_data(&self) -> Option<Raster> {
        let path = self.disk_file.as_deref()?;
        match fs::read(path) {
            Ok(data) => {
                if self.writable {
                    Some(Raster::writable(data))
                } else {
                    Some(Raster::new(data))
                }
            }
            Err(e) => {
                warn!(
                    tile_x = self.tile_x,
                    tile_y = self.tile_y,
                    path = %path.display(),
                    error = %e,
                    "failed to read spilled tile"
                );
                None
            }
        }
    }

    /// Best-effort removal of the backing file.
    pub(crate) fn delete_disk_copy(&mut self) {
        if let Some(path) = self.disk_file.take() {
            let _ = fs::remove_file(&path);
        }
    }

    fn disk_error(&self, context: &str, source: std::io::Error) -> CacheError {
        CacheError::DiskCacheFailed {
            context: format!("{} for tile ({}, {})", context, self.tile_x, self.tile_y),
            source,
        }
    }
}

impl std::fmt::Debug for DiskBackedTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBackedTile")
            .field("id", &self.id)
            .field("tile_x", &self.tile_x)
            .field("tile_y", &self.tile_y)
            .field("size", &self.size)
            .field("writable", &self.writable)
            .field("disk_file", &self.disk_file)
            .field("action", &self.action)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_tile(dir: &TempDir, data: &Raster) -> DiskBackedTile {
        DiskBackedTile::new(
            TileId::Packed(1),
            Weak::<NeverImage>::new(),
            0,
            0,
            data,
            dir.path().to_path_buf(),
            None,
        )
    }

    struct NeverImage;

    impl RenderedImage for NeverImage {
        fn image_id(&self) -> crate::image::ImageId {
            crate::image::ImageId::Packed(0)
        }
        fn sample_model(&self) -> crate::image::SampleModel {
            crate::image::SampleModel {
                sample_type: crate::image::SampleType::U8,
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

    #[test]
    fn new_tile_has_no_disk_copy() {
        let dir = TempDir::new().unwrap();
        let tile = create_test_tile(&dir, &Raster::new(vec![1, 2, 3]));

        assert!(!tile.cached_to_disk());
        assert_eq!(tile.size(), 3);
        assert_eq!(tile.action(), TileAction::Added);
        assert!(tile.read_data().is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let data = Raster::writable(vec![9u8; 64]);
        let mut tile = create_test_tile(&dir, &data);

        tile.write_data(&data).unwrap();
        assert!(tile.cached_to_disk());
        assert!(tile.disk_file().unwrap().exists());

        let read_back = tile.read_data().unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let first = Raster::writable(vec![1u8; 16]);
        let mut tile = create_test_tile(&dir, &first);

        tile.write_data(&first).unwrap();
        let path = tile.disk_file().unwrap().to_path_buf();

        let second = Raster::writable(vec![2u8; 16]);
        tile.write_data(&second).unwrap();

        // Same backing file, new contents.
        assert_eq!(tile.disk_file().unwrap(), path);
        assert_eq!(tile.read_data().unwrap(), second);
    }

    #[test]
    fn delete_disk_copy_removes_file() {
        let dir = TempDir::new().unwrap();
        let data = Raster::writable(vec![5u8; 8]);
        let mut tile = create_test_tile(&dir, &data);

        tile.write_data(&data).unwrap();
        let path = tile.disk_file().unwrap().to_path_buf();
        assert!(path.exists());

        tile.delete_disk_copy();
        assert!(!tile.cached_to_disk());
        assert!(!path.exists());
        assert!(tile.read_data().is_none());
    }

    #[test]
    fn delete_without_copy_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let mut tile = create_test_tile(&dir, &Raster::new(vec![1]));
        tile.delete_disk_copy();
        assert!(!tile.cached_to_disk());
    }

    #[test]
    fn read_preserves_writability() {
        let dir = TempDir::new().unwrap();
        let data = Raster::writable(vec![3u8; 4]);
        let mut tile = create_test_tile(&dir, &data);
        tile.write_data(&data).unwrap();

        assert!(tile.read_data().unwrap().is_writable());
    }

    #[test]
    fn collected_owner_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let tile = create_test_tile(&dir, &Raster::new(vec![1]));
        assert!(tile.owner().is_none());
    }

    #[test]
    fn touch_advances_last_access() {
        let dir = TempDir::new().unwrap();
        let mut tile = create_test_tile(&dir, &Raster::new(vec![1]));
        let before = tile.last_access();
        std::thread::sleep(std::time::Duration::from_millis(5));
        tile.touch();
        assert!(tile.last_access() > before);
    }
}
