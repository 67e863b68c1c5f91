//! Cache facade and shared state.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, error};

use crate::cache::autoflush::{AutoFlushDaemon, FlushClock};
use crate::cache::config::{CacheConfig, DEFAULT_MEMORY_THRESHOLD};
use crate::cache::error::CacheError;
use crate::cache::id::TileId;
use crate::cache::observer::{CacheObserver, TileSnapshot, TileVisitor};
use crate::cache::policy::{AccessTimePriority, TilePriority};
use crate::cache::stats::CacheStats;
use crate::cache::tile::{DiskBackedTile, TileAction, TileMetric};
use crate::image::RenderedImage;
use crate::raster::Raster;

/// All mutable cache state, guarded by a single lock.
///
/// Invariants: every resident key is also a tiles key; `cur_memory` equals
/// the sum of resident tile sizes; the sorted list holds exactly the
/// resident keys.
pub(crate) struct CacheState {
    pub(crate) tiles: HashMap<TileId, DiskBackedTile>,
    pub(crate) resident: HashMap<TileId, Raster>,
    pub(crate) sorted_resident: Vec<TileId>,
    pub(crate) cur_memory: u64,
    pub(crate) mem_capacity: u64,
    pub(crate) mem_threshold: f32,
    pub(crate) policy: Arc<dyn TilePriority>,
    pub(crate) observers: Vec<Arc<dyn CacheObserver>>,
    pub(crate) diagnostics: bool,
    pub(crate) stats: CacheStats,
}

impl CacheState {
    /// Try to make a tile resident, evicting others as needed.
    ///
    /// A tile larger than the whole capacity stays disk-only. Otherwise the
    /// threshold trim runs first for generous headroom, with the hard
    /// `make_room` as fallback.
    pub(crate) fn admit(&mut self, id: &TileId, data: &Raster) -> bool {
        let Some(size) = self.tiles.get(id).map(|tile| tile.size()) else {
            return false;
        };

        if size > self.mem_capacity {
            return false;
        }

        if size > self.mem_capacity - self.cur_memory {
            self.memory_control();
            if size > self.mem_capacity - self.cur_memory && self.make_room(size).is_err() {
                return false;
            }
        }

        self.resident.insert(id.clone(), data.clone());
        self.sorted_resident.push(id.clone());
        self.cur_memory += size;
        true
    }

    /// Drop all resident tiles without touching disk copies.
    pub(crate) fn flush_memory(&mut self) {
        self.resident.clear();
        self.sorted_resident.clear();
        self.cur_memory = 0;
    }

    /// Remove everything: resident tiles, tile records and disk copies.
    pub(crate) fn flush(&mut self) {
        self.flush_memory();

        let ids: Vec<TileId> = self.tiles.keys().cloned().collect();
        for id in &ids {
            if let Some(tile) = self.tiles.get_mut(id) {
                tile.delete_disk_copy();
                tile.set_action(TileAction::Removed);
            }
            self.notify(id);
        }
        self.tiles.clear();
    }

    /// Publish the tile's current state to observers, if diagnostics are on.
    pub(crate) fn notify(&self, id: &TileId) {
        if !self.diagnostics {
            return;
        }
        let Some(tile) = self.tiles.get(id) else {
            return;
        };
        let snapshot = TileSnapshot::of(tile);
        for observer in &self.observers {
            observer.on_tile_event(&snapshot);
        }
    }
}

fn grid_points(image: &dyn RenderedImage) -> impl Iterator<Item = (i32, i32)> {
    let min_x = image.min_tile_x();
    let min_y = image.min_tile_y();
    let num_x = image.num_x_tiles();
    let num_y = image.num_y_tiles();
    (0..num_y).flat_map(move |ny| (0..num_x).map(move |nx| (min_x + nx, min_y + ny)))
}

/// Two-tier tile cache.
///
/// A bounded subset of tiles is kept resident in memory; the remainder is
/// spilled to per-tile files in the spill directory. All operations are
/// thread-safe behind a single exclusive lock.
///
/// Dropping the cache cancels the auto-flush worker and removes every spill
/// file it created.
pub struct TileCache {
    state: Arc<Mutex<CacheState>>,
    clock: Arc<FlushClock>,
    daemon: Mutex<Option<AutoFlushDaemon>>,
    write_through: bool,
    spill_dir: PathBuf,
    // Keeps a private spill directory alive until the cache is dropped.
    _spill_guard: Option<TempDir>,
}

impl TileCache {
    /// Create a cache from the given configuration.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let (spill_dir, spill_guard) = match &config.spill_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| CacheError::DiskCacheFailed {
                    context: format!("creating spill directory {}", dir.display()),
                    source: e,
                })?;
                (dir.clone(), None)
            }
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("rastercache-")
                    .tempdir()
                    .map_err(|e| CacheError::DiskCacheFailed {
                        context: "creating spill directory".to_string(),
                        source: e,
                    })?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        let state = CacheState {
            tiles: HashMap::new(),
            resident: HashMap::new(),
            sorted_resident: Vec::new(),
            cur_memory: 0,
            mem_capacity: config.memory_capacity,
            mem_threshold: DEFAULT_MEMORY_THRESHOLD,
            policy: Arc::new(AccessTimePriority),
            observers: Vec::new(),
            diagnostics: false,
            stats: CacheStats::default(),
        };

        let cache = Self {
            state: Arc::new(Mutex::new(state)),
            clock: Arc::new(FlushClock::new(config.auto_flush_interval)),
            daemon: Mutex::new(None),
            write_through: config.write_through,
            spill_dir,
            _spill_guard: spill_guard,
        };

        debug!(
            capacity_bytes = config.memory_capacity,
            write_through = config.write_through,
            spill_dir = %cache.spill_dir.display(),
            "tile cache created"
        );

        if config.auto_flush {
            cache.set_auto_flush_enabled(true);
        }

        Ok(cache)
    }

    /// Create a cache with all settings at their defaults.
    pub fn with_defaults() -> Result<Self, CacheError> {
        Self::new(CacheConfig::default())
    }

    /// Add a tile to the cache if not already present.
    pub fn add(&self, owner: &Arc<dyn RenderedImage>, tile_x: i32, tile_y: i32, data: Raster) {
        self.add_with_metric(owner, tile_x, tile_y, data, None);
    }

    /// Add a tile with an optional metric tag for custom priority policies.
    ///
    /// A second add of the same tile is ignored. In write-through mode the
    /// payload is written to disk before this returns. A tile that does not
    /// fit in memory is always spilled, so it stays reachable. I/O failures
    /// are logged, not surfaced.
    pub fn add_with_metric(
        &self,
        owner: &Arc<dyn RenderedImage>,
        tile_x: i32,
        tile_y: i32,
        data: Raster,
        metric: Option<TileMetric>,
    ) {
        self.clock.touch();
        let id = TileId::for_tile(owner.as_ref(), tile_x, tile_y);
        let mut state = self.state.lock().unwrap();

        if state.tiles.contains_key(&id) {
            return;
        }

        let mut tile = DiskBackedTile::new(
            id.clone(),
            Arc::downgrade(owner),
            tile_x,
            tile_y,
            &data,
            self.spill_dir.clone(),
            metric,
        );

        let mut written = false;
        if self.write_through {
            match tile.write_data(&data) {
                Ok(()) => {
                    written = true;
                    state.stats.disk_writes += 1;
                }
                Err(e) => {
                    state.stats.write_failures += 1;
                    error!(tile_x, tile_y, error = %e, "unable to cache tile on disk");
                }
            }
        }

        state.tiles.insert(id.clone(), tile);

        if state.admit(&id, &data) {
            if let Some(tile) = state.tiles.get_mut(&id) {
                tile.set_action(TileAction::AddedResident);
            }
        } else {
            // A tile that is neither resident nor on disk would be
            // unreachable, so a non-admitted tile is always spilled.
            if !written {
                match state.tiles.get_mut(&id).map(|tile| tile.write_data(&data)) {
                    Some(Ok(())) => state.stats.disk_writes += 1,
                    Some(Err(e)) => {
                        state.stats.write_failures += 1;
                        error!(tile_x, tile_y, error = %e, "unable to cache tile on disk, discarding");
                        state.tiles.remove(&id);
                        return;
                    }
                    None => return,
                }
            }
            if let Some(tile) = state.tiles.get_mut(&id) {
                tile.set_action(TileAction::Added);
            }
        }

        state.notify(&id);
    }

    /// Remove a tile from the cache. No-op if the tile is unknown.
    ///
    /// The tile's disk copy, if any, is deleted.
    pub fn remove(&self, owner: &dyn RenderedImage, tile_x: i32, tile_y: i32) {
        self.clock.touch();
        let id = TileId::for_tile(owner, tile_x, tile_y);
        let mut state = self.state.lock().unwrap();

        if !state.tiles.contains_key(&id) {
            return;
        }

        state.remove_resident(&id, false);
        if let Some(tile) = state.tiles.get_mut(&id) {
            tile.delete_disk_copy();
            tile.set_action(TileAction::Removed);
        }
        state.notify(&id);
        state.tiles.remove(&id);
    }

    /// Get a tile's payload.
    ///
    /// A resident tile is returned directly. A spilled tile is read back
    /// from disk and promoted to memory as space allows; the payload is
    /// returned even when promotion is not possible. Returns `None` for an
    /// unknown tile, or one whose data was flushed before ever reaching
    /// disk.
    pub fn get_tile(&self, owner: &dyn RenderedImage, tile_x: i32, tile_y: i32) -> Option<Raster> {
        self.clock.touch();
        let id = TileId::for_tile(owner, tile_x, tile_y);
        let mut state = self.state.lock().unwrap();

        if !state.tiles.contains_key(&id) {
            state.stats.misses += 1;
            return None;
        }

        let data = match state.resident.get(&id).cloned() {
            Some(data) => {
                state.stats.memory_hits += 1;
                data
            }
            None => {
                let Some(data) = state.tiles.get(&id).and_then(|tile| tile.read_data()) else {
                    state.stats.misses += 1;
                    return None;
                };
                state.stats.disk_hits += 1;
                if state.admit(&id, &data) {
                    if let Some(tile) = state.tiles.get_mut(&id) {
                        tile.set_action(TileAction::Resident);
                    }
                    state.notify(&id);
                }
                data
            }
        };

        if let Some(tile) = state.tiles.get_mut(&id) {
            tile.set_action(TileAction::Accessed);
            tile.touch();
        }
        state.notify(&id);

        Some(data)
    }

    /// Get every cached tile of `owner`, reading spilled ones as needed.
    pub fn get_tiles(&self, owner: &dyn RenderedImage) -> Vec<Raster> {
        self.clock.touch();
        let mut state = self.state.lock().unwrap();
        let mut out = Vec::new();

        for (x, y) in grid_points(owner) {
            let id = TileId::for_tile(owner, x, y);
            if !state.tiles.contains_key(&id) {
                continue;
            }

            let data = match state.resident.get(&id).cloned() {
                Some(data) => {
                    state.stats.memory_hits += 1;
                    data
                }
                None => {
                    let Some(data) = state.tiles.get(&id).and_then(|tile| tile.read_data()) else {
                        continue;
                    };
                    state.stats.disk_hits += 1;
                    if state.admit(&id, &data) {
                        if let Some(tile) = state.tiles.get_mut(&id) {
                            tile.set_action(TileAction::Resident);
                        }
                        state.notify(&id);
                    }
                    data
                }
            };

            if let Some(tile) = state.tiles.get_mut(&id) {
                tile.set_action(TileAction::Accessed);
                tile.touch();
            }
            state.notify(&id);
            out.push(data);
        }

        out
    }

    /// Get the tiles at the given points; `None` per point that misses.
    pub fn get_tiles_at(
        &self,
        owner: &dyn RenderedImage,
        points: &[(i32, i32)],
    ) -> Vec<Option<Raster>> {
        points
            .iter()
            .map(|&(x, y)| self.get_tile(owner, x, y))
            .collect()
    }

    /// Add one tile per point.
    ///
    /// Fails without adding anything when the two slices differ in length.
    pub fn add_tiles(
        &self,
        owner: &Arc<dyn RenderedImage>,
        points: &[(i32, i32)],
        data: &[Raster],
        metric: Option<TileMetric>,
    ) -> Result<(), CacheError> {
        if points.len() != data.len() {
            return Err(CacheError::InvalidArgument(format!(
                "points and data must be the same length ({} != {})",
                points.len(),
                data.len()
            )));
        }

        for (&(x, y), raster) in points.iter().zip(data) {
            self.add_with_metric(owner, x, y, raster.clone(), metric.clone());
        }
        Ok(())
    }

    /// Remove every tile of `owner`'s grid from the cache.
    pub fn remove_tiles(&self, owner: &dyn RenderedImage) {
        for (x, y) in grid_points(owner) {
            self.remove(owner, x, y);
        }
    }

    /// Remove every tile whose owning image has been dropped.
    pub fn remove_orphaned_tiles(&self) {
        let mut state = self.state.lock().unwrap();

        let orphaned: Vec<TileId> = state
            .tiles
            .iter()
            .filter(|(_, tile)| tile.owner().is_none())
            .map(|(id, _)| id.clone())
            .collect();

        for id in orphaned {
            if state.resident.remove(&id).is_some() {
                state.sorted_resident.retain(|key| key != &id);
                let size = state.tiles.get(&id).map(|tile| tile.size()).unwrap_or(0);
                state.cur_memory = state.cur_memory.saturating_sub(size);
            }
            if let Some(tile) = state.tiles.get_mut(&id) {
                tile.delete_disk_copy();
            }
            state.tiles.remove(&id);
        }
    }

    /// Remove all tiles, deleting every disk copy.
    pub fn flush(&self) {
        self.state.lock().unwrap().flush();
    }

    /// Drop all resident tiles from memory without touching disk copies.
    pub fn flush_memory(&self) {
        self.state.lock().unwrap().flush_memory();
    }

    /// Trim resident memory to the threshold fraction of capacity.
    pub fn memory_control(&self) {
        self.state.lock().unwrap().memory_control();
    }

    /// Reset the memory capacity.
    ///
    /// Zero flushes all resident tiles. A capacity below current residency
    /// evicts (with write-back) until satisfied.
    pub fn set_memory_capacity(&self, capacity: u64) {
        let mut state = self.state.lock().unwrap();
        let old_capacity = state.mem_capacity;
        state.mem_capacity = capacity;

        if capacity == 0 {
            state.flush_memory();
        } else if capacity < old_capacity && state.cur_memory > capacity {
            // Evict directly: make_room refuses to run against the
            // just-reduced capacity.
            state.shrink_to(capacity);
        }
    }

    pub fn memory_capacity(&self) -> u64 {
        self.state.lock().unwrap().mem_capacity
    }

    pub fn current_memory(&self) -> u64 {
        self.state.lock().unwrap().cur_memory
    }

    /// Set the retained fraction of memory, clamped to [0.0, 1.0], and trim
    /// to it immediately.
    pub fn set_memory_threshold(&self, threshold: f32) {
        let mut state = self.state.lock().unwrap();
        state.mem_threshold = threshold.clamp(0.0, 1.0);
        state.memory_control();
    }

    pub fn memory_threshold(&self) -> f32 {
        self.state.lock().unwrap().mem_threshold
    }

    /// Replace the priority policy; `None` restores the default
    /// least-recently-accessed order. The resident list is rebuilt from the
    /// current resident set.
    pub fn set_tile_priority(&self, policy: Option<Arc<dyn TilePriority>>) {
        let mut state = self.state.lock().unwrap();
        state.policy = policy.unwrap_or_else(|| Arc::new(AccessTimePriority));
        state.sorted_resident = state.resident.keys().cloned().collect();
        state.sort_resident();
    }

    pub fn tile_priority(&self) -> Arc<dyn TilePriority> {
        Arc::clone(&self.state.lock().unwrap().policy)
    }

    /// Refresh the disk copy of a resident tile whose data has changed.
    ///
    /// Tiles without a disk copy are left alone. Fails if the tile is not
    /// resident, or if the write fails.
    pub fn set_tile_changed(
        &self,
        owner: &dyn RenderedImage,
        tile_x: i32,
        tile_y: i32,
    ) -> Result<(), CacheError> {
        self.clock.touch();
        let id = TileId::for_tile(owner, tile_x, tile_y);
        let mut state = self.state.lock().unwrap();

        let Some(data) = state.resident.get(&id).cloned() else {
            return Err(CacheError::TileNotResident { tile_x, tile_y });
        };

        if let Some(tile) = state.tiles.get_mut(&id) {
            if tile.cached_to_disk() {
                tile.write_data(&data)?;
                state.stats.disk_writes += 1;
            }
        }
        Ok(())
    }

    pub fn contains_tile(&self, owner: &dyn RenderedImage, tile_x: i32, tile_y: i32) -> bool {
        let id = TileId::for_tile(owner, tile_x, tile_y);
        self.state.lock().unwrap().tiles.contains_key(&id)
    }

    pub fn contains_resident_tile(
        &self,
        owner: &dyn RenderedImage,
        tile_x: i32,
        tile_y: i32,
    ) -> bool {
        let id = TileId::for_tile(owner, tile_x, tile_y);
        self.state.lock().unwrap().resident.contains_key(&id)
    }

    /// Total number of tiles known to the cache.
    pub fn num_tiles(&self) -> usize {
        self.state.lock().unwrap().tiles.len()
    }

    /// Number of tiles currently resident in memory.
    pub fn num_resident_tiles(&self) -> usize {
        self.state.lock().unwrap().resident.len()
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> CacheStats {
        self.state.lock().unwrap().stats.clone()
    }

    /// Enable or disable publishing of lifecycle events to observers.
    pub fn set_diagnostics(&self, enabled: bool) {
        self.state.lock().unwrap().diagnostics = enabled;
    }

    /// Register an observer for lifecycle events.
    pub fn add_observer(&self, observer: Arc<dyn CacheObserver>) {
        self.state.lock().unwrap().observers.push(observer);
    }

    /// Call `visitor` once for every tile known to the cache.
    pub fn accept(&self, visitor: &mut dyn TileVisitor) {
        let state = self.state.lock().unwrap();
        for (id, tile) in &state.tiles {
            visitor.visit(tile, state.resident.contains_key(id));
        }
    }

    /// Enable or disable the auto-flush worker. Both directions are
    /// idempotent.
    pub fn set_auto_flush_enabled(&self, enabled: bool) {
        let mut daemon = self.daemon.lock().unwrap();
        if enabled {
            if daemon.is_none() {
                *daemon = Some(AutoFlushDaemon::start(
                    Arc::downgrade(&self.state),
                    Arc::clone(&self.clock),
                ));
            }
        } else if let Some(daemon) = daemon.take() {
            daemon.shutdown();
        }
    }

    pub fn is_auto_flush_enabled(&self) -> bool {
        self.daemon.lock().unwrap().is_some()
    }

    pub fn auto_flush_interval(&self) -> Duration {
        self.clock.interval()
    }

    /// Change the auto-flush interval. Zero is ignored. A running worker is
    /// restarted with the new period.
    pub fn set_auto_flush_interval(&self, interval: Duration) {
        if interval.is_zero() || interval == self.clock.interval() {
            return;
        }
        self.clock.set_interval(interval);
        self.clock.touch();

        let mut daemon = self.daemon.lock().unwrap();
        if daemon.is_some() {
            *daemon = None; // joins the old worker
            *daemon = Some(AutoFlushDaemon::start(
                Arc::downgrade(&self.state),
                Arc::clone(&self.clock),
            ));
        }
    }
}

impl Drop for TileCache {
    fn drop(&mut self) {
        if let Ok(mut daemon) = self.daemon.lock() {
            daemon.take();
        }
        // Best-effort teardown: every spill file this cache created is
        // deleted with it.
        if let Ok(mut state) = self.state.lock() {
            state.flush();
        }
    }
}
