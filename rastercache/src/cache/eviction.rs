//! Eviction engine: threshold trims and admission-time room making.

use tracing::error;

use crate::cache::error::CacheError;
use crate::cache::id::TileId;
use crate::cache::store::CacheState;
use crate::cache::tile::TileAction;

impl CacheState {
    /// Sort the resident list by the current priority policy.
    ///
    /// The list is left unsorted between evictions; it is only brought into
    /// priority order here, when victims are about to be picked. The last
    /// element after sorting is the next victim.
    pub(crate) fn sort_resident(&mut self) {
        let mut list = std::mem::take(&mut self.sorted_resident);
        let tiles = &self.tiles;
        let policy = &self.policy;
        list.sort_by(|a, b| match (tiles.get(a), tiles.get(b)) {
            (Some(tile_a), Some(tile_b)) => policy.compare(tile_a, tile_b),
            _ => std::cmp::Ordering::Equal,
        });
        self.sorted_resident = list;
    }

    /// Bring current memory down to at most `threshold * capacity`.
    pub(crate) fn memory_control(&mut self) {
        let max_used = (self.mem_threshold as f64 * self.mem_capacity as f64) as u64;
        if self.cur_memory <= max_used {
            return;
        }

        self.sort_resident();
        while self.cur_memory > max_used {
            let Some(victim) = self.sorted_resident.last().cloned() else {
                break;
            };
            self.remove_resident(&victim, true);
        }
    }

    /// Free resident memory until `capacity - cur_memory >= required`.
    ///
    /// The threshold trim is the cheaper first resort; this is the hard
    /// fallback that frees a specific amount regardless of the threshold.
    /// The oversize check stays although admission filters oversize tiles
    /// first: it guards internal misuse.
    pub(crate) fn make_room(&mut self, required: u64) -> Result<(), CacheError> {
        if required > self.mem_capacity {
            return Err(CacheError::CapacityTooSmall {
                required,
                capacity: self.mem_capacity,
            });
        }

        self.sort_resident();
        while self.mem_capacity - self.cur_memory < required {
            let Some(victim) = self.sorted_resident.last().cloned() else {
                break;
            };
            self.remove_resident(&victim, true);
        }
        Ok(())
    }

    /// Evict (with write-back) until `cur_memory <= limit`.
    ///
    /// Used when the capacity itself has just been reduced, where
    /// `make_room` would refuse to run.
    pub(crate) fn shrink_to(&mut self, limit: u64) {
        self.sort_resident();
        while self.cur_memory > limit {
            let Some(victim) = self.sorted_resident.last().cloned() else {
                break;
            };
            self.remove_resident(&victim, true);
        }
    }

    /// Drop one tile from memory.
    ///
    /// With `write_back`, a writable payload is re-serialized before the
    /// memory copy is released. A failed write is logged and the eviction
    /// proceeds, so eviction loops always make progress.
    pub(crate) fn remove_resident(&mut self, id: &TileId, write_back: bool) {
        self.sorted_resident.retain(|key| key != id);
        let Some(data) = self.resident.remove(id) else {
            return;
        };
        let Some(tile) = self.tiles.get_mut(id) else {
            return;
        };

        self.cur_memory = self.cur_memory.saturating_sub(tile.size());

        if write_back {
            self.stats.evictions += 1;
            if tile.is_writable() {
                match tile.write_data(&data) {
                    Ok(()) => self.stats.disk_writes += 1,
                    Err(e) => {
                        self.stats.write_failures += 1;
                        error!(
                            tile_x = tile.tile_x(),
                            tile_y = tile.tile_y(),
                            error = %e,
                            "write-back failed, evicting anyway"
                        );
                    }
                }
            }
        }

        tile.set_action(TileAction::NonResident);
        self.notify(id);
    }
}
