//! Lifecycle notifications and cache inspection.

use crate::cache::id::TileId;
use crate::cache::tile::{DiskBackedTile, TileAction};

/// Immutable snapshot of a tile's state at the moment of a lifecycle event.
///
/// Snapshots carry no reference back into the cache, so observers cannot
/// mutate cache state through them.
#[derive(Debug, Clone)]
pub struct TileSnapshot {
    pub id: TileId,
    pub tile_x: i32,
    pub tile_y: i32,
    pub action: TileAction,
    pub size: u64,
    pub cached_to_disk: bool,
}

impl TileSnapshot {
    pub(crate) fn of(tile: &DiskBackedTile) -> Self {
        Self {
            id: tile.id().clone(),
            tile_x: tile.tile_x(),
            tile_y: tile.tile_y(),
            action: tile.action(),
            size: tile.size(),
            cached_to_disk: tile.cached_to_disk(),
        }
    }
}

/// Receives tile lifecycle events while diagnostics are enabled.
///
/// Notifications are emitted with the cache lock held: observers must return
/// promptly and must not call back into the cache from the notifying thread.
pub trait CacheObserver: Send + Sync {
    fn on_tile_event(&self, event: &TileSnapshot);
}

/// Visits every tile known to the cache.
///
/// Invoked under the cache lock by [`TileCache::accept`]; the same re-entry
/// restriction as for [`CacheObserver`] applies.
///
/// [`TileCache::accept`]: crate::cache::TileCache::accept
pub trait TileVisitor {
    fn visit(&mut self, tile: &DiskBackedTile, resident: bool);
}
