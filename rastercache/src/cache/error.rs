//! Cache error taxonomy.

use thiserror::Error;

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A caller supplied an unusable argument (e.g. mismatched array lengths).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation that requires a memory-resident tile was called on a
    /// tile that is not resident.
    #[error("tile ({tile_x}, {tile_y}) is not resident in memory")]
    TileNotResident { tile_x: i32, tile_y: i32 },

    /// I/O failure while reading or writing a tile payload on disk.
    #[error("disk cache failed {context}")]
    DiskCacheFailed {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// More room was requested than the cache's total memory capacity.
    #[error("{required} bytes requested but memory capacity is {capacity} bytes")]
    CapacityTooSmall { required: u64, capacity: u64 },
}
