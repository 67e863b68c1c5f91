//! RasterCache - disk-backed tile caching for very large raster images
//!
//! This library provides a two-tier tile cache: a bounded set of tiles is
//! kept resident in memory and the remainder is spilled to disk, so that
//! applications can work with tiled images far larger than available RAM.
//!
//! # High-Level API
//!
//! The [`cache::TileCache`] facade is the entry point:
//!
//! ```ignore
//! use rastercache::cache::{CacheConfig, TileCache};
//!
//! let cache = TileCache::new(CacheConfig::default().with_memory_capacity(256 * 1024 * 1024))?;
//!
//! cache.add(&image, 0, 0, tile_data);
//! if let Some(data) = cache.get_tile(image.as_ref(), 0, 0) {
//!     // tile was resident, or has been read back from disk
//! }
//! ```

pub mod cache;
pub mod image;
pub mod raster;

/// Version of the RasterCache library.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
