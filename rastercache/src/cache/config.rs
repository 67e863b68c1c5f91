//! Configuration for the tile cache.

use std::path::PathBuf;
use std::time::Duration;

/// The default memory capacity in bytes (64 MiB).
pub const DEFAULT_MEMORY_CAPACITY: u64 = 64 * 1024 * 1024;

/// The default memory threshold: fraction of capacity retained after a
/// threshold trim.
pub const DEFAULT_MEMORY_THRESHOLD: f32 = 0.75;

/// The default interval after which an idle cache flushes its resident
/// tiles, when auto-flush is enabled.
pub const DEFAULT_AUTO_FLUSH_INTERVAL: Duration = Duration::from_millis(2500);

/// Construction-time settings for a [`TileCache`](crate::cache::TileCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum memory for resident tiles, in bytes.
    pub memory_capacity: u64,
    /// Write newly added tiles to disk immediately instead of deferring
    /// until eviction.
    pub write_through: bool,
    /// Start the auto-flush worker when the cache is created.
    pub auto_flush: bool,
    /// Idle window and period of the auto-flush worker.
    pub auto_flush_interval: Duration,
    /// Directory for spilled tiles. When `None`, a process-private temporary
    /// directory is created and removed with the cache.
    pub spill_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            write_through: false,
            auto_flush: false,
            auto_flush_interval: DEFAULT_AUTO_FLUSH_INTERVAL,
            spill_dir: None,
        }
    }
}

impl CacheConfig {
    /// Set the memory capacity in bytes.
    pub fn with_memory_capacity(mut self, bytes: u64) -> Self {
        self.memory_capacity = bytes;
        self
    }

    /// Enable or disable write-through on add.
    pub fn with_write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    /// Enable or disable auto-flush at construction.
    pub fn with_auto_flush(mut self, enabled: bool) -> Self {
        self.auto_flush = enabled;
        self
    }

    /// Set the auto-flush interval. `Duration::ZERO` is ignored.
    pub fn with_auto_flush_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.auto_flush_interval = interval;
        }
        self
    }

    /// Set an explicit spill directory.
    pub fn with_spill_dir(mut self, dir: PathBuf) -> Self {
        self.spill_dir = Some(dir);
        self
    }

    /// Overlay loosely-typed options onto the defaults.
    ///
    /// This is the boundary parser for host applications that configure the
    /// cache from string-keyed maps. Recognized keys are `memcapacity`
    /// (bytes), `diskcache` (bool), `enableautoflush` (bool) and
    /// `autoflushinterval` (milliseconds, must be positive). Unknown keys
    /// and unparseable values are ignored and the defaults apply.
    pub fn from_options<'a, I>(options: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();

        for (key, value) in options {
            let value = value.trim();
            match key {
                "memcapacity" => {
                    if let Ok(bytes) = value.parse::<u64>() {
                        config.memory_capacity = bytes;
                    }
                }
                "diskcache" => {
                    if let Ok(enabled) = value.parse::<bool>() {
                        config.write_through = enabled;
                    }
                }
                "enableautoflush" => {
                    if let Ok(enabled) = value.parse::<bool>() {
                        config.auto_flush = enabled;
                    }
                }
                "autoflushinterval" => {
                    if let Ok(millis) = value.parse::<u64>() {
                        if millis > 0 {
                            config.auto_flush_interval = Duration::from_millis(millis);
                        }
                    }
                }
                _ => {}
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.memory_capacity, 64 * 1024 * 1024);
        assert!(!config.write_through);
        assert!(!config.auto_flush);
        assert_eq!(config.auto_flush_interval, Duration::from_millis(2500));
        assert!(config.spill_dir.is_none());
    }

    #[test]
    fn builder() {
        let config = CacheConfig::default()
            .with_memory_capacity(1_000_000)
            .with_write_through(true)
            .with_auto_flush(true)
            .with_auto_flush_interval(Duration::from_millis(500))
            .with_spill_dir(PathBuf::from("/tmp/tiles"));

        assert_eq!(config.memory_capacity, 1_000_000);
        assert!(config.write_through);
        assert!(config.auto_flush);
        assert_eq!(config.auto_flush_interval, Duration::from_millis(500));
        assert_eq!(config.spill_dir, Some(PathBuf::from("/tmp/tiles")));
    }

    #[test]
    fn zero_interval_is_ignored() {
        let config = CacheConfig::default().with_auto_flush_interval(Duration::ZERO);
        assert_eq!(config.auto_flush_interval, DEFAULT_AUTO_FLUSH_INTERVAL);
    }

    #[test]
    fn from_options_overlays_known_keys() {
        let config = CacheConfig::from_options([
            ("memcapacity", "1000"),
            ("diskcache", "true"),
            ("enableautoflush", "true"),
            ("autoflushinterval", "250"),
        ]);

        assert_eq!(config.memory_capacity, 1000);
        assert!(config.write_through);
        assert!(config.auto_flush);
        assert_eq!(config.auto_flush_interval, Duration::from_millis(250));
    }

    #[test]
    fn from_options_ignores_unknown_keys() {
        let config = CacheConfig::from_options([("bogus", "1"), ("memcapacity", "1000")]);
        assert_eq!(config.memory_capacity, 1000);
    }

    #[test]
    fn from_options_ignores_wrong_typed_values() {
        let config = CacheConfig::from_options([
            ("memcapacity", "lots"),
            ("diskcache", "maybe"),
            ("autoflushinterval", "0"),
        ]);

        assert_eq!(config.memory_capacity, DEFAULT_MEMORY_CAPACITY);
        assert!(!config.write_through);
        assert_eq!(config.auto_flush_interval, DEFAULT_AUTO_FLUSH_INTERVAL);
    }
}
