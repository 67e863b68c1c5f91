//! Auto-flush of resident tiles after an idle window.
//!
//! Every cache touch pushes the flush deadline forward by the configured
//! interval, so a burst of activity is never interrupted; the flush fires
//! only once the cache has been left alone for a full interval.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cache::store::CacheState;

/// Shared idle clock for the auto-flush worker.
///
/// Times are kept as milliseconds relative to a fixed anchor so the deadline
/// can live in an atomic and be bumped without taking the cache lock.
pub(crate) struct FlushClock {
    anchor: Instant,
    deadline_ms: AtomicU64,
    interval_ms: AtomicU64,
}

impl FlushClock {
    pub(crate) fn new(interval: Duration) -> Self {
        let clock = Self {
            anchor: Instant::now(),
            deadline_ms: AtomicU64::new(0),
            interval_ms: AtomicU64::new(interval.as_millis() as u64),
        };
        clock.touch();
        clock
    }

    /// Push the flush deadline one full interval into the future.
    pub(crate) fn touch(&self) {
        let now = self.anchor.elapsed().as_millis() as u64;
        self.deadline_ms
            .store(now + self.interval_ms.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    pub(crate) fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Whether the idle window has elapsed since the last touch.
    fn is_expired(&self) -> bool {
        let now = self.anchor.elapsed().as_millis() as u64;
        now > self.deadline_ms.load(Ordering::Relaxed)
    }
}

/// Background worker that flushes resident tiles from an idle cache.
///
/// Runs in its own thread and can be cleanly shut down by calling
/// `shutdown()` or dropping the daemon.
pub(crate) struct AutoFlushDaemon {
    thread_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl AutoFlushDaemon {
    /// Start the worker.
    ///
    /// The worker holds only a weak reference to the cache state; it exits
    /// on its own once the cache has been dropped.
    pub(crate) fn start(state: Weak<Mutex<CacheState>>, clock: Arc<FlushClock>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let thread_handle = thread::Builder::new()
            .name("tile-cache-auto-flush".to_string())
            .spawn(move || {
                Self::run_loop(state, clock, shutdown_clone);
            })
            .expect("failed to spawn auto-flush thread");

        Self {
            thread_handle: Some(thread_handle),
            shutdown,
        }
    }

    fn run_loop(state: Weak<Mutex<CacheState>>, clock: Arc<FlushClock>, shutdown: Arc<AtomicBool>) {
        // Sleep in short slices so shutdown stays responsive even with a
        // long flush interval.
        const SLICE: Duration = Duration::from_millis(25);

        info!(
            interval_ms = clock.interval().as_millis() as u64,
            "auto-flush worker started"
        );

        loop {
            let tick_end = Instant::now() + clock.interval();
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    debug!("auto-flush worker received shutdown signal");
                    return;
                }
                let remaining = tick_end.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                thread::sleep(remaining.min(SLICE));
            }

            if !clock.is_expired() {
                continue;
            }

            let Some(state) = state.upgrade() else {
                debug!("cache dropped, auto-flush worker exiting");
                return;
            };

            let mut state = state.lock().unwrap();
            let dropped = state.resident.len();
            if dropped > 0 {
                state.flush_memory();
                debug!(tiles = dropped, "auto-flush released resident tiles");
            }
        }
    }

    /// Signal the worker to stop. Idempotent and non-blocking.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                warn!("auto-flush thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for AutoFlushDaemon {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}
