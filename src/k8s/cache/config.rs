/**
 * Configuration constants for the cache synchronizer
 */
use std::time::Duration;

/// Maximum number of consecutive failed resumptions before a kind is abandoned
pub const MAX_WATCH_RESTARTS: u32 = 50;

/// Maximum backoff time in seconds between resumption attempts
pub const MAX_BACKOFF_SECONDS: u64 = 60;

/// Initial backoff time in seconds
pub const INITIAL_BACKOFF_SECONDS: u64 = 1;

/// Watch stream timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
pub const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Per-subscriber buffer for cache events
pub const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 100;

/// Default time to wait for the initial listing of every kind
pub const DEFAULT_SYNC_TIMEOUT_SECONDS: u64 = 30;

/// Tunables for [`super::CacheSynchronizer`]
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_watch_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_watch_restarts: MAX_WATCH_RESTARTS,
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECONDS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECONDS),
        }
    }
}

impl SyncConfig {
    /// Backoff to wait after `failures` consecutive failed resumptions (1-based)
    #[must_use]
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1_u32 << shift)
            .min(self.max_backoff)
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(MAX_WATCH_RESTARTS > 0, "MAX_WATCH_RESTARTS must be greater than 0");
    assert!(MAX_BACKOFF_SECONDS > 0, "MAX_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS > 0, "INITIAL_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS <= MAX_BACKOFF_SECONDS, "INITIAL_BACKOFF_SECONDS must not exceed MAX_BACKOFF_SECONDS");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(SUBSCRIPTION_CHANNEL_CAPACITY > 0, "SUBSCRIPTION_CHANNEL_CAPACITY must be greater than 0");
    assert!(DEFAULT_SYNC_TIMEOUT_SECONDS > 0, "DEFAULT_SYNC_TIMEOUT_SECONDS must be greater than 0");
};
