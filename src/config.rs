//! Engine configuration.

use std::time::Duration;

/// Sync engine configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Delay before a failed channel is resubscribed.
    pub reconnect_delay: Duration,

    /// Consecutive failures after which every further failure is logged
    /// as persistent.
    pub persistent_failure_threshold: u32,

    /// Maximum number of notifications kept in the cache.
    pub notification_retention: usize,

    /// How long an optimistic local action waits for its echo.
    pub pending_action_ttl: Duration,

    /// Buffered cache events per watcher before it is dropped.
    pub watch_buffer_size: usize,

    /// Number of profiles kept for change enrichment.
    pub profile_cache_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            persistent_failure_threshold: 5,
            notification_retention: 50,
            pending_action_ttl: Duration::from_secs(30),
            watch_buffer_size: 256,
            profile_cache_size: 512,
        }
    }
}
