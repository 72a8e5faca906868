use std::time::Duration;

use crate::constants::{
    DEFAULT_SYMBOL_GROUP, FLUSH_BATCH_SIZE, FLUSH_INTERVAL_MS, INTRADAY_PAGE_SIZE,
    MAX_BUFFERED_TICKS, PASS_BACKOFF_SECS, PASS_INTERVAL_SECS, SYMBOL_THROTTLE_MS,
};

/// Configuration for the ingestion worker
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Symbol group to track (resolved once at startup)
    pub group: String,

    /// Buffered ticks that trigger a size-based flush
    pub batch_size: usize,

    /// Interval between timer-based flushes
    pub flush_interval: Duration,

    /// Pause between per-symbol fetches within a pass
    pub symbol_throttle: Duration,

    /// Pause after a completed pass
    pub pass_interval: Duration,

    /// Pause before retrying a failed pass
    pub pass_backoff: Duration,

    /// Page size requested from the intraday endpoint
    pub page_size: usize,

    /// Upper bound on a single quote fetch. `None` means no timeout, which
    /// matches the reference behavior but risks stalling a pass on a hung
    /// upstream connection.
    pub fetch_timeout: Option<Duration>,

    /// Cap on buffered ticks across failed-flush re-queues
    pub max_buffered: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_SYMBOL_GROUP.to_string(),
            batch_size: FLUSH_BATCH_SIZE,
            flush_interval: Duration::from_millis(FLUSH_INTERVAL_MS),
            symbol_throttle: Duration::from_millis(SYMBOL_THROTTLE_MS),
            pass_interval: Duration::from_secs(PASS_INTERVAL_SECS),
            pass_backoff: Duration::from_secs(PASS_BACKOFF_SECS),
            page_size: INTRADAY_PAGE_SIZE,
            fetch_timeout: None,
            max_buffered: MAX_BUFFERED_TICKS,
        }
    }
}

impl IngestConfig {
    /// Config for the given group with all other fields at their defaults
    pub fn for_group(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Self::default()
        }
    }
}
