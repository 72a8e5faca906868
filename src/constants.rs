//! Ingestion Defaults
//!
//! Compile-time defaults for the market-data ingestion worker. These feed
//! `IngestConfig::default()`; none of them is runtime-toggleable beyond the
//! CLI flags exposed by the `ingest` command.

/// Symbol group polled when none is given on the command line
pub const DEFAULT_SYMBOL_GROUP: &str = "VN30";

/// Buffered ticks that trigger a size-based flush
pub const FLUSH_BATCH_SIZE: usize = 100;

/// Interval between timer-based flushes
pub const FLUSH_INTERVAL_MS: u64 = 1_000;

/// Pause between per-symbol fetches within one poll pass
pub const SYMBOL_THROTTLE_MS: u64 = 200;

/// Pause after a completed poll pass before the next one starts
pub const PASS_INTERVAL_SECS: u64 = 5;

/// Pause after a failed poll pass before it is retried
pub const PASS_BACKOFF_SECS: u64 = 5;

/// Page size requested from the intraday endpoint per symbol
pub const INTRADAY_PAGE_SIZE: usize = 100;

/// Hard cap on buffered ticks while the store is unavailable.
///
/// A failed flush re-queues its batch at the front of the live buffer; under
/// a sustained store outage the buffer would otherwise grow without bound.
/// Once the cap is hit the oldest ticks are dropped first.
pub const MAX_BUFFERED_TICKS: usize = 10_000;

/// VCI API requests allowed per minute (matches the upstream limit the
/// reference polling client was tuned for)
pub const VCI_RATE_LIMIT_PER_MINUTE: u32 = 60;
