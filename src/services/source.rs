use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// One raw upstream trade record, before normalization into a `Tick`.
///
/// Field availability varies across upstream sources, so everything is
/// optional; normalization applies the price -> close -> 0 fallback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickObservation {
    /// Exchange-reported trade time. Carried through but currently unused:
    /// ticks are stamped at ingestion time instead.
    pub time: Option<DateTime<Utc>>,
    pub price: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl TickObservation {
    /// Matched price with the documented field fallback applied
    pub fn effective_price(&self) -> f64 {
        self.price.or(self.close).unwrap_or(0.0)
    }

    pub fn effective_volume(&self) -> f64 {
        self.volume.unwrap_or(0.0)
    }
}

/// Capability contract for the upstream market-data source.
///
/// `group_symbols` never fails: listing errors are the source's problem to
/// log, and an empty group is a valid (degenerate) answer. `latest_ticks`
/// may fail so the worker's per-symbol isolation path stays testable, but
/// the production VCI implementation swallows its own errors into an empty
/// result as well.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Ordered symbols of a market group (e.g. "VN30"), empty on error
    async fn group_symbols(&self, group: &str) -> Vec<String>;

    /// Most recent trade observations for a symbol, newest-last
    async fn latest_ticks(&self, symbol: &str, page_size: usize) -> Result<Vec<TickObservation>>;
}
