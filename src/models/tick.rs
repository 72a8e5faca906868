use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single market observation: one traded price/volume for a symbol at a
/// point in time.
///
/// The (symbol, timestamp) pair is the natural key in storage. Timestamps
/// are recorded at ingestion time, not the exchange-reported trade time, so
/// the tick log is best-effort rather than a strictly ordered stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Ticker symbol (e.g., "VCB", "FPT")
    pub symbol: String,

    /// When the observation was recorded
    pub timestamp: DateTime<Utc>,

    /// Matched price in full VND (e.g., 23200, not 23.2)
    pub price: f64,

    /// Matched volume (number of shares)
    pub volume: f64,
}

impl Tick {
    pub fn new(symbol: impl Into<String>, timestamp: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            // Upstream occasionally reports junk negatives on halted symbols
            price: price.max(0.0),
            volume: volume.max(0.0),
        }
    }
}
