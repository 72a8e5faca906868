use async_trait::async_trait;
use chrono::{DateTime, Utc};
use isahc::{config::Configurable, prelude::*, HttpClient};
use serde_json::Value;
use std::time::{Duration as StdDuration, SystemTime};
use tokio::sync::Mutex as TokioMutex;
use tokio::time::sleep;

use crate::error::Result as AppResult;
use crate::services::source::{QuoteSource, TickObservation};

#[derive(Debug)]
pub enum VciError {
    Http(isahc::Error),
    Serialization(serde_json::Error),
    InvalidResponse(String),
    NoData,
}

impl From<isahc::Error> for VciError {
    fn from(error: isahc::Error) -> Self {
        VciError::Http(error)
    }
}

impl From<serde_json::Error> for VciError {
    fn from(error: serde_json::Error) -> Self {
        VciError::Serialization(error)
    }
}

impl std::fmt::Display for VciError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VciError::Http(e) => write!(f, "HTTP error: {}", e),
            VciError::Serialization(e) => write!(f, "Serialization error: {}", e),
            VciError::InvalidResponse(s) => write!(f, "Invalid response: {}", s),
            VciError::NoData => write!(f, "No data available"),
        }
    }
}

impl std::error::Error for VciError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VciError::Http(e) => Some(e),
            VciError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

/// Sliding-window rate limiter shared across concurrent requests
#[derive(Debug)]
struct RateLimiter {
    /// Timestamps of recent requests (sliding window)
    request_timestamps: TokioMutex<Vec<SystemTime>>,
    /// Maximum requests allowed per minute
    rate_limit_per_minute: u32,
}

impl RateLimiter {
    fn new(rate_limit_per_minute: u32) -> Self {
        Self {
            request_timestamps: TokioMutex::new(Vec::new()),
            rate_limit_per_minute,
        }
    }

    async fn enforce(&self) {
        let current_time = SystemTime::now();
        let mut timestamps = self.request_timestamps.lock().await;

        // Remove timestamps older than 1 minute
        timestamps.retain(|&timestamp| {
            current_time
                .duration_since(timestamp)
                .unwrap_or(StdDuration::from_secs(0))
                < StdDuration::from_secs(60)
        });

        // If at rate limit, wait until oldest request expires
        if timestamps.len() >= self.rate_limit_per_minute as usize {
            if let Some(&oldest_request) = timestamps.first() {
                let wait_time = StdDuration::from_secs(60)
                    - current_time
                        .duration_since(oldest_request)
                        .unwrap_or(StdDuration::from_secs(0));

                if !wait_time.is_zero() {
                    // Drop lock before sleeping so other tasks can check
                    drop(timestamps);
                    sleep(wait_time + StdDuration::from_millis(100)).await;
                    let mut timestamps = self.request_timestamps.lock().await;
                    timestamps.push(current_time);
                    return;
                }
            }
        }
        timestamps.push(current_time);
    }
}

/// Client for the VCI (Vietcap) trading API
pub struct VciClient {
    client: HttpClient,
    base_url: String,
    user_agents: Vec<String>,
    random_agent: bool,
    rate_limiter: RateLimiter,
}

const MAX_RETRIES: u32 = 3;

impl VciClient {
    pub fn new(random_agent: bool, rate_limit_per_minute: u32) -> Result<Self, VciError> {
        let client = HttpClient::builder()
            .timeout(StdDuration::from_secs(30))
            .build()?;

        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.3 Safari/605.1.15".to_string(),
        ];

        Ok(VciClient {
            client,
            base_url: "https://trading.vietcap.com.vn/api/".to_string(),
            user_agents,
            random_agent,
            rate_limiter: RateLimiter::new(rate_limit_per_minute),
        })
    }

    fn get_user_agent(&self) -> String {
        if self.random_agent {
            use rand::seq::SliceRandom;
            self.user_agents
                .choose(&mut rand::thread_rng())
                .unwrap_or(&self.user_agents[0])
                .clone()
        } else {
            self.user_agents[0].clone()
        }
    }

    fn build_request(&self, url: &str, body: Option<String>) -> Result<isahc::Request<String>, VciError> {
        let user_agent = self.get_user_agent();
        let builder = isahc::Request::builder()
            .uri(url)
            .method(if body.is_some() { "POST" } else { "GET" })
            .header("Accept", "application/json, text/plain, */*")
            .header("Accept-Language", "en-US,en;q=0.9,vi-VN;q=0.8,vi;q=0.7")
            .header("Content-Type", "application/json")
            .header("Cache-Control", "no-cache")
            .header("User-Agent", user_agent.as_str())
            .header("Referer", "https://trading.vietcap.com.vn/")
            .header("Origin", "https://trading.vietcap.com.vn");

        builder
            .body(body.unwrap_or_default())
            .map_err(|e| VciError::InvalidResponse(format!("Request build error: {}", e)))
    }

    async fn make_request(&self, url: &str, payload: Option<&Value>) -> Result<Value, VciError> {
        let mut last_error: Option<String> = None;

        for attempt in 0..MAX_RETRIES {
            self.rate_limiter.enforce().await;

            if attempt > 0 {
                let delay = StdDuration::from_secs_f64(
                    2.0_f64.powi(attempt as i32 - 1) + rand::random::<f64>(),
                );
                let reason = last_error.as_deref().unwrap_or("unknown error");
                tracing::info!(
                    "VCI API retry backoff: attempt {}/{} - reason: {}, waiting {:.1}s",
                    attempt + 1,
                    MAX_RETRIES,
                    reason,
                    delay.as_secs_f64()
                );
                sleep(delay).await;
            }

            let body = match payload {
                Some(p) => Some(serde_json::to_string(p)?),
                None => None,
            };
            let request = self.build_request(url, body)?;

            match self.client.send_async(request).await {
                Ok(mut resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.text().await {
                            Ok(text) => match serde_json::from_str::<Value>(&text) {
                                Ok(data) => return Ok(data),
                                Err(e) => {
                                    last_error = Some(format!("JSON parse error: {}", e));
                                    continue;
                                }
                            },
                            Err(e) => {
                                last_error = Some(format!("Response body error: {}", e));
                                continue;
                            }
                        }
                    } else if status == 403 || status == 429 || status.is_server_error() {
                        last_error = Some(format!(
                            "HTTP {} - {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("Unknown")
                        ));
                        continue;
                    } else {
                        // Other 4xx are request problems, not retryable
                        return Err(VciError::InvalidResponse(format!(
                            "Client error ({}) - not retryable",
                            status.as_u16()
                        )));
                    }
                }
                Err(e) => {
                    last_error = Some(format!("Network error: {}", e));
                    continue;
                }
            }
        }

        Err(VciError::InvalidResponse(format!(
            "Max retries exceeded: {}",
            last_error.unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    /// Ordered symbols of a market group.
    ///
    /// Never fails: listing errors are logged and an empty list returned, so
    /// callers see the same shape for "group is empty" and "listing is down".
    pub async fn symbols_by_group(&self, group: &str) -> Vec<String> {
        let url = format!("{}price/symbols/getByGroup?group={}", self.base_url, group);

        match self.make_request(&url, None).await {
            Ok(data) => {
                let symbols = parse_symbol_list(&data);
                if symbols.is_empty() {
                    tracing::warn!(group = %group, "VCI returned no symbols for group");
                }
                symbols
            }
            Err(e) => {
                tracing::error!(group = %group, error = %e, "Failed to fetch group symbols");
                Vec::new()
            }
        }
    }

    /// Most recent intraday trades for a symbol, newest-last.
    ///
    /// Same swallow-and-log policy as `symbols_by_group`: an upstream error
    /// surfaces to the caller as an empty list.
    pub async fn intraday(&self, symbol: &str, page_size: usize) -> Vec<TickObservation> {
        let url = format!("{}market-watch/LEData/getAll", self.base_url);
        let payload = serde_json::json!({
            "symbol": symbol.to_uppercase(),
            "limit": page_size,
            "truncTime": null,
        });

        match self.make_request(&url, Some(&payload)).await {
            Ok(data) => parse_intraday(&data),
            Err(e) => {
                tracing::error!(symbol = %symbol, error = %e, "Failed to fetch intraday ticks");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl QuoteSource for VciClient {
    async fn group_symbols(&self, group: &str) -> Vec<String> {
        self.symbols_by_group(group).await
    }

    async fn latest_ticks(&self, symbol: &str, page_size: usize) -> AppResult<Vec<TickObservation>> {
        Ok(self.intraday(symbol, page_size).await)
    }
}

/// Extract symbol codes from a getByGroup response array
fn parse_symbol_list(data: &Value) -> Vec<String> {
    let Some(items) = data.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            item.get("symbol")
                .and_then(|v| v.as_str())
                .map(|s| s.to_uppercase())
        })
        .collect()
}

/// Extract trade observations from an LEData response, sorted oldest-first
/// so the latest trade is last
fn parse_intraday(data: &Value) -> Vec<TickObservation> {
    let Some(items) = data.as_array() else {
        return Vec::new();
    };

    let mut observations: Vec<TickObservation> = items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            Some(TickObservation {
                time: obj.get("truncTime").and_then(parse_epoch_seconds),
                price: obj.get("matchPrice").and_then(|v| v.as_f64()),
                close: obj.get("close").and_then(|v| v.as_f64()),
                volume: obj.get("matchVol").and_then(|v| v.as_f64()),
            })
        })
        .collect();

    observations.sort_by_key(|obs| obs.time);
    observations
}

/// VCI reports epoch seconds either as a JSON number or a numeric string
fn parse_epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let timestamp = if let Some(s) = value.as_str() {
        s.parse::<i64>().ok()?
    } else {
        value.as_i64()?
    };
    DateTime::<Utc>::from_timestamp(timestamp, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbol_list() {
        let data = serde_json::json!([
            {"symbol": "acb", "exchange": "HOSE"},
            {"symbol": "VCB", "exchange": "HOSE"},
            {"noSymbol": true},
        ]);
        assert_eq!(parse_symbol_list(&data), vec!["ACB", "VCB"]);
    }

    #[test]
    fn test_parse_symbol_list_non_array() {
        let data = serde_json::json!({"error": "rate limited"});
        assert!(parse_symbol_list(&data).is_empty());
    }

    #[test]
    fn test_parse_intraday_newest_last() {
        let data = serde_json::json!([
            {"truncTime": "1700000060", "matchPrice": 23300.0, "matchVol": 200.0},
            {"truncTime": 1700000000, "matchPrice": 23200.0, "matchVol": 100.0},
        ]);

        let observations = parse_intraday(&data);
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].price, Some(23200.0));
        assert_eq!(observations[1].price, Some(23300.0));
        assert!(observations[0].time < observations[1].time);
    }

    #[test]
    fn test_parse_intraday_missing_fields() {
        let data = serde_json::json!([{"truncTime": 1700000000}]);
        let observations = parse_intraday(&data);
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].effective_price(), 0.0);
        assert_eq!(observations[0].effective_volume(), 0.0);
    }

    #[tokio::test]
    async fn test_vci_client_creation() {
        let client = VciClient::new(true, 60);
        assert!(client.is_ok());
    }
}
