use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::models::{IngestConfig, Tick};
use crate::services::{QuoteSource, TickObservation, TickStore};

/// Batching market-data ingestion worker.
///
/// Two periodic tasks share one in-memory tick buffer: the poll task walks
/// the tracked symbol group fetching the latest trade per symbol, and the
/// flush task drains the buffer to the store every `flush_interval`. A
/// size trigger inside the poll path flushes early whenever the buffer
/// reaches `batch_size`, so both paths serialize on the buffer mutex.
pub struct MarketWorker<Q, S> {
    source: Arc<Q>,
    store: Arc<S>,
    config: IngestConfig,
    buffer: Mutex<Vec<Tick>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<Q, S> MarketWorker<Q, S>
where
    Q: QuoteSource + 'static,
    S: TickStore + 'static,
{
    pub fn new(source: Arc<Q>, store: Arc<S>, config: IngestConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            source,
            store,
            config,
            buffer: Mutex::new(Vec::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Resolve the symbol group and launch the poll and flush tasks.
    ///
    /// Does not block on either task. An empty group is a valid degenerate
    /// state (the market may be closed); the worker logs and runs no-op
    /// passes rather than exiting.
    pub async fn start(self: &Arc<Self>) {
        let symbols = self.source.group_symbols(&self.config.group).await;

        if symbols.is_empty() {
            warn!(
                group = %self.config.group,
                "Symbol group resolved empty, poll passes will be no-ops"
            );
        } else {
            info!(
                group = %self.config.group,
                symbol_count = symbols.len(),
                "Starting market worker"
            );
        }

        let poll_worker = Arc::clone(self);
        let poll_handle = tokio::spawn(async move {
            poll_worker.poll_loop(symbols).await;
        });

        let flush_worker = Arc::clone(self);
        let flush_handle = tokio::spawn(async move {
            flush_worker.flush_loop().await;
        });

        let mut tasks = self.tasks.lock().await;
        tasks.push(poll_handle);
        tasks.push(flush_handle);
    }

    /// Signal both tasks to exit at their next suspension point and wait
    /// for them. In-flight fetches and flushes run to completion.
    pub async fn stop(&self) {
        info!("Stopping market worker");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Number of ticks currently buffered
    pub async fn buffered_len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    async fn poll_loop(&self, symbols: Vec<String>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut pass_count = 0u64;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            pass_count += 1;

            match self.poll_pass(&symbols, &mut shutdown_rx).await {
                Ok(()) => {
                    debug!(pass = pass_count, "Poll pass completed");
                    if !self
                        .sleep_or_shutdown(self.config.pass_interval, &mut shutdown_rx)
                        .await
                    {
                        break;
                    }
                }
                Err(e) => {
                    error!(pass = pass_count, error = %e, "Poll pass failed, backing off");
                    if !self
                        .sleep_or_shutdown(self.config.pass_backoff, &mut shutdown_rx)
                        .await
                    {
                        break;
                    }
                }
            }
        }

        debug!("Poll loop exited");
    }

    /// One traversal of the symbol group, in order.
    ///
    /// A per-symbol fetch failure is logged and skipped so the rest of the
    /// pass is unaffected. Only a failed size-triggered flush aborts the
    /// pass; the caller backs off and retries.
    async fn poll_pass(
        &self,
        symbols: &[String],
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        for symbol in symbols {
            if *shutdown_rx.borrow() {
                return Ok(());
            }

            match self.fetch_latest(symbol).await {
                Ok(observations) => {
                    // Only the newest trade of the page is kept
                    if let Some(latest) = observations.last() {
                        self.append_tick(symbol, latest).await?;
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Fetch failed, skipping symbol");
                }
            }

            // Throttle between symbols to bound upstream request rate
            if !self
                .sleep_or_shutdown(self.config.symbol_throttle, shutdown_rx)
                .await
            {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn fetch_latest(&self, symbol: &str) -> Result<Vec<TickObservation>> {
        let fetch = self.source.latest_ticks(symbol, self.config.page_size);
        match self.config.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| AppError::Network(format!("Quote fetch timed out for {}", symbol)))?,
            None => fetch.await,
        }
    }

    /// Normalize an observation into a tick, append it, and flush if the
    /// buffer has reached the batch-size threshold (the size trigger).
    async fn append_tick(&self, symbol: &str, observation: &TickObservation) -> Result<()> {
        // Stamped at ingestion time; the upstream trade time is discarded
        let tick = Tick::new(
            symbol,
            Utc::now(),
            observation.effective_price(),
            observation.effective_volume(),
        );

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(tick);
            buffer.len() >= self.config.batch_size
        };

        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush_loop(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if !self
                .sleep_or_shutdown(self.config.flush_interval, &mut shutdown_rx)
                .await
            {
                break;
            }
            // Failures are logged and the batch re-queued inside flush();
            // the next timer tick simply tries again
            if let Err(e) = self.flush().await {
                error!(error = %e, "Timer flush failed");
            }
        }

        debug!("Flush loop exited");
    }

    /// Drain the buffer and commit its contents as one batch.
    ///
    /// An empty buffer is a no-op, not an error: whichever trigger fires
    /// second after a race finds nothing to do. On store failure the batch
    /// is re-queued at the front of the live buffer, capped at
    /// `max_buffered` (oldest dropped first), and the error propagates to
    /// the calling loop.
    pub async fn flush(&self) -> Result<usize> {
        let batch = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(0);
            }
            std::mem::take(&mut *buffer)
        };

        let batch_size = batch.len();
        match self.store.insert_ticks_batch(&batch).await {
            Ok(affected) => {
                info!(batch_size, affected, "Flushed tick batch");
                Ok(affected)
            }
            Err(e) => {
                error!(batch_size, error = %e, "Failed to flush tick batch, re-queueing");
                self.requeue(batch).await;
                Err(e)
            }
        }
    }

    /// Sleep for `duration` unless shutdown is signalled first; returns
    /// false when the caller should exit its loop
    async fn sleep_or_shutdown(
        &self,
        duration: Duration,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            _ = sleep(duration) => true,
            _ = shutdown_rx.changed() => false,
        }
    }

    async fn requeue(&self, mut batch: Vec<Tick>) {
        let mut buffer = self.buffer.lock().await;
        // Failed batch goes back in front of anything appended since the
        // drain, preserving append order
        batch.append(&mut *buffer);

        if batch.len() > self.config.max_buffered {
            let overflow = batch.len() - self.config.max_buffered;
            warn!(
                dropped = overflow,
                capacity = self.config.max_buffered,
                "Tick buffer over capacity, dropping oldest ticks"
            );
            batch.drain(..overflow);
        }
        *buffer = batch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    struct MockSource {
        symbols: Vec<String>,
        prices: HashMap<String, f64>,
        fail_symbols: HashSet<String>,
    }

    impl MockSource {
        fn new(entries: &[(&str, f64)]) -> Self {
            Self {
                symbols: entries.iter().map(|(s, _)| s.to_string()).collect(),
                prices: entries
                    .iter()
                    .map(|(s, p)| (s.to_string(), *p))
                    .collect(),
                fail_symbols: HashSet::new(),
            }
        }

        fn failing_for(mut self, symbol: &str) -> Self {
            self.fail_symbols.insert(symbol.to_string());
            self
        }
    }

    #[async_trait]
    impl QuoteSource for MockSource {
        async fn group_symbols(&self, _group: &str) -> Vec<String> {
            self.symbols.clone()
        }

        async fn latest_ticks(
            &self,
            symbol: &str,
            _page_size: usize,
        ) -> Result<Vec<TickObservation>> {
            if self.fail_symbols.contains(symbol) {
                return Err(AppError::Network(format!("injected failure for {}", symbol)));
            }
            let Some(&price) = self.prices.get(symbol) else {
                return Ok(Vec::new());
            };
            // Older observation first: the worker must consume the last one
            Ok(vec![
                TickObservation {
                    price: Some(price - 1.0),
                    volume: Some(1.0),
                    ..Default::default()
                },
                TickObservation {
                    price: Some(price),
                    volume: Some(10.0),
                    ..Default::default()
                },
            ])
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        batches: StdMutex<Vec<Vec<Tick>>>,
        fail: AtomicBool,
    }

    impl RecordingStore {
        fn batch_symbols(&self) -> Vec<Vec<(String, f64)>> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .map(|batch| {
                    batch
                        .iter()
                        .map(|t| (t.symbol.clone(), t.price))
                        .collect()
                })
                .collect()
        }

        fn batch_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TickStore for RecordingStore {
        async fn insert_ticks_batch(&self, ticks: &[Tick]) -> Result<usize> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Database("injected insert failure".to_string()));
            }
            self.batches.lock().unwrap().push(ticks.to_vec());
            Ok(ticks.len())
        }
    }

    fn test_config(batch_size: usize) -> IngestConfig {
        IngestConfig {
            batch_size,
            symbol_throttle: Duration::from_millis(0),
            flush_interval: Duration::from_millis(10),
            pass_interval: Duration::from_millis(10),
            pass_backoff: Duration::from_millis(10),
            ..IngestConfig::default()
        }
    }

    fn worker_with(
        source: MockSource,
        store: Arc<RecordingStore>,
        batch_size: usize,
    ) -> Arc<MarketWorker<MockSource, RecordingStore>> {
        Arc::new(MarketWorker::new(
            Arc::new(source),
            store,
            test_config(batch_size),
        ))
    }

    async fn run_pass(worker: &Arc<MarketWorker<MockSource, RecordingStore>>) -> Result<()> {
        let symbols = worker.source.group_symbols("TEST").await;
        let mut rx = worker.shutdown_tx.subscribe();
        worker.poll_pass(&symbols, &mut rx).await
    }

    #[tokio::test]
    async fn test_threshold_flush_in_append_order() {
        let store = Arc::new(RecordingStore::default());
        let source = MockSource::new(&[("AAA", 100.0), ("BBB", 101.0), ("CCC", 102.0)]);
        let worker = worker_with(source, store.clone(), 3);

        run_pass(&worker).await.unwrap();

        // Exactly one size-triggered flush, in append order
        let batches = store.batch_symbols();
        assert_eq!(
            batches,
            vec![vec![
                ("AAA".to_string(), 100.0),
                ("BBB".to_string(), 101.0),
                ("CCC".to_string(), 102.0),
            ]]
        );
        assert_eq!(worker.buffered_len().await, 0);

        // Subsequent timer flush finds an empty buffer and is a no-op
        assert_eq!(worker.flush().await.unwrap(), 0);
        assert_eq!(store.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_timer_flush_on_empty_buffer_is_noop() {
        let store = Arc::new(RecordingStore::default());
        let worker = worker_with(MockSource::new(&[]), store.clone(), 100);

        assert_eq!(worker.flush().await.unwrap(), 0);
        assert_eq!(store.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_batch_flushes_on_interval() {
        let store = Arc::new(RecordingStore::default());
        let source = MockSource::new(&[("VCB", 23_200.0), ("FPT", 98_000.0)]);
        let worker = worker_with(source, store.clone(), 100);

        run_pass(&worker).await.unwrap();
        assert_eq!(worker.buffered_len().await, 2);
        assert_eq!(store.batch_count(), 0);

        // Interval elapses: exactly the buffered ticks go out as one batch
        assert_eq!(worker.flush().await.unwrap(), 2);
        assert_eq!(store.batch_count(), 1);
        assert_eq!(worker.buffered_len().await, 0);
    }

    #[tokio::test]
    async fn test_no_loss_across_flush_cycles() {
        let store = Arc::new(RecordingStore::default());
        let source = MockSource::new(&[("VCB", 23_200.0), ("FPT", 98_000.0), ("HPG", 27_000.0)]);
        let worker = worker_with(source, store.clone(), 100);

        for _ in 0..3 {
            run_pass(&worker).await.unwrap();
            worker.flush().await.unwrap();
        }

        let all: Vec<String> = store
            .batch_symbols()
            .into_iter()
            .flatten()
            .map(|(symbol, _)| symbol)
            .collect();
        let expected: Vec<String> = ["VCB", "FPT", "HPG"]
            .iter()
            .cycle()
            .take(9)
            .map(|s| s.to_string())
            .collect();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_only_failing_symbol() {
        let store = Arc::new(RecordingStore::default());
        let source = MockSource::new(&[("AAA", 100.0), ("BBB", 101.0), ("CCC", 102.0)])
            .failing_for("BBB");
        let worker = worker_with(source, store.clone(), 100);

        run_pass(&worker).await.unwrap();
        worker.flush().await.unwrap();

        let batches = store.batch_symbols();
        assert_eq!(
            batches,
            vec![vec![("AAA".to_string(), 100.0), ("CCC".to_string(), 102.0)]]
        );
    }

    #[tokio::test]
    async fn test_empty_symbol_list_is_noop_pass() {
        let store = Arc::new(RecordingStore::default());
        let worker = worker_with(MockSource::new(&[]), store.clone(), 100);

        run_pass(&worker).await.unwrap();
        assert_eq!(worker.buffered_len().await, 0);
        assert_eq!(store.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_observations_append_nothing() {
        let store = Arc::new(RecordingStore::default());
        // Symbol listed but no price known: latest_ticks returns empty
        let mut source = MockSource::new(&[]);
        source.symbols = vec!["XXX".to_string()];
        let worker = worker_with(source, store.clone(), 100);

        run_pass(&worker).await.unwrap();
        assert_eq!(worker.buffered_len().await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_requeues_batch() {
        let store = Arc::new(RecordingStore::default());
        let source = MockSource::new(&[("VCB", 23_200.0), ("FPT", 98_000.0)]);
        let worker = worker_with(source, store.clone(), 100);

        run_pass(&worker).await.unwrap();
        assert_eq!(worker.buffered_len().await, 2);

        store.fail.store(true, Ordering::SeqCst);
        assert!(worker.flush().await.is_err());
        // Batch re-queued intact, not dropped
        assert_eq!(worker.buffered_len().await, 2);
        assert_eq!(store.batch_count(), 0);

        // Store recovers: next trigger delivers the same batch in order
        store.fail.store(false, Ordering::SeqCst);
        assert_eq!(worker.flush().await.unwrap(), 2);
        assert_eq!(
            store.batch_symbols(),
            vec![vec![("VCB".to_string(), 23_200.0), ("FPT".to_string(), 98_000.0)]]
        );
    }

    #[tokio::test]
    async fn test_requeue_cap_drops_oldest() {
        let store = Arc::new(RecordingStore::default());
        let source = MockSource::new(&[("AAA", 100.0)]);
        let mut config = test_config(2);
        config.max_buffered = 3;
        let worker = Arc::new(MarketWorker::new(
            Arc::new(source),
            store.clone(),
            config,
        ));

        store.fail.store(true, Ordering::SeqCst);
        let observation = TickObservation {
            price: Some(100.0),
            volume: Some(1.0),
            ..Default::default()
        };
        // Each second append trips the size trigger, whose flush fails and
        // re-queues; the buffer must never exceed the cap
        for _ in 0..6 {
            let _ = worker.append_tick("AAA", &observation).await;
            assert!(worker.buffered_len().await <= 3);
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_lifecycle() {
        let store = Arc::new(RecordingStore::default());
        let source = MockSource::new(&[("VCB", 23_200.0)]);
        let worker = worker_with(source, store.clone(), 100);

        worker.start().await;
        // Give the loops a chance to run at least one pass and one flush
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.stop().await;

        assert!(store.batch_count() >= 1);
        // Task handles were drained: a second stop is a no-op
        worker.stop().await;
    }
}
