use async_trait::async_trait;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::models::Tick;

/// Durable append-only sink for tick batches.
///
/// A batch commits atomically or fails as a unit; table-level concerns
/// (keying, partitioning) belong to the implementation. This trait is the
/// seam where a TimescaleDB-backed store would plug in.
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Insert the batch in one transaction, returning affected rows
    async fn insert_ticks_batch(&self, ticks: &[Tick]) -> Result<usize>;
}

/// SQLite-backed tick store
#[derive(Debug)]
pub struct SqliteTickStore {
    pool: SqlitePool,
}

impl SqliteTickStore {
    /// Open (or create) the tick database with WAL and a busy timeout
    pub async fn new(database_path: PathBuf) -> Result<Self> {
        info!("Initializing tick database at: {:?}", database_path);

        // Ensure parent directory exists
        if let Some(parent) = database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&database_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePool::connect_with(connect_options).await?;

        let store = Self { pool };
        store.initialize_schema().await?;

        info!("Tick database initialized successfully");
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_ticks (
                symbol TEXT NOT NULL,
                timestamp DATETIME NOT NULL,
                price REAL NOT NULL,
                volume REAL NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // (symbol, timestamp) is the natural key; the time index serves the
        // dominant recent-data query pattern
        let indexes = vec![
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_market_ticks_unique ON market_ticks(symbol, timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_market_ticks_time ON market_ticks(timestamp DESC)",
        ];

        for index in indexes {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Total rows stored
    pub async fn tick_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM market_ticks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Rows stored for one symbol
    pub async fn tick_count_for_symbol(&self, symbol: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM market_ticks WHERE symbol = ?1")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Tick database connection pool closed");
    }
}

#[async_trait]
impl TickStore for SqliteTickStore {
    async fn insert_ticks_batch(&self, ticks: &[Tick]) -> Result<usize> {
        if ticks.is_empty() {
            return Ok(0);
        }

        // Transaction drop on error path rolls the whole batch back
        let mut transaction = self.pool.begin().await?;
        let mut affected_rows = 0;

        for tick in ticks {
            let result = sqlx::query(
                r#"
                INSERT OR REPLACE INTO market_ticks (symbol, timestamp, price, volume)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&tick.symbol)
            .bind(tick.timestamp)
            .bind(tick.price)
            .bind(tick.volume)
            .execute(&mut *transaction)
            .await?;

            affected_rows += result.rows_affected() as usize;
        }

        transaction.commit().await?;
        Ok(affected_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn sample_tick(symbol: &str, offset_secs: i64, price: f64) -> Tick {
        let timestamp = Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap()
            + chrono::Duration::seconds(offset_secs);
        Tick::new(symbol, timestamp, price, 100.0)
    }

    #[tokio::test]
    async fn test_store_creation() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteTickStore::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        assert_eq!(store.tick_count().await.unwrap(), 0);
        store.close().await;
    }

    #[tokio::test]
    async fn test_batch_insert_and_count() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteTickStore::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        let batch = vec![
            sample_tick("VCB", 0, 23_200.0),
            sample_tick("VCB", 1, 23_250.0),
            sample_tick("FPT", 0, 98_000.0),
        ];

        let affected = store.insert_ticks_batch(&batch).await.unwrap();
        assert_eq!(affected, 3);
        assert_eq!(store.tick_count().await.unwrap(), 3);
        assert_eq!(store.tick_count_for_symbol("VCB").await.unwrap(), 2);

        store.close().await;
    }

    #[tokio::test]
    async fn test_duplicate_key_replaces_row() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteTickStore::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        store
            .insert_ticks_batch(&[sample_tick("VCB", 0, 23_200.0)])
            .await
            .unwrap();
        store
            .insert_ticks_batch(&[sample_tick("VCB", 0, 23_300.0)])
            .await
            .unwrap();

        // Same (symbol, timestamp) key: a retried row replaces, never aborts
        assert_eq!(store.tick_count().await.unwrap(), 1);

        store.close().await;
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteTickStore::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        assert_eq!(store.insert_ticks_batch(&[]).await.unwrap(), 0);
        store.close().await;
    }
}
