use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use common::config::StoreConfig;
use common::Sample;

use crate::{SampleStore, StoreResult};

/// SQLite implementation of SampleStore
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the pool described by `config` and creates the schema.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        let store = Self::new(pool);
        store.initialize().await?;
        info!(url = %config.database_url, "sample store ready");
        Ok(store)
    }

    /// Initialize database schema
    pub async fn initialize(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value REAL NOT NULL,
                timestamp REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SampleStore for SqliteStore {
    async fn insert(&self, sample: &Sample) -> StoreResult<i64> {
        let result = sqlx::query("INSERT INTO samples (value, timestamp) VALUES (?, ?)")
            .bind(sample.value)
            .bind(sample.timestamp)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    async fn query_latest(&self, n: usize) -> StoreResult<Vec<Sample>> {
        let rows = sqlx::query(
            r#"
            SELECT value, timestamp FROM (
                SELECT id, value, timestamp FROM samples ORDER BY id DESC LIMIT ?
            ) ORDER BY id ASC
            "#,
        )
        .bind(i64::try_from(n).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Sample::new(row.get("value"), row.get("timestamp")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        // Every connection to :memory: is its own database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn insert_returns_increasing_ids() {
        let store = memory_store().await;
        let first = store.insert(&Sample::new(0.25, 1.0)).await.unwrap();
        let second = store.insert(&Sample::new(0.5, 2.0)).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn latest_returns_newest_oldest_first() {
        let store = memory_store().await;
        for i in 0..10 {
            store.insert(&Sample::new(-(i as f64), i as f64)).await.unwrap();
        }

        let latest = store.query_latest(3).await.unwrap();
        let stamps: Vec<f64> = latest.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![7.0, 8.0, 9.0]);
        assert_eq!(latest[2], Sample::new(-9.0, 9.0));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let store = memory_store().await;
        store.insert(&Sample::new(1.0, 1.0)).await.unwrap();
        store.initialize().await.unwrap();
        assert_eq!(store.query_latest(10).await.unwrap().len(), 1);
    }
}
