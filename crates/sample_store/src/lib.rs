use async_trait::async_trait;

use common::Sample;

pub mod http;
pub mod memory;
pub mod sqlite;

pub use http::{router, AppState};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Persistence backend for received samples.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Stores one sample and returns its row id.
    async fn insert(&self, sample: &Sample) -> StoreResult<i64>;

    /// Up to `n` of the newest samples, oldest first.
    async fn query_latest(&self, n: usize) -> StoreResult<Vec<Sample>>;
}
