use async_trait::async_trait;
use parking_lot::Mutex;

use common::Sample;

use crate::{SampleStore, StoreResult};

/// Process-local store for tests and runs without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: Mutex<Vec<Sample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn insert(&self, sample: &Sample) -> StoreResult<i64> {
        let mut samples = self.samples.lock();
        samples.push(*sample);
        Ok(samples.len() as i64)
    }

    async fn query_latest(&self, n: usize) -> StoreResult<Vec<Sample>> {
        let samples = self.samples.lock();
        let skip = samples.len().saturating_sub(n);
        Ok(samples[skip..].to_vec())
    }
}
