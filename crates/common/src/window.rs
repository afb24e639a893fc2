use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{TelemetryError, TelemetryResult};
use crate::Sample;

/// Bounded, chronologically ordered buffer of the most recent samples.
///
/// Once `len() == capacity()`, every push evicts the oldest sample first.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl WindowBuffer {
    pub fn new(capacity: usize) -> TelemetryResult<Self> {
        if capacity == 0 {
            return Err(TelemetryError::InvalidConfig(
                "window capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    pub fn push(&mut self, sample: Sample) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    /// The newest `count` samples, oldest first.
    pub fn recent(&self, count: usize) -> Vec<Sample> {
        let start = self.samples.len().saturating_sub(count);
        self.samples.range(start..).copied().collect()
    }

    pub fn last(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Thread-safe handle to a [`WindowBuffer`].
///
/// One component writes, any number read. Readers always receive copies, so a
/// renderer never observes a half-applied push. Cloning shares the buffer.
#[derive(Debug, Clone)]
pub struct SharedWindow {
    inner: Arc<Mutex<WindowBuffer>>,
    capacity: usize,
}

impl SharedWindow {
    pub fn new(capacity: usize) -> TelemetryResult<Self> {
        let buffer = WindowBuffer::new(capacity)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(buffer)),
            capacity,
        })
    }

    pub fn push(&self, sample: Sample) {
        self.inner.lock().push(sample);
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.inner.lock().snapshot()
    }

    pub fn recent(&self, count: usize) -> Vec<Sample> {
        self.inner.lock().recent(count)
    }

    pub fn last(&self) -> Option<Sample> {
        self.inner.lock().last()
    }

    /// Snapshot as `[t, v]` pairs for plotting.
    pub fn points(&self) -> Vec<[f64; 2]> {
        self.inner.lock().samples.iter().map(Sample::point).collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
