use std::path::Path;
use std::sync::{atomic::{AtomicUsize, Ordering}, Arc};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// One cadence tick as seen by the producer.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TickResult {
    pub tick_id: u64,
    pub mode: String,
    pub value: f64,
    pub clients: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub broadcast_ns: u64,
    pub lateness_ns: i64,
    pub deadline_met: bool,
}

/// Thread-safe recorder with interior mutability.
/// Cloning is cheap and shares the same results.
#[derive(Clone)]
pub struct TickRecorder {
    results: Arc<Mutex<Vec<TickResult>>>,
    pub missed_deadlines: Arc<AtomicUsize>,
}

impl TickRecorder {
    pub fn new() -> Self {
        Self {
            results: Arc::new(Mutex::new(Vec::with_capacity(10_000))),
            missed_deadlines: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn record(&self, result: TickResult) {
        if !result.deadline_met {
            self.missed_deadlines.fetch_add(1, Ordering::Relaxed);
        }
        self.results.lock().push(result);
    }

    pub fn get_results(&self) -> Vec<TickResult> {
        self.results.lock().clone()
    }

    pub fn get_missed_deadlines(&self) -> usize {
        self.missed_deadlines.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    pub fn save_to_csv(&self, path: impl AsRef<Path>) -> TelemetryResult<()> {
        let data = self.results.lock();
        let mut wtr = csv::Writer::from_path(path.as_ref()).map_err(csv_error)?;
        for record in data.iter() {
            wtr.serialize(record).map_err(csv_error)?;
        }
        wtr.flush()
            .map_err(|e| TelemetryError::Export(e.to_string()))?;
        tracing::info!(records = data.len(), path = %path.as_ref().display(), "saved tick results");
        Ok(())
    }
}

impl Default for TickRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn csv_error(e: csv::Error) -> TelemetryError {
    TelemetryError::Export(e.to_string())
}
