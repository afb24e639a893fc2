use std::f64::consts::PI;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::LinkDiagnostics;
use crate::Sample;

/// Producer side of the telemetry stream, polled once per cadence tick.
///
/// `None` means nothing is available this tick; the cadence loop moves on.
pub trait SampleSource {
    fn next_sample(&mut self, elapsed: Duration) -> Option<Sample>;
}

/// Simulated waveform: `amplitude * sin(2π·f·t)` with `t` the elapsed time.
#[derive(Debug, Clone, Copy)]
pub struct SineSource {
    pub amplitude: f64,
    pub frequency_hz: f64,
}

impl SineSource {
    pub fn new(amplitude: f64, frequency_hz: f64) -> Self {
        Self {
            amplitude,
            frequency_hz,
        }
    }

    pub fn value_at(&self, t: f64) -> f64 {
        self.amplitude * (2.0 * PI * self.frequency_hz * t).sin()
    }
}

impl SampleSource for SineSource {
    fn next_sample(&mut self, elapsed: Duration) -> Option<Sample> {
        let t = elapsed.as_secs_f64();
        Some(Sample::new(self.value_at(t), t))
    }
}

/// Acquisition-backed source fed through a [`SampleSink`].
///
/// Each poll yields the newest value pushed since the previous poll, so a
/// device reporting faster than the cadence is down-sampled rather than
/// queued up behind it.
pub struct PushSource {
    rx: Receiver<Sample>,
}

/// Device-facing half of a [`PushSource`]. Cheap to clone.
#[derive(Clone)]
pub struct SampleSink {
    tx: SyncSender<Sample>,
    diagnostics: Arc<LinkDiagnostics>,
}

impl PushSource {
    pub fn channel(capacity: usize, diagnostics: Arc<LinkDiagnostics>) -> (SampleSink, PushSource) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (SampleSink { tx, diagnostics }, PushSource { rx })
    }
}

impl SampleSource for PushSource {
    fn next_sample(&mut self, _elapsed: Duration) -> Option<Sample> {
        let mut latest = None;
        while let Ok(sample) = self.rx.try_recv() {
            latest = Some(sample);
        }
        latest
    }
}

impl SampleSink {
    /// Hands a reading to the source without blocking. Returns `false` when
    /// the reading was dropped because the queue is full or the source is gone.
    pub fn on_sample(&self, value: f64, timestamp: f64) -> bool {
        match self.tx.try_send(Sample::new(value, timestamp)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.diagnostics.record_rejected_push();
                tracing::warn!(value, "sample hand-off queue full, dropping reading");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.diagnostics.record_rejected_push();
                false
            }
        }
    }
}
