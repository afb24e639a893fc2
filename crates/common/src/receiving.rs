use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::diagnostics::LinkDiagnostics;
use crate::error::{TelemetryError, TelemetryResult};
use crate::smoothing::smooth_samples;
use crate::window::SharedWindow;
use crate::{wire, Sample};

/// Consumer-side state shared by both receiver implementations: the local
/// window, the clock used to stamp arrivals, and link counters.
#[derive(Debug, Clone)]
pub struct ReceiveState {
    window: SharedWindow,
    smoothing_window: usize,
    diagnostics: Arc<LinkDiagnostics>,
    origin: Instant,
}

impl ReceiveState {
    pub fn new(capacity: usize, smoothing_window: usize) -> TelemetryResult<Self> {
        Ok(Self {
            window: SharedWindow::new(capacity)?,
            smoothing_window,
            diagnostics: Arc::new(LinkDiagnostics::default()),
            origin: Instant::now(),
        })
    }

    /// Decodes one wire line into the window. A malformed line is counted and
    /// skipped; it never affects the connection.
    pub fn ingest_line(&self, line: &str) -> Option<Sample> {
        if line.trim().is_empty() {
            return None;
        }
        match wire::decode(line) {
            Ok(value) => {
                let sample = Sample::new(value, self.origin.elapsed().as_secs_f64());
                self.window.push(sample);
                tracing::debug!(value, "received sample");
                Some(sample)
            }
            Err(e) => {
                self.diagnostics.record_malformed();
                tracing::warn!(error = %e, "skipping malformed message");
                None
            }
        }
    }

    /// Counts a line that passed `wire::MAX_LINE` without a newline. The
    /// caller drops the connection; there is no safe point to resync on.
    pub fn reject_oversized(&self, buffered: usize) -> TelemetryError {
        self.diagnostics.record_malformed();
        TelemetryError::MalformedMessage(format!(
            "line exceeds {} bytes ({buffered} buffered without a newline)",
            wire::MAX_LINE
        ))
    }

    pub fn window(&self) -> SharedWindow {
        self.window.clone()
    }

    pub fn latest(&self) -> Vec<Sample> {
        self.window.snapshot()
    }

    pub fn smoothed(&self) -> Vec<Sample> {
        smooth_samples(&self.window.snapshot(), self.smoothing_window)
    }

    pub fn diagnostics(&self) -> Arc<LinkDiagnostics> {
        Arc::clone(&self.diagnostics)
    }
}

/// A link that stayed silent for `after` is treated like a lost connection.
pub fn idle_error(after: Duration) -> TelemetryError {
    TelemetryError::Connection(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("no data for {after:?}"),
    ))
}
