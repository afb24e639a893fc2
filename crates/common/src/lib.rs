use serde::{Deserialize, Serialize};

pub mod clients;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod receiving;
pub mod smoothing;
pub mod source;
pub mod window;
pub mod wire;

pub use clients::{BroadcastReport, ChannelState, ClientId, ClientSet};
pub use config::TelemetryConfig;
pub use diagnostics::LinkDiagnostics;
pub use error::{TelemetryError, TelemetryResult};
pub use metrics::{TickRecorder, TickResult};
pub use receiving::ReceiveState;
pub use source::{PushSource, SampleSink, SampleSource, SineSource};
pub use window::{SharedWindow, WindowBuffer};

/// One timestamped scalar measurement.
///
/// `timestamp` is in seconds relative to an origin picked by whoever created
/// the sample: stream start for simulated sources and receivers, the Unix
/// epoch for HTTP uploads. The value is an opaque decimal with no assumed unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub timestamp: f64,
}

impl Sample {
    pub fn new(value: f64, timestamp: f64) -> Self {
        Self { value, timestamp }
    }

    /// `[t, v]` pair as plotted by the renderer.
    pub fn point(&self) -> [f64; 2] {
        [self.timestamp, self.value]
    }
}
