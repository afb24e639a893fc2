use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::config::{ReceiverConfig, RetryPolicy};
use common::receiving::idle_error;
use common::{wire, LinkDiagnostics, ReceiveState, Sample, SharedWindow, TelemetryError, TelemetryResult};

/// Long-lived consumer of a broadcaster's stream.
///
/// `run` owns the connection and keeps reconnecting with bounded back-off;
/// `latest` may be called from any thread at any time.
pub struct Receiver {
    addr: SocketAddr,
    connect_timeout: Duration,
    idle_timeout: Duration,
    retry: RetryPolicy,
    state: ReceiveState,
}

impl Receiver {
    pub fn new(config: &ReceiverConfig) -> TelemetryResult<Self> {
        Ok(Self {
            addr: config.socket_addr()?,
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
            retry: config.retry_policy(),
            state: ReceiveState::new(config.capacity, config.smoothing_window)?,
        })
    }

    pub fn latest(&self) -> Vec<Sample> {
        self.state.latest()
    }

    pub fn smoothed(&self) -> Vec<Sample> {
        self.state.smoothed()
    }

    pub fn window(&self) -> SharedWindow {
        self.state.window()
    }

    pub fn diagnostics(&self) -> Arc<LinkDiagnostics> {
        self.state.diagnostics()
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut delay = self.retry.initial;
        let mut connected_before = false;

        while !shutdown.is_cancelled() {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.connect() => outcome,
            };

            match outcome {
                Ok(stream) => {
                    if connected_before {
                        self.state.diagnostics().record_reconnect();
                    }
                    connected_before = true;
                    delay = self.retry.initial;
                    info!(addr = %self.addr, "connected to broadcaster");
                    let ended = self.consume(stream, &shutdown).await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                    match ended {
                        Ok(()) => warn!(addr = %self.addr, retry_in = ?delay, "connection lost"),
                        Err(e) => warn!(addr = %self.addr, error = %e, retry_in = ?delay, "connection lost"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, retry_in = ?delay, "connect failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
            delay = self.retry.next(delay);
        }
        info!(addr = %self.addr, "receiver stopped");
    }

    async fn connect(&self) -> TelemetryResult<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(self.addr)).await {
            Ok(stream) => Ok(stream?),
            Err(_) => Err(TelemetryError::ConnectTimeout(self.addr.to_string())),
        }
    }

    /// Reads lines until the peer closes, shutdown is cancelled, the link
    /// goes silent for `idle_timeout`, or a line outgrows `wire::MAX_LINE`.
    async fn consume(&self, stream: TcpStream, shutdown: &CancellationToken) -> TelemetryResult<()> {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::with_capacity(64);

        loop {
            line.clear();
            let mut bounded = (&mut reader).take(wire::MAX_LINE as u64 + 1);
            let read = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                read = timeout(self.idle_timeout, bounded.read_until(b'\n', &mut line)) => read,
            };
            match read {
                Err(_) => return Err(idle_error(self.idle_timeout)),
                Ok(Ok(0)) => {
                    debug!("broadcaster closed the stream");
                    return Ok(());
                }
                Ok(Ok(_)) if line.ends_with(b"\n") => {
                    self.state.ingest_line(&String::from_utf8_lossy(&line));
                }
                Ok(Ok(_)) if line.len() > wire::MAX_LINE => {
                    return Err(self.state.reject_oversized(line.len()));
                }
                Ok(Ok(_)) => {
                    debug!("broadcaster closed the stream mid-line");
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }
}
