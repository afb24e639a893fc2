use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use common::config::{ReceiverConfig, RetryPolicy};
use common::receiving::idle_error;
use common::{wire, LinkDiagnostics, ReceiveState, Sample, SharedWindow, TelemetryError, TelemetryResult};

/// How often a blocked read or back-off sleep wakes up to look at the
/// shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Blocking counterpart of the async receiver, meant to own one thread.
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

    pub fn run(&self, shutdown: &AtomicBool) {
        let mut delay = self.retry.initial;
        let mut connected_before = false;

        while !shutdown.load(Ordering::Relaxed) {
            match self.connect() {
                Ok(stream) => {
                    if connected_before {
                        self.state.diagnostics().record_reconnect();
                    }
                    connected_before = true;
                    delay = self.retry.initial;
                    info!(addr = %self.addr, "connected to broadcaster");
                    let ended = self.consume(stream, shutdown);
                    if shutdown.load(Ordering::Relaxed) {
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

            if !sleep_unless_shutdown(delay, shutdown) {
                break;
            }
            delay = self.retry.next(delay);
        }
        info!(addr = %self.addr, "receiver stopped");
    }

    fn connect(&self) -> TelemetryResult<TcpStream> {
        TcpStream::connect_timeout(&self.addr, self.connect_timeout).map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                TelemetryError::ConnectTimeout(self.addr.to_string())
            }
            _ => TelemetryError::Connection(e),
        })
    }

    /// Reads lines until the peer closes, shutdown is set, the link goes
    /// silent for `idle_timeout`, or a line outgrows `wire::MAX_LINE`.
    fn consume(&self, stream: TcpStream, shutdown: &AtomicBool) -> TelemetryResult<()> {
        stream.set_read_timeout(Some(SHUTDOWN_POLL))?;
        let mut reader = BufReader::new(stream);
        // A timed-out read may leave a partial line here; keep it for the
        // next attempt.
        let mut line = Vec::with_capacity(64);
        let mut last_data = Instant::now();

        while !shutdown.load(Ordering::Relaxed) {
            let before = line.len();
            let room = (wire::MAX_LINE + 1 - before) as u64;
            let read = (&mut reader).take(room).read_until(b'\n', &mut line);
            if line.len() > before {
                last_data = Instant::now();
            }

            match read {
                Ok(0) => {
                    debug!("broadcaster closed the stream");
                    return Ok(());
                }
                Ok(_) if line.ends_with(b"\n") => {
                    self.state.ingest_line(&String::from_utf8_lossy(&line));
                    line.clear();
                }
                Ok(_) if line.len() > wire::MAX_LINE => {
                    return Err(self.state.reject_oversized(line.len()));
                }
                // Peer closed mid-line; the next read reports it.
                Ok(_) => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if last_data.elapsed() >= self.idle_timeout {
                        return Err(idle_error(self.idle_timeout));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Returns false if shutdown was requested before `delay` elapsed.
fn sleep_unless_shutdown(delay: Duration, shutdown: &AtomicBool) -> bool {
    let until = Instant::now() + delay;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= until {
            return true;
        }
        thread::sleep((until - now).min(SHUTDOWN_POLL));
    }
}
