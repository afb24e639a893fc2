use std::io::{self, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use common::clients::{Channel, ChannelStatus};
use common::{
    wire, BroadcastReport, ChannelState, ClientId, ClientSet, LinkDiagnostics, Sample,
    SharedWindow, TelemetryError, TelemetryResult,
};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

pub struct ClientChannel<W> {
    id: ClientId,
    peer: String,
    sink: Mutex<W>,
    status: ChannelStatus,
}

impl<W> Channel for ClientChannel<W> {
    fn id(&self) -> ClientId {
        self.id
    }
}

impl<W: Write + Send> ClientChannel<W> {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> ChannelState {
        self.status.state()
    }

    // Sockets carry their own write timeout, so a stalled peer surfaces here
    // as WouldBlock/TimedOut instead of blocking forever.
    fn send(&self, bytes: &[u8], deadline: Duration) -> TelemetryResult<()> {
        if self.status.state() == ChannelState::Closed {
            return Err(TelemetryError::ChannelClosed);
        }
        let mut sink = self.sink.lock();
        sink.write_all(bytes)
            .and_then(|_| sink.flush())
            .map_err(|e| match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => TelemetryError::WriteTimeout(deadline),
                _ => TelemetryError::Connection(e),
            })
    }
}

/// Thread-based fan-out. Writes happen one client after another on the
/// calling thread, each bounded by the socket write timeout.
pub struct Broadcaster<W = TcpStream> {
    clients: ClientSet<ClientChannel<W>>,
    write_timeout: Duration,
    diagnostics: Arc<LinkDiagnostics>,
    history: Option<SharedWindow>,
}

impl<W: Write + Send> Broadcaster<W> {
    pub fn new(write_timeout: Duration, diagnostics: Arc<LinkDiagnostics>) -> Self {
        Self {
            clients: ClientSet::new(),
            write_timeout,
            diagnostics,
            history: None,
        }
    }

    /// Keeps every emitted sample in `window`, whether or not anyone is connected.
    pub fn with_history(mut self, window: SharedWindow) -> Self {
        self.history = Some(window);
        self
    }

    pub fn history(&self) -> Option<SharedWindow> {
        self.history.clone()
    }

    pub fn add_client(&self, sink: W, peer: impl Into<String>) -> ClientId {
        let id = self.clients.allocate_id();
        let peer = peer.into();
        info!(%id, %peer, "consumer connected");
        self.clients.insert(Arc::new(ClientChannel {
            id,
            peer,
            sink: Mutex::new(sink),
            status: ChannelStatus::new(),
        }));
        self.diagnostics.record_accept();
        id
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_state(&self, id: ClientId) -> ChannelState {
        if self.clients.contains(id) {
            ChannelState::Open
        } else {
            ChannelState::Closed
        }
    }

    pub fn diagnostics(&self) -> Arc<LinkDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    pub fn broadcast(&self, sample: &Sample) -> BroadcastReport {
        if let Some(history) = &self.history {
            history.push(*sample);
        }
        let snapshot = self.clients.snapshot();
        let mut report = BroadcastReport::default();
        if snapshot.is_empty() {
            return report;
        }

        let line = wire::encode(sample.value);
        let mut failed = Vec::new();
        for client in &snapshot {
            match client.send(line.as_bytes(), self.write_timeout) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(id = %client.id(), error = %e, "write failed, dropping consumer");
                    failed.push(client.id());
                }
            }
        }

        // Dropping the last Arc closes the socket.
        for client in self.clients.remove(&failed) {
            if client.status.close() {
                self.diagnostics.record_drop();
                info!(id = %client.id(), peer = client.peer(), "consumer dropped");
                report.dropped.push(client.id());
            }
        }
        report
    }

    pub fn shutdown(&self) -> usize {
        let closed = self
            .clients
            .drain()
            .into_iter()
            .filter(|client| client.status.close())
            .count();
        debug!(closed, "broadcaster shut down");
        closed
    }
}

impl Broadcaster<TcpStream> {
    /// Polls a non-blocking listener until `shutdown` is set.
    pub fn accept_loop(&self, listener: TcpListener, shutdown: &AtomicBool) -> io::Result<()> {
        listener.set_nonblocking(true)?;

        while !shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => match self.configure(&stream) {
                    Ok(()) => {
                        self.add_client(stream, peer.to_string());
                    }
                    Err(e) => warn!(%peer, error = %e, "could not configure consumer socket"),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        debug!("accept loop stopped");
        Ok(())
    }

    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(self.write_timeout))?;
        stream.set_nodelay(true)
    }
}
