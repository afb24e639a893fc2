use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::clients::{Channel, ChannelStatus};
use common::{
    wire, BroadcastReport, ChannelState, ClientId, ClientSet, LinkDiagnostics, Sample,
    SharedWindow, TelemetryError, TelemetryResult,
};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// One connected consumer. Owned by the [`Broadcaster`] from accept until its
/// first failed write or shutdown.
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

impl<W: AsyncWrite + Unpin + Send> ClientChannel<W> {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> ChannelState {
        self.status.state()
    }

    /// Writes one encoded line; lock acquisition and the write share the deadline.
    async fn send(&self, bytes: &[u8], deadline: Duration) -> TelemetryResult<()> {
        if self.status.state() == ChannelState::Closed {
            return Err(TelemetryError::ChannelClosed);
        }
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.write_all(bytes).await?;
            sink.flush().await
        };
        match timeout(deadline, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TelemetryError::Connection(e)),
            Err(_) => Err(TelemetryError::WriteTimeout(deadline)),
        }
    }

    /// Returns `true` if this call moved the channel to `Closed`.
    async fn close(&self, deadline: Duration) -> bool {
        if !self.status.close() {
            return false;
        }
        if let Ok(mut sink) = self.sink.try_lock() {
            let _ = timeout(deadline, sink.shutdown()).await;
        }
        true
    }
}

/// Fans every sample out to all connected consumers.
///
/// Accepting and broadcasting only meet at the [`ClientSet`] lock. A consumer
/// whose write fails or exceeds `write_timeout` is closed and removed; the
/// others still receive the sample.
pub struct Broadcaster<W = TcpStream> {
    clients: ClientSet<ClientChannel<W>>,
    write_timeout: Duration,
    diagnostics: Arc<LinkDiagnostics>,
    history: Option<SharedWindow>,
}

impl<W: AsyncWrite + Unpin + Send> Broadcaster<W> {
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

    /// Membership in the active set is the liveness flag.
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

    pub async fn broadcast(&self, sample: &Sample) -> BroadcastReport {
        if let Some(history) = &self.history {
            history.push(*sample);
        }
        let snapshot = self.clients.snapshot();
        if snapshot.is_empty() {
            return BroadcastReport::default();
        }

        let line = wire::encode(sample.value);
        let deadline = self.write_timeout;
        let outcomes = join_all(snapshot.iter().map(|client| {
            let bytes = line.as_bytes();
            async move { (client.id(), client.send(bytes, deadline).await) }
        }))
        .await;

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(%id, error = %e, "write failed, dropping consumer");
                    failed.push(id);
                }
            }
        }

        for client in self.clients.remove(&failed) {
            if client.close(deadline).await {
                self.diagnostics.record_drop();
                info!(id = %client.id(), peer = client.peer(), "consumer dropped");
                report.dropped.push(client.id());
            }
        }
        report
    }

    /// Closes every channel. Returns how many were open.
    pub async fn shutdown(&self) -> usize {
        let mut closed = 0;
        for client in self.clients.drain() {
            if client.close(self.write_timeout).await {
                closed += 1;
            }
        }
        debug!(closed, "broadcaster shut down");
        closed
    }
}

impl Broadcaster<TcpStream> {
    /// Accepts consumers until `shutdown` fires. Never touches the write path.
    pub async fn accept_loop(&self, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(%peer, error = %e, "could not disable Nagle");
                            }
                            self.add_client(stream, peer.to_string());
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
        debug!("accept loop stopped");
    }
}
