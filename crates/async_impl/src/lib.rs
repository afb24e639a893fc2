use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use common::{LinkDiagnostics, SampleSource, SharedWindow, SineSource, TelemetryConfig, TelemetryResult, TickRecorder};

pub mod broadcaster;
pub mod producer;
pub mod receiver;

pub use broadcaster::{Broadcaster, ClientChannel};
pub use producer::run_cadence;
pub use receiver::Receiver;

/// Runs the tokio provider: binds the configured address, accepts consumers
/// and broadcasts one sample per period until `shutdown` fires.
///
/// Fails only on invalid configuration or when the listener cannot be bound.
pub async fn run_provider(
    config: TelemetryConfig,
    source: Box<dyn SampleSource + Send>,
    shutdown: CancellationToken,
) -> TelemetryResult<TickRecorder> {
    config.validate()?;
    let addr = config.broadcast.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "broadcaster listening");

    let broadcaster = Arc::new(
        Broadcaster::new(config.broadcast.write_timeout(), Arc::new(LinkDiagnostics::default()))
            .with_history(SharedWindow::new(config.receiver.capacity)?),
    );
    Ok(serve(listener, broadcaster, source, &config, shutdown).await)
}

/// Drives an already bound listener. The accept task and the cadence loop run
/// side by side; both stop on `shutdown`, after which every channel is closed.
pub async fn serve(
    listener: TcpListener,
    broadcaster: Arc<Broadcaster>,
    mut source: Box<dyn SampleSource + Send>,
    config: &TelemetryConfig,
    shutdown: CancellationToken,
) -> TickRecorder {
    let accept = {
        let broadcaster = Arc::clone(&broadcaster);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { broadcaster.accept_loop(listener, shutdown).await })
    };

    let recorder = TickRecorder::new();
    run_cadence(source.as_mut(), &broadcaster, config.period(), &recorder, shutdown).await;

    let _ = accept.await;
    let closed = broadcaster.shutdown().await;
    info!(
        closed,
        ticks = recorder.len(),
        diagnostics = ?broadcaster.diagnostics().snapshot(),
        "provider stopped"
    );
    recorder
}

/// Runs a simulated-waveform provider for `config.duration_secs`.
pub async fn run_experiment(config: TelemetryConfig) -> TelemetryResult<TickRecorder> {
    let shutdown = CancellationToken::new();
    let timer = {
        let shutdown = shutdown.clone();
        let duration = std::time::Duration::from_secs(config.duration_secs);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            shutdown.cancel();
        })
    };

    let source = SineSource::new(config.source.amplitude, config.source.frequency_hz);
    let result = run_provider(config, Box::new(source), shutdown).await;
    timer.abort();
    result
}
