use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use common::{LinkDiagnostics, SampleSource, SharedWindow, SineSource, TelemetryConfig, TelemetryResult, TickRecorder};

pub mod broadcaster;
pub mod producer;
pub mod receiver;

pub use broadcaster::{Broadcaster, ClientChannel};
pub use producer::run_cadence;
pub use receiver::Receiver;

/// Runs the thread-based provider until `shutdown` is set.
///
/// Fails only on invalid configuration or when the listener cannot be bound.
pub fn run_provider(
    config: TelemetryConfig,
    source: Box<dyn SampleSource + Send>,
    shutdown: Arc<AtomicBool>,
) -> TelemetryResult<TickRecorder> {
    config.validate()?;
    let addr = config.broadcast.socket_addr()?;
    let listener = TcpListener::bind(addr)?;
    info!(%addr, "broadcaster listening");

    let broadcaster = Arc::new(
        Broadcaster::new(config.broadcast.write_timeout(), Arc::new(LinkDiagnostics::default()))
            .with_history(SharedWindow::new(config.receiver.capacity)?),
    );
    Ok(serve(listener, broadcaster, source, &config, shutdown))
}

/// Accepts on a dedicated thread and runs the cadence loop on the calling one.
pub fn serve(
    listener: TcpListener,
    broadcaster: Arc<Broadcaster>,
    mut source: Box<dyn SampleSource + Send>,
    config: &TelemetryConfig,
    shutdown: Arc<AtomicBool>,
) -> TickRecorder {
    let accept = {
        let broadcaster = Arc::clone(&broadcaster);
        let shutdown = Arc::clone(&shutdown);
        thread::spawn(move || broadcaster.accept_loop(listener, &shutdown))
    };

    let recorder = TickRecorder::new();
    run_cadence(source.as_mut(), &broadcaster, config.period(), &recorder, &shutdown);

    // The cadence loop can also end on its own; make sure accepting stops.
    shutdown.store(true, Ordering::Relaxed);
    match accept.join() {
        Ok(Err(e)) => warn!(error = %e, "accept loop failed"),
        Err(_) => warn!("accept thread panicked"),
        Ok(Ok(())) => {}
    }

    let closed = broadcaster.shutdown();
    info!(
        closed,
        ticks = recorder.len(),
        diagnostics = ?broadcaster.diagnostics().snapshot(),
        "provider stopped"
    );
    recorder
}

/// Runs a simulated-waveform provider for `config.duration_secs`.
pub fn run_experiment(config: TelemetryConfig) -> TelemetryResult<TickRecorder> {
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let duration = Duration::from_secs(config.duration_secs);
        thread::spawn(move || {
            thread::sleep(duration);
            shutdown.store(true, Ordering::Relaxed);
        });
    }

    let source = SineSource::new(config.source.amplitude, config.source.frequency_hz);
    run_provider(config, Box::new(source), shutdown)
}
