use std::env;
use std::error::Error;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use common::config::load_config;
use common::logging::init_logging;
use common::{LinkDiagnostics, PushSource};
use sample_store::{router, AppState, SqliteStore};

const DEFAULT_CONFIG: &str = "configs/telemetry.toml";

#[tokio::main]
async fn main() {
    init_logging("info");

    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).map(String::as_str).unwrap_or(DEFAULT_CONFIG);

    if let Err(e) = run(config_path).await {
        error!(error = %e, "ingest server failed");
        std::process::exit(1);
    }
}

async fn run(config_path: &str) -> Result<(), Box<dyn Error>> {
    let config = load_config(config_path)?;
    let store = SqliteStore::connect(&config.store).await?;
    let mut state = AppState::new(Arc::new(store));

    let shutdown = CancellationToken::new();
    let provider = if config.store.relay {
        let (sink, source) =
            PushSource::channel(config.source.queue_capacity, Arc::new(LinkDiagnostics::default()));
        state = state.with_relay(sink);
        let config = config.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            let result = async_impl::run_provider(config, Box::new(source), shutdown.clone()).await;
            if let Err(e) = &result {
                // No point accepting uploads nobody can relay.
                error!(error = %e, "relay provider failed");
                shutdown.cancel();
            }
            result
        }))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.store.http_bind).await?;
    info!(addr = %config.store.http_bind, relay = config.store.relay, "ingest server listening");

    let stop = shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("ctrl-c received, shutting down"),
                _ = stop.cancelled() => {}
            }
        })
        .await?;
    shutdown.cancel();

    if let Some(provider) = provider {
        let recorder = provider.await??;
        info!(ticks = recorder.len(), "relay stopped");
    }
    Ok(())
}
