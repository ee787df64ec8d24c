//! Bridge entry point.
//!
//! Wires the core to the process: tracing, configuration, buffer pool
//! installation, signal-driven graceful shutdown.

use bridge_core::buffer_pool::{self, HeapBufferPool};
use bridge_core::shutdown::TokenShutdownService;
use bridge_core::{Bridge, BridgeConfig};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting bridge");

    // Load configuration
    let config = BridgeConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bridge_id = %config.bridge_id,
        graceful_shutdown_min_window = ?config.graceful_shutdown_min_window,
        load_sample_interval = ?config.load_sample_interval,
        loaded_threshold_pps = config.loaded_threshold_pps,
        recovery_threshold_pps = config.recovery_threshold_pps,
        initial_drain_mode = config.initial_drain_mode,
        "Configuration loaded successfully"
    );

    // The buffer pool must be in place before any media machinery runs.
    buffer_pool::install(Arc::new(HeapBufferPool));

    // The shutdown coordinator fires this token once the bridge is empty
    // and the announcement window has elapsed.
    let shutdown_complete = CancellationToken::new();
    let bridge = Bridge::new(
        config,
        Arc::new(TokenShutdownService::new(shutdown_complete.clone())),
        Arc::new(|| std::process::exit(0)),
    );

    bridge.start();

    tokio::select! {
        () = shutdown_signal() => {
            bridge.shutdown(true);
        }
        () = shutdown_complete.cancelled() => {}
    }

    // Existing conferences run to natural expiry; the coordinator cancels
    // the token when the bridge is done.
    shutdown_complete.cancelled().await;

    bridge.stop();
    info!("Bridge shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
