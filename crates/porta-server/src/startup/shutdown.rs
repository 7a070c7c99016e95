//! OS signal handling for the Porta server

use porta_common::ShutdownSignal;
use tracing::{error, info};

/// Resolves once Ctrl+C or SIGTERM arrives. A handler that cannot be
/// installed is logged and never resolves, so the other one still works.
pub async fn shutdown_requested() -> &'static str {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl+C",
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM) in the background
///
/// Returns a signal that fires when the process is asked to stop.
pub fn wait_for_shutdown_signal() -> ShutdownSignal {
    let shutdown = ShutdownSignal::new();
    let trigger = shutdown.clone();

    tokio::spawn(async move {
        let name = shutdown_requested().await;
        info!("Received {}, initiating graceful shutdown...", name);
        trigger.shutdown();
    });

    shutdown
}
