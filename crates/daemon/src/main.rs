//! Inventory daemon entry point.

use daemon::Config;
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> daemon::Result<()> {
    let config = Config::from_env();
    daemon::init_tracing(&config);

    tracing::info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        reservation_ttl_secs = config.reservation_ttl.as_secs(),
        transfer_ttl_secs = config.transfer_ttl.as_secs(),
        "starting inventory daemon"
    );

    if let Err(e) = daemon::run(config, shutdown_signal()).await {
        tracing::error!(error = %e, "inventory daemon failed");
        return Err(e);
    }

    tracing::info!("inventory daemon shut down gracefully");
    Ok(())
}
