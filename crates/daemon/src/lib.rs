//! Process hosting the inventory engine.
//!
//! Loads configuration, initializes logging, selects the store and drives
//! the expiry sweeper until shutdown.

pub mod config;
pub mod error;

use std::future::Future;
use std::sync::Arc;

use engine::InventoryEngine;
use sqlx::postgres::PgPoolOptions;
use stock_store::{InMemoryStore, InventoryStore, PostgresStore};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use config::{Config, LogFormat};
pub use error::{DaemonError, Result};

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Connects to the configured store and runs until `shutdown` resolves.
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> Result<()> {
    match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await?;
            let store = PostgresStore::new(pool);
            store.run_migrations().await?;
            tracing::info!(
                max_connections = config.database_max_connections,
                "using PostgreSQL store"
            );
            serve(Arc::new(store), &config, shutdown).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            serve(Arc::new(InMemoryStore::new()), &config, shutdown).await
        }
    }
}

/// Runs the engine's sweeper over `store` until `shutdown` resolves, then
/// waits for the pass in flight to finish.
pub async fn serve<S>(store: Arc<S>, config: &Config, shutdown: impl Future<Output = ()>) -> Result<()>
where
    S: InventoryStore + 'static,
{
    let engine = InventoryEngine::new(store, config.engine_config());
    let (stop_tx, stop_rx) = broadcast::channel(1);
    let sweeper = engine.sweeper().spawn(stop_rx);
    tracing::info!("inventory engine started");

    shutdown.await;

    // The sweeper may already have exited; nothing to stop then
    let _ = stop_tx.send(());
    sweeper.await?;
    tracing::info!("inventory engine stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let config = Config {
            sweep_interval: Duration::from_secs(1),
            ..Config::default()
        };
        let store = Arc::new(InMemoryStore::new());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            serve(store, &config, tokio::time::sleep(Duration::from_millis(20))),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn run_without_database_uses_memory_store() {
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(Config::default(), std::future::ready(())),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
    }
}
