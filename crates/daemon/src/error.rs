//! Daemon error types.

use thiserror::Error;

/// Errors that stop the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Could not connect to the database: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Sweeper task failed: {0}")]
    Sweeper(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
