//! Bounded retry of optimistic writes.

use std::future::Future;

use crate::error::{EngineError, Result};

/// How many times an operation is attempted when it keeps losing races.
///
/// Each attempt re-reads state and re-applies its checks, so a retry never
/// writes from stale data. Only conflicts are retried; every other error is
/// returned at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Creates a policy; at least one attempt is always made.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Runs `attempt` until it succeeds, fails with something other than a
    /// conflict, or the attempts are used up.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt(attempts).await {
                Err(e) if e.is_conflict() => {
                    metrics::counter!("ledger_conflicts_total", "operation" => operation)
                        .increment(1);
                    if attempts >= self.max_attempts {
                        tracing::warn!(operation, attempts, "giving up after repeated conflicts");
                        return Err(EngineError::ConcurrencyConflict { attempts });
                    }
                    tracing::debug!(operation, attempts, error = %e, "lost a race, retrying");
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}
