//! Caller-imposed deadlines.

use std::future::Future;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Runs an engine call under a deadline.
///
/// When the deadline elapses the call is abandoned and reported as
/// `OutcomeUnknown`: its writes may or may not have committed. Callers
/// should not blindly retry; the sweeper reclaims whatever was left behind.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(?deadline, "deadline elapsed, outcome unknown");
            Err(EngineError::OutcomeUnknown(deadline))
        }
    }
}
