//! Retry executor.
//!
//! # Responsibilities
//! - Re-run a failing async operation with deterministic exponential backoff
//! - Stop at the retry ceiling or the optional overall timeout
//! - Abort a backoff wait as soon as the caller's shutdown signal fires
//!
//! # Design Decisions
//! - The last observed error is returned, never an aggregate
//! - A wait that would overrun the overall timeout is not started

use std::fmt::Display;
use std::future::Future;

use tokio::time::{sleep, Instant};

use crate::config::RetryConfig;
use crate::lifecycle::ShutdownSignal;
use crate::resilience::backoff::ExponentialBackoff;

/// Run `op` until it succeeds or the policy gives up.
///
/// `op` is attempted at most `config.max_retries + 1` times.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, signal: &ShutdownSignal, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let deadline = config.timeout().map(|t| Instant::now() + t);
    let mut backoff = ExponentialBackoff::new(config);
    let mut attempt: u32 = 1;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(delay) = backoff.next() else {
            tracing::warn!(attempt, error = %err, "Retries exhausted");
            return Err(err);
        };

        if signal.is_triggered() {
            tracing::debug!(attempt, error = %err, "Retry cancelled");
            return Err(err);
        }

        if let Some(deadline) = deadline {
            if Instant::now() + delay > deadline {
                tracing::warn!(attempt, error = %err, "Retry timeout elapsed");
                return Err(err);
            }
        }

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );

        tokio::select! {
            _ = sleep(delay) => {}
            _ = signal.triggered() => {
                tracing::debug!(attempt, error = %err, "Retry cancelled during backoff");
                return Err(err);
            }
        }

        attempt += 1;
    }
}
