//! Time-budgeted retry envelope
//!
//! Wraps every provider-side connector call. The budget is charged for
//! call time and for backoff sleeps alike, so total wall time never
//! exceeds the caller's deadline; each attempt receives the remaining
//! budget as its own authoritative timeout. Only transport-class failures
//! (`NetworkFailed`, `ServerError`) are retried.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use polaris_core::{PolarisError, PolarisResult};

/// Budget, attempt count and backoff for one enveloped call
#[derive(Debug, Clone, Copy)]
pub struct RetrySpec {
    /// Total wall-time budget, spent by calls and sleeps
    pub budget: Duration,
    /// Attempts allowed, the first try included
    pub max_tries: u32,
    /// Pause between attempts, capped by the remaining budget
    pub interval: Duration,
}

/// Run `call` under `spec`, feeding it the remaining budget each attempt
///
/// Returns the first terminal outcome (success or non-retryable error), or
/// the last transient error once tries or budget run out.
pub async fn retry_call<T, F, Fut>(spec: RetrySpec, mut call: F) -> PolarisResult<T>
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = PolarisResult<T>>,
{
    let mut budget = spec.budget;
    let mut tries = spec.max_tries;
    let mut last: Option<PolarisResult<T>> = None;

    while tries > 0 && !budget.is_zero() {
        tries -= 1;
        let begin = Instant::now();
        let result = call(budget).await;
        let used = begin.elapsed();

        let transient = matches!(&result, Err(e) if e.is_retryable());
        if !transient || used >= budget {
            return result;
        }
        budget -= used;
        last = Some(result);

        if tries == 0 {
            break;
        }
        let backoff = budget.min(spec.interval);
        debug!(
            backoff_ms = backoff.as_millis() as u64,
            remaining_ms = budget.as_millis() as u64,
            tries_left = tries,
            "transient failure, backing off"
        );
        tokio::time::sleep(backoff).await;
        budget = budget.saturating_sub(backoff);
    }

    last.unwrap_or_else(|| {
        Err(PolarisError::InvalidArgument(
            "retry envelope needs a positive budget and at least one try".into(),
        ))
    })
}
