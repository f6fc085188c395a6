//! Bounded exponential-backoff retry for remote calls

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::sweep::error::SweepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = retry_limit + 1
    pub retry_limit: u32,
    /// Upper bound on a single backoff sleep
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            cap: Duration::from_secs(30),
        }
    }
}

/// Per-invocation bookkeeping, dropped when `run` returns.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    last_error: Option<SweepError>,
}

impl RetryPolicy {
    pub fn new(retry_limit: u32, cap: Duration) -> Self {
        Self { retry_limit, cap }
    }

    /// Sleep before retry number `attempt + 1`: min(2^attempt s, cap).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.cap)
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, SweepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SweepError>>,
    {
        let mut state = RetryState::default();
        loop {
            match op().await {
                Ok(value) => {
                    if let Some(last) = &state.last_error {
                        log::info!("{} recovered after {} retries (last error: {})", label, state.attempt, last);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if state.attempt >= self.retry_limit => {
                    log::error!("{} failed after {} retries: {}", label, self.retry_limit, e);
                    return Err(e);
                }
                Err(e) => {
                    let wait = self.backoff(state.attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        label,
                        state.attempt + 1,
                        self.retry_limit,
                        e,
                        wait
                    );
                    state.last_error = Some(e);
                    state.attempt += 1;
                    sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> SweepError {
        SweepError::RpcTransient("timeout".to_string())
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(5));
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(5));
        assert_eq!(policy.backoff(80), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_k_failures() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = policy
            .run("get_balance", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(42u64)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two sleeps: 1s + 2s
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_propagates_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_secs(30));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run("estimate_gas", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(SweepError::RpcTransient(format!("timeout #{}", n)))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(SweepError::RpcTransient("timeout #2".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_secs(30));
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = policy
            .run("broadcast", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SweepError::RpcRejection("nonce too low".to_string()))
            })
            .await;

        assert!(matches!(result, Err(SweepError::RpcRejection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retry_limit_makes_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_secs(30));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run("get_nonce", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
