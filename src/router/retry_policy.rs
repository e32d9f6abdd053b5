//! Inner per-executor retry wrapper with exponential backoff and jitter.
//! Distinct from the router's own outer retry loop across executors: this
//! wraps a single `send_order` call that may itself be flaky at the
//! transport layer.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: f64,
    pub max_delay: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: 0.5, max_delay: 3.0, jitter: true }
    }
}

pub struct ExecutionRetryPolicy {
    config: RetryConfig,
}

impl ExecutionRetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retries `f` up to `max_attempts` times, sleeping with growing backoff
    /// between attempts. Returns the last error if every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delay = self.config.base_delay;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.config.max_attempts {
                        return Err(e);
                    }
                    let sleep_for = if self.config.jitter {
                        let jitter: f64 = rand::thread_rng().gen_range(0.0..(delay / 4.0).max(0.0001));
                        delay + jitter
                    } else {
                        delay
                    };
                    tokio::time::sleep(Duration::from_secs_f64(sleep_for)).await;
                    delay = (delay * 1.7).min(self.config.max_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let policy = ExecutionRetryPolicy::new(RetryConfig { max_attempts: 3, base_delay: 0.001, max_delay: 0.01, jitter: false });
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_max_attempts() {
        let policy = ExecutionRetryPolicy::new(RetryConfig { max_attempts: 3, base_delay: 0.001, max_delay: 0.01, jitter: false });
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Ok(9) } }
            })
            .await;
        assert_eq!(result.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error_after_exhausting_attempts() {
        let policy = ExecutionRetryPolicy::new(RetryConfig { max_attempts: 2, base_delay: 0.001, max_delay: 0.01, jitter: false });
        let result: Result<u32, &str> = policy.run(|| async { Err("down") }).await;
        assert_eq!(result.unwrap_err(), "down");
    }
}
