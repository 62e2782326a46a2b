//! Bounded retry with backoff for cluster operations

use super::error::DispatchError;
use crate::config::ClusterPolicy;
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier applied to the delay after every failed attempt
    pub backoff_base: f64,
    pub jitter: bool,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_base: 2.0,
            jitter: false,
            jitter_factor: 0.3,
        }
    }
}

impl RetryConfig {
    /// `cluster_retries` retries after the first attempt, exponential from
    /// `cluster_retry_delay`, jittered so parallel units do not retry in step
    pub fn from_policy(policy: &ClusterPolicy) -> Self {
        Self {
            attempts: policy.retries + 1,
            initial_delay: policy.retry_delay,
            max_delay: policy.max_poll_interval.max(policy.retry_delay),
            jitter: true,
            ..Self::default()
        }
    }
}

pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only transient errors are retried. Exhausting the attempts on a
    /// transient error yields [`DispatchError::RetriesExhausted`].
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        operation: F,
        context: &str,
    ) -> Result<T, DispatchError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, DispatchError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= self.config.attempts => {
                    warn!("{} failed after {} attempts: {}", context, attempt, err);
                    if attempt == 1 {
                        return Err(err);
                    }
                    return Err(DispatchError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.apply_jitter(self.calculate_delay(attempt));
                    info!(
                        "Retrying {} (attempt {}/{}) after {:?}: {}",
                        context, attempt, self.config.attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Delay before the retry that follows `attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.config.backoff_base.powi(attempt as i32 - 1);
        let delay = self.config.initial_delay.as_secs_f64() * multiplier;
        Duration::from_secs_f64(delay.min(self.config.max_delay.as_secs_f64()))
    }

    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.config.jitter {
            return delay;
        }

        let mut rng = rand::rng();
        let jitter_range = delay.as_secs_f64() * self.config.jitter_factor;
        if jitter_range <= 0.0 {
            return delay;
        }
        let jitter = rng.random_range(-jitter_range / 2.0..=jitter_range / 2.0);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryConfig {
            attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        })
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let executor = RetryExecutor::new(RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..RetryConfig::default()
        });
        assert_eq!(executor.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(executor.calculate_delay(2), Duration::from_secs(2));
        assert_eq!(executor.calculate_delay(3), Duration::from_secs(4));
        assert_eq!(executor.calculate_delay(4), Duration::from_secs(5));
        assert_eq!(executor.calculate_delay(60), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let executor = RetryExecutor::new(RetryConfig {
            jitter: true,
            jitter_factor: 0.5,
            ..RetryConfig::default()
        });
        for _ in 0..50 {
            let d = executor.apply_jitter(Duration::from_secs(4));
            assert!(d >= Duration::from_secs(3) && d <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_from_policy() {
        let config = RetryConfig::from_policy(&ClusterPolicy::default());
        assert_eq!(config.attempts, 4);
        assert_eq!(config.initial_delay, Duration::from_secs(2));
        assert!(config.jitter);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let executor = fast(4);
        let calls = AtomicU32::new(0);
        let result = executor
            .execute_with_retry(
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DispatchError::Submission("busy".into()))
                    } else {
                        Ok(7)
                    }
                },
                "submit",
            )
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let executor = fast(3);
        let calls = AtomicU32::new(0);
        let err = executor
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DispatchError::Submission("busy".into()))
                },
                "submit",
            )
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, DispatchError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let executor = fast(5);
        let calls = AtomicU32::new(0);
        let err = executor
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DispatchError::Crashed("segfault".into()))
                },
                "poll",
            )
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, DispatchError::Crashed(_)));
    }
}
