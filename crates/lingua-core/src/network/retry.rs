//! Retry logic with exponential backoff.
//!
//! The registry resolver retries failed fetches with a doubling delay capped
//! at a maximum. A predicate decides whether an error is worth another
//! attempt; errors it rejects (timeouts, for the registry) end the loop at once.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RegistryConfig;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Exponential base (2.0 doubles the delay each attempt).
    pub exponential_base: f64,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::registry()
    }
}

impl RetryConfig {
    /// Registry policy: 3 attempts, 1s then 2s, capped at 5s, no jitter.
    pub fn registry() -> Self {
        Self {
            max_attempts: RegistryConfig::MAX_ATTEMPTS,
            base_delay: RegistryConfig::BASE_DELAY,
            max_delay: RegistryConfig::MAX_DELAY,
            exponential_base: 2.0,
            jitter: false,
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt as i32);
        let capped_secs =
            (self.base_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        if !self.jitter {
            return Duration::from_secs_f64(capped_secs);
        }

        // Factor in [0.5, 1.5) keeps the mean delay while spreading retries out.
        let factor = rand::rng().random_range(0.5..1.5);
        Duration::from_secs_f64((capped_secs * factor).min(self.max_delay.as_secs_f64()))
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

/// Retry an async operation with exponential backoff.
///
/// `should_retry` is consulted after every failure; returning `false` stops
/// immediately with that error.
///
/// Returns the final result together with the attempt statistics.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        let err = match operation(attempt).await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };

        stats.last_error = Some(err.to_string());

        if !should_retry(&err) {
            debug!("Error is not retryable: {}", err);
            return (Err(err), stats);
        }

        if attempt + 1 >= config.max_attempts {
            warn!(
                "All {} attempts exhausted. Last error: {}",
                config.max_attempts, err
            );
            return (Err(err), stats);
        }

        let delay = config.calculate_delay(attempt);
        stats.total_delay += delay;
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt + 1,
            config.max_attempts,
            err,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_registry_delays_double_and_cap() {
        let config = RetryConfig::registry();

        assert_eq!(config.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(config.calculate_delay(3), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_with_jitter_stays_in_range() {
        let config = RetryConfig::registry()
            .with_base_delay(Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(true);

        for _ in 0..20 {
            let delay = config.calculate_delay(0);
            assert!(
                delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3),
                "Delay {:?} should be between 1s and 3s",
                delay
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));

        let (result, stats) = retry_async(
            &RetryConfig::registry(),
            |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("temporary failure".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            |_: &String| true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.total_delay, Duration::from_secs(3));
        assert!(stats.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let (result, stats) = retry_async(
            &RetryConfig::registry(),
            |_| async { Err::<i32, _>("always fails".to_string()) },
            |_: &String| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(stats.attempts, 3);
        assert!(!stats.success);
        assert_eq!(stats.last_error, Some("always fails".to_string()));
    }

    #[tokio::test]
    async fn test_retry_non_retryable_error_stops_at_once() {
        let (result, stats) = retry_async(
            &RetryConfig::registry(),
            |_| async { Err::<i32, _>("timeout".to_string()) },
            |e: &String| e != "timeout",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.total_delay, Duration::ZERO);
    }
}
