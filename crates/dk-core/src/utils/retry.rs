use std::future::Future;
use std::time::Duration;

use dk_config::RunnerConfig;
use dk_types::Result;
use tracing::{error, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(120),
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    /// Image pull policy from the runner configuration.
    pub fn for_pull(config: &RunnerConfig) -> Self {
        Self {
            max_attempts: config.pull_max_attempts.max(1),
            base_delay: Duration::from_millis(config.pull_backoff_base_ms),
            max_delay: Duration::from_millis(config.pull_backoff_max_ms),
            exponential_base: 2.0,
        }
    }

    /// Sleep after the failed attempt number `attempt` (1-based). Never decreases.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exp);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Execute `f` with exponential backoff while it fails with a retryable error.
///
/// `f` receives the 1-based attempt number. Non-retryable errors are returned at once.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, name: &str, mut f: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                error!("{name} failed after {max_attempts} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for(attempt);
                warn!(
                    "{name} failed (attempt {attempt}/{max_attempts}) retrying in {:.1}s: {e}",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_types::DockyardError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
        }
    }

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let cfg = config();
        let delays: Vec<_> = (1..=6).map(|a| cfg.delay_for(a)).collect();
        assert_eq!(delays[0], Duration::from_secs(10));
        assert_eq!(delays[1], Duration::from_secs(20));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn pull_policy_from_runner_config() {
        let cfg = RetryConfig::for_pull(&RunnerConfig::default());
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.base_delay, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_success_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = with_retry(&config(), "test", move |_| {
            let a = Arc::clone(&attempts_clone);
            async move {
                if a.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DockyardError::Transient("flaky".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_ceiling_and_backoff() {
        let start = tokio::time::Instant::now();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<()> = with_retry(&config(), "test", move |_| {
            let a = Arc::clone(&attempts_clone);
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(DockyardError::Transient("still down".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(DockyardError::Transient(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 10s + 20s of backoff between the three attempts
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<()> = with_retry(&config(), "test", move |_| {
            let a = Arc::clone(&attempts_clone);
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(DockyardError::LoginFailed("denied".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(DockyardError::LoginFailed(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
