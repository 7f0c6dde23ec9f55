//! Retry with Exponential Backoff
//! Used for connecting to infrastructure and for event delivery. Settlement
//! transactions are never retried here; a failed or timed-out commit surfaces.

use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::observability::metrics::get_metrics;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Patient policy for dependencies the service cannot start without
    pub fn startup() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Short policy for fire-and-forget delivery
    pub fn publish() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            ..Self::default()
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let next = Duration::from_millis((delay.as_millis() as f64 * self.multiplier) as u64);
        next.min(self.max_delay)
    }
}

fn record(operation: &str, outcome: &str) {
    if let Some(ref metrics) = *get_metrics() {
        metrics
            .retry_attempts_total
            .with_label_values(&[operation, outcome])
            .inc();
    }
}

/// Execute an async function with retry logic
pub async fn with_retry_async<F, Fut, T, E>(
    operation: &str,
    config: &RetryConfig,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation, attempt = attempt, "Operation succeeded after retry");
                    record(operation, "recovered");
                }
                return Ok(result);
            }
            Err(e) if attempt >= config.max_attempts => {
                warn!(
                    operation = operation,
                    attempt = attempt,
                    error = %e,
                    "Operation failed after all retries"
                );
                record(operation, "exhausted");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                record(operation, "retry");

                let actual_delay = if config.jitter {
                    let jitter = (jitter_fraction() * delay.as_millis() as f64 * 0.3) as u64;
                    delay + Duration::from_millis(jitter)
                } else {
                    delay
                };
                sleep(actual_delay).await;

                delay = config.next_delay(delay);
            }
        }
    }
}

/// Cheap jitter source in [0, 1)
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry_async("test", &quick(3), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 2 {
                Err("transient".to_string())
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retry_async("test", &quick(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.next_delay(Duration::from_secs(8)), Duration::from_secs(10));
    }
}
