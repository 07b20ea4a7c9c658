//! Exponential backoff for transient LLM failures.

use std::future::Future;
use std::time::Duration;

use super::LlmError;

/// Delay before retry `n` (0-based): 1s, 2s, 4s, ...
fn delay_for(retry: u32) -> Duration {
    Duration::from_secs(1u64 << retry.min(4))
}

/// Run `op` with up to `max_retries` retries on retryable errors.
///
/// Non-retryable errors surface immediately; exhaustion surfaces the last
/// retryable error unchanged.
pub async fn with_backoff<T, F, Fut>(
    what: &str,
    max_retries: u32,
    mut op: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut retry = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retry < max_retries => {
                let delay = delay_for(retry);
                log::warn!("{what} failed ({e}); retrying in {}s", delay.as_secs());
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_delays_double() {
        assert_eq!(delay_for(0), Duration::from_secs(1));
        assert_eq!(delay_for(1), Duration::from_secs(2));
        assert_eq!(delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Api {
                        provider: "test",
                        status: 500,
                        message: "boom".to_string(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff("test", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LlmError::Malformed {
                    provider: "test",
                    message: "not json".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
