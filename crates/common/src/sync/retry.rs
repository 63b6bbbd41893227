//! Exponential backoff for transient remote failures.

use std::future::Future;
use std::time::Duration;

use crate::config::MountConfig;

/// Errors that know whether retrying could help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub ceiling: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &MountConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts.max(1),
            base: Duration::from_millis(config.retry_backoff_base_ms),
            ceiling: Duration::from_millis(config.retry_backoff_ceiling_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2*base, 4*base, ...
    /// capped at the ceiling
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.ceiling)
            .min(self.ceiling)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or runs
    /// out of attempts.
    ///
    /// `cancelled` is checked before and after every backoff, never before
    /// the first attempt, so in-flight work always gets to finish.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancelled: impl Fn() -> bool,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(RetryError::Fatal(e)),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => {
                    if cancelled() {
                        return Err(RetryError::Cancelled {
                            attempts: attempt,
                            last: e,
                        });
                    }
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    if cancelled() {
                        return Err(RetryError::Cancelled {
                            attempts: attempt,
                            last: e,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// The error is not worth retrying
    Fatal(E),
    Exhausted { attempts: u32, last: E },
    Cancelled { attempts: u32, last: E },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky({})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base: Duration::from_millis(1),
            ceiling: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_doubles_up_to_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base: Duration::from_millis(100),
            ceiling: Duration::from_millis(500),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
        assert_eq!(policy.delay(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy(5)
            .run(
                || false,
                |_| async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Flaky(true))
                    } else {
                        Ok(7)
                    }
                },
            )
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let result: Result<(), _> = policy(3).run(|| false, |_| async { Err(Flaky(true)) }).await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(5)
            .run(
                || false,
                |_| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky(false))
                },
            )
            .await;
        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(5)
            .run(
                || true,
                |_| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky(true))
                },
            )
            .await;
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_skips_next_attempt() {
        let calls = AtomicU32::new(0);
        let cancelled = std::sync::atomic::AtomicBool::new(false);
        let policy = RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(50),
            ceiling: Duration::from_millis(50),
        };
        let run = policy.run(
            || cancelled.load(Ordering::SeqCst),
            |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Flaky(true))
            },
        );
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancelled.store(true, Ordering::SeqCst);
        };
        let (result, ()) = tokio::join!(run, cancel);
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
