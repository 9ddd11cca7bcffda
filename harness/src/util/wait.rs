use crate::error::{HarnessError, Result};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl WaitConfig {
    pub fn new(max_wait: Duration, poll_interval: Duration) -> Self {
        Self {
            max_wait,
            poll_interval,
        }
    }
}

impl From<&crate::config::WaiterConfig> for WaitConfig {
    fn from(config: &crate::config::WaiterConfig) -> Self {
        Self::new(config.max_wait(), config.poll_interval())
    }
}

/// Time budget of a wait loop. A budget too large to represent as an
/// [`Instant`] never expires.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    at: Option<Instant>,
}

impl Deadline {
    pub fn after(max_wait: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: started.checked_add(max_wait),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.at.map_or(false, |at| Instant::now() >= at)
    }

    /// How long to sleep before the next attempt: the poll interval, cut
    /// short so that the last attempt happens at the deadline.
    pub fn next_sleep(&self, poll_interval: Duration) -> Duration {
        match self.at {
            Some(at) => poll_interval.min(at.saturating_duration_since(Instant::now())),
            None => poll_interval,
        }
    }
}

/// Repeats `operation` until it succeeds. Transient errors are retried at a
/// fixed interval until the budget runs out; any other error is returned as
/// soon as it happens.
pub async fn wait_for_success<F, Fut, T>(
    config: &WaitConfig,
    mut operation: F,
    operation_name: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let deadline = Deadline::after(config.max_wait);
    let mut attempt: u32 = 0;

    info!("Waiting for {}", operation_name);

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if e.is_transient() => {
                if deadline.expired() {
                    warn!(
                        "{} not ready after {} attempts, giving up",
                        operation_name, attempt
                    );
                    return Err(HarnessError::TimeoutExceeded {
                        operation: operation_name.to_string(),
                        waited: deadline.elapsed(),
                        last_error: Some(e.to_string()),
                    });
                }
                debug!(
                    "{} not ready (attempt {}), retrying in {:?}: {}",
                    operation_name, attempt, config.poll_interval, e
                );
                sleep(deadline.next_sleep(config.poll_interval)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> WaitConfig {
        WaitConfig::new(Duration::from_millis(200), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = wait_for_success(
            &quick(),
            move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(HarnessError::NotReady("booting".to_string()))
                } else {
                    Ok(42)
                }
            },
            "answer",
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = wait_for_success(
            &quick(),
            move || async move {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
                Err(HarnessError::Transport("connection reset".to_string()))
            },
            "terminal",
        )
        .await;

        assert!(matches!(result, Err(HarnessError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_times_out_with_last_error() {
        let result: Result<()> = wait_for_success(
            &quick(),
            || async { Err(HarnessError::NotReady("still booting".to_string())) },
            "never ready",
        )
        .await;

        match result {
            Err(HarnessError::TimeoutExceeded {
                operation,
                last_error,
                ..
            }) => {
                assert_eq!(operation, "never ready");
                assert!(last_error.unwrap().contains("still booting"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_budget_equal_to_interval_gets_a_second_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let config = WaitConfig::new(Duration::from_millis(100), Duration::from_millis(100));
        let result = wait_for_success(
            &config,
            move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(HarnessError::NotReady("first look".to_string()))
                } else {
                    Ok("ready")
                }
            },
            "second attempt",
        )
        .await;

        assert_eq!(result.unwrap(), "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_huge_budget_never_expires() {
        let deadline = Deadline::after(Duration::from_secs(i64::MAX as u64));
        assert!(!deadline.expired());
        assert_eq!(
            deadline.next_sleep(Duration::from_millis(5)),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn test_sleep_is_cut_at_the_deadline() {
        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(deadline.next_sleep(Duration::from_secs(10)) <= Duration::from_millis(50));
        assert_eq!(
            Deadline::after(Duration::ZERO).next_sleep(Duration::from_secs(1)),
            Duration::ZERO
        );
    }
}
