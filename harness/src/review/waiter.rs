use crate::api::types::ReportCollection;
use crate::error::{HarnessError, Result};
use crate::util::{Deadline, WaitConfig};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Anything able to return the current configuration reports of a daemon.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn fetch_reports(&self, daemon_id: i64) -> Result<ReportCollection>;
}

/// Decides whether two consecutive polls show a finished review.
pub trait StabilityPredicate: Send + Sync {
    fn is_stable(&self, previous: &ReportCollection, current: &ReportCollection) -> bool;
}

/// The set of checkers that reported an issue is the same in both polls.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlaggedSetUnchanged;

impl StabilityPredicate for FlaggedSetUnchanged {
    fn is_stable(&self, previous: &ReportCollection, current: &ReportCollection) -> bool {
        previous.flagged_checkers() == current.flagged_checkers()
    }
}

/// Wraps another predicate and additionally requires `total >= min_total`
/// in the current poll.
#[derive(Debug, Clone, Copy)]
pub struct MinimumTotal<P> {
    pub inner: P,
    pub min_total: u64,
}

impl<P: StabilityPredicate> StabilityPredicate for MinimumTotal<P> {
    fn is_stable(&self, previous: &ReportCollection, current: &ReportCollection) -> bool {
        current.total >= self.min_total && self.inner.is_stable(previous, current)
    }
}

impl<F> StabilityPredicate for F
where
    F: Fn(&ReportCollection, &ReportCollection) -> bool + Send + Sync,
{
    fn is_stable(&self, previous: &ReportCollection, current: &ReportCollection) -> bool {
        self(previous, current)
    }
}

/// Polls a [`ReportSource`] until the reports of a daemon stop changing.
///
/// The review engine runs asynchronously after a machine is authorized, so
/// there is no single moment at which the reports are known to be complete.
/// The waiter keeps fetching at a fixed interval and returns the latest
/// collection as soon as two consecutive polls satisfy the predicate.
/// Transient fetch failures restart the comparison and count against the same
/// time budget. Terminal failures are returned immediately.
#[derive(Debug, Clone)]
pub struct ReportWaiter<P = FlaggedSetUnchanged> {
    max_wait: Duration,
    poll_interval: Duration,
    predicate: P,
}

impl ReportWaiter {
    pub fn new(config: &WaitConfig) -> Self {
        Self {
            max_wait: config.max_wait,
            poll_interval: config.poll_interval,
            predicate: FlaggedSetUnchanged,
        }
    }
}

impl<P: StabilityPredicate> ReportWaiter<P> {
    pub fn with_predicate<Q: StabilityPredicate>(self, predicate: Q) -> ReportWaiter<Q> {
        ReportWaiter {
            max_wait: self.max_wait,
            poll_interval: self.poll_interval,
            predicate,
        }
    }

    pub async fn wait_for_stable_reports<S>(
        &self,
        source: &S,
        daemon_id: i64,
    ) -> Result<ReportCollection>
    where
        S: ReportSource + ?Sized,
    {
        let deadline = Deadline::after(self.max_wait);
        let mut previous: Option<ReportCollection> = None;
        let mut last_error: Option<String> = None;
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            match source.fetch_reports(daemon_id).await {
                Ok(current) => {
                    debug!(
                        "Daemon {} poll {}: total={} flagged={:?}",
                        daemon_id,
                        polls,
                        current.total,
                        current.flagged_checkers()
                    );
                    if let Some(ref prev) = previous {
                        if self.predicate.is_stable(prev, &current) {
                            info!(
                                "Config reports of daemon {} stable after {} polls ({} reports)",
                                daemon_id, polls, current.total
                            );
                            return Ok(current);
                        }
                    }
                    last_error = Some(format!(
                        "reports still changing, flagged checkers: {:?}",
                        current.flagged_checkers()
                    ));
                    previous = Some(current);
                }
                Err(e) if e.is_transient() => {
                    debug!("Daemon {} poll {} not ready: {}", daemon_id, polls, e);
                    last_error = Some(e.to_string());
                    previous = None;
                }
                Err(e) => {
                    warn!("Fetching config reports of daemon {} failed: {}", daemon_id, e);
                    return Err(e);
                }
            }

            if deadline.expired() {
                warn!(
                    "Config reports of daemon {} did not stabilize within {:?}",
                    daemon_id, self.max_wait
                );
                return Err(HarnessError::TimeoutExceeded {
                    operation: format!("config reports of daemon {}", daemon_id),
                    waited: deadline.elapsed(),
                    last_error,
                });
            }
            sleep(deadline.next_sleep(self.poll_interval)).await;
        }
    }
}
