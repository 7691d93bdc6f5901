use escrow_automation_types::FailureClass;
use std::time::Duration;

use crate::ExponentialBackoff;

/// Which scheduler timer picks up a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Tight fixed interval; balance arrival is usually seconds away
    Quick,
    /// Regular timer with exponential backoff
    Steady,
    /// Never retried automatically
    Never,
}

impl Cadence {
    pub fn for_class(class: FailureClass) -> Self {
        match class {
            FailureClass::InsufficientBalance => Cadence::Quick,
            FailureClass::Transient | FailureClass::ContractPaused | FailureClass::UnknownOutcome => {
                Cadence::Steady
            }
            FailureClass::DataIntegrity | FailureClass::Unrecoverable => Cadence::Never,
        }
    }
}

/// Bounded retry rules shared by the orchestrators and the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Failures without progress before a payment is marked failed
    pub max_attempts: u32,
    pub backoff: ExponentialBackoff,
    pub quick_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: ExponentialBackoff, quick_interval: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            quick_interval,
        }
    }

    pub fn budget_exhausted(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.max_attempts
    }

    /// Earliest unix time the next automatic attempt may start, or `None` if the class
    /// is never retried automatically
    pub fn next_attempt_at(
        &self,
        class: FailureClass,
        consecutive_failures: u32,
        last_failure_at: u64,
    ) -> Option<u64> {
        let delay = match Cadence::for_class(class) {
            Cadence::Never => return None,
            Cadence::Quick => self.quick_interval,
            Cadence::Steady => self
                .backoff
                .delay_for(consecutive_failures.saturating_sub(1)),
        };
        Some(last_failure_at.saturating_add(delay.as_secs()))
    }

    /// Whether an automatic attempt is allowed at `now`
    pub fn is_due(
        &self,
        class: FailureClass,
        consecutive_failures: u32,
        last_failure_at: u64,
        now: u64,
    ) -> bool {
        !self.budget_exhausted(consecutive_failures)
            && self
                .next_attempt_at(class, consecutive_failures, last_failure_at)
                .is_some_and(|at| now >= at)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(20, ExponentialBackoff::default(), Duration::from_secs(30))
    }
}
