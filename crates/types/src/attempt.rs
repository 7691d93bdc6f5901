use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TransitionError;

/// What caused a processing attempt to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Deposit,
    SteadyRetry,
    QuickRetry,
    Manual,
    PayoutSweep,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Deposit => "deposit",
            TriggerSource::SteadyRetry => "steady_retry",
            TriggerSource::QuickRetry => "quick_retry",
            TriggerSource::Manual => "manual",
            TriggerSource::PayoutSweep => "payout_sweep",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Scheduled,
    InFlight,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
    /// Not run: payment already moved on or leased elsewhere
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptEvent {
    Start,
    Succeed,
    FailRetryable,
    FailTerminal,
    Skip,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Scheduled => "scheduled",
            AttemptState::InFlight => "in_flight",
            AttemptState::Succeeded => "succeeded",
            AttemptState::FailedRetryable => "failed_retryable",
            AttemptState::FailedTerminal => "failed_terminal",
            AttemptState::Skipped => "skipped",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, AttemptState::Scheduled | AttemptState::InFlight)
    }

    pub fn advance(self, event: AttemptEvent) -> Result<AttemptState, TransitionError> {
        match (self, event) {
            (AttemptState::Scheduled, AttemptEvent::Start) => Ok(AttemptState::InFlight),
            (AttemptState::Scheduled, AttemptEvent::Skip) => Ok(AttemptState::Skipped),
            (AttemptState::InFlight, AttemptEvent::Succeed) => Ok(AttemptState::Succeeded),
            (AttemptState::InFlight, AttemptEvent::FailRetryable) => {
                Ok(AttemptState::FailedRetryable)
            }
            (AttemptState::InFlight, AttemptEvent::FailTerminal) => Ok(AttemptState::FailedTerminal),
            (from, event) => Err(TransitionError::InvalidAttemptTransition { from, event }),
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
