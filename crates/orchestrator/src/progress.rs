//! Ledger-derived flow progress
//!
//! Nothing about "what is in flight" is kept in memory: every attempt folds the
//! payment's ledger into a `FlowProgress` and resumes from the last completed step.

use escrow_automation_types::{Event, EventKind, FailureClass, PaymentId};

/// Bridge withdrawal step as recorded in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WithdrawalState {
    #[default]
    None,
    /// Submitted under `key`; the rail reply (if any) was never recorded
    Submitted { key: String },
    Initiated { reference: String },
    Confirmed { reference: String },
    /// The latest withdrawal failed on the rail; `count` failures so far
    Failed { count: u32 },
}

/// On-chain escrow creation step
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EscrowCreationState {
    #[default]
    NotSubmitted,
    Submitted,
    /// A create call timed out; the chain must be queried before creating again
    OutcomeUnknown,
    Created { escrow_id: String },
}

/// A rail operation whose key rotates after each rail-side failure
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RailStep {
    #[default]
    NotStarted,
    Initiated { reference: String },
    Confirmed { reference: String },
}

impl RailStep {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, RailStep::Confirmed { .. })
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            RailStep::NotStarted => None,
            RailStep::Initiated { reference } | RailStep::Confirmed { reference } => {
                Some(reference)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastFailure {
    pub class: FailureClass,
    pub at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowProgress {
    pub withdrawal: WithdrawalState,
    /// Rail-side withdrawal failures; each one consumes an idempotency key
    pub withdrawal_failures: u32,
    pub escrow: EscrowCreationState,
    pub release_authorized: bool,
    pub release_tx: Option<String>,
    pub redemption: RailStep,
    pub redemption_failures: u32,
    pub payout: RailStep,
    pub payout_failures: u32,
    /// Share of the payment paid out at activation, outside custody
    pub direct_payout: RailStep,
    pub direct_payout_failures: u32,

    /// Failure entries since the last progress entry
    pub consecutive_failures: u32,
    /// Latest failure, cleared by progress
    pub last_failure: Option<LastFailure>,
    pub last_event_at: Option<u64>,
}

impl FlowProgress {
    /// Fold a payment's ledger (in append order)
    pub fn from_events(events: &[Event]) -> Self {
        let mut progress = FlowProgress::default();
        for event in events {
            progress.apply(event);
        }
        progress
    }

    fn apply(&mut self, event: &Event) {
        let reference = event.reference.clone().unwrap_or_default();
        self.last_event_at = Some(event.created_at);

        match event.kind {
            EventKind::BridgeWithdrawalSubmitted => {
                self.withdrawal = WithdrawalState::Submitted { key: reference };
            }
            EventKind::BridgeWithdrawalInitiated => {
                self.withdrawal = WithdrawalState::Initiated { reference };
            }
            EventKind::BridgeWithdrawalConfirmed => {
                self.withdrawal = WithdrawalState::Confirmed { reference };
            }
            EventKind::BridgeWithdrawalFailed => {
                self.withdrawal_failures += 1;
                self.withdrawal = WithdrawalState::Failed {
                    count: self.withdrawal_failures,
                };
            }
            EventKind::EscrowCreationSubmitted => {
                if !self.escrow_created() {
                    self.escrow = EscrowCreationState::Submitted;
                }
            }
            EventKind::EscrowOutcomeUnknown => {
                if !self.escrow_created() {
                    self.escrow = EscrowCreationState::OutcomeUnknown;
                }
            }
            EventKind::EscrowCreated => {
                self.escrow = EscrowCreationState::Created { escrow_id: reference };
            }
            EventKind::ReleaseAuthorized => self.release_authorized = true,
            EventKind::EscrowReleased => self.release_tx = Some(reference),
            EventKind::RedemptionInitiated => {
                self.redemption = RailStep::Initiated { reference };
            }
            EventKind::RedemptionConfirmed => {
                self.redemption = RailStep::Confirmed { reference };
            }
            EventKind::RedemptionFailed => {
                self.redemption_failures += 1;
                self.redemption = RailStep::NotStarted;
            }
            EventKind::PayoutInitiated => self.payout = RailStep::Initiated { reference },
            EventKind::PayoutConfirmed => self.payout = RailStep::Confirmed { reference },
            EventKind::PayoutFailed => {
                self.payout_failures += 1;
                self.payout = RailStep::NotStarted;
            }
            EventKind::DirectPayoutInitiated => {
                self.direct_payout = RailStep::Initiated { reference };
            }
            EventKind::DirectPayoutConfirmed => {
                self.direct_payout = RailStep::Confirmed { reference };
            }
            EventKind::DirectPayoutFailed => {
                self.direct_payout_failures += 1;
                self.direct_payout = RailStep::NotStarted;
            }
            _ => {}
        }

        if let Some(class) = event.kind.failure_class() {
            self.consecutive_failures += 1;
            self.last_failure = Some(LastFailure {
                class,
                at: event.created_at,
            });
        } else if event.kind.is_progress() {
            self.consecutive_failures = 0;
            self.last_failure = None;
        }
    }

    pub fn escrow_created(&self) -> bool {
        matches!(self.escrow, EscrowCreationState::Created { .. })
    }

    /// Idempotency key for the next withdrawal attempt
    pub fn withdrawal_key(&self, payment_id: PaymentId) -> String {
        withdrawal_key(payment_id, self.withdrawal_failures)
    }

    pub fn redemption_key(&self, payment_id: PaymentId) -> String {
        redemption_key(payment_id, self.redemption_failures)
    }

    pub fn payout_key(&self, payment_id: PaymentId) -> String {
        payout_key(payment_id, self.payout_failures)
    }

    pub fn direct_payout_key(&self, payment_id: PaymentId) -> String {
        direct_payout_key(payment_id, self.direct_payout_failures)
    }
}

/// `withdraw-{payment}-{n}` where `n` counts earlier rail-side failures
pub fn withdrawal_key(payment_id: PaymentId, attempt: u32) -> String {
    format!("withdraw-{payment_id}-{attempt}")
}

/// `redeem-{payment}`, suffixed with the failure count once the rail has failed one
pub fn redemption_key(payment_id: PaymentId, failures: u32) -> String {
    rotated(format!("redeem-{payment_id}"), failures)
}

pub fn payout_key(payment_id: PaymentId, failures: u32) -> String {
    rotated(format!("payout-{payment_id}"), failures)
}

pub fn direct_payout_key(payment_id: PaymentId, failures: u32) -> String {
    rotated(format!("payout-{payment_id}-direct"), failures)
}

fn rotated(base: String, failures: u32) -> String {
    match failures {
        0 => base,
        n => format!("{base}-{n}"),
    }
}

/// Reference the on-chain escrow is created under; lets a lost reply be found again
pub fn escrow_reference(payment_id: PaymentId) -> String {
    format!("payment-{payment_id}")
}
