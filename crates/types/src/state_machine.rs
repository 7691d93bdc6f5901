//! Payment lifecycle state machine
//!
//! Pure decision logic: `next_status` maps the current status and a trigger to the
//! next status or rejects the pair. Every status mutation in the orchestrator goes
//! through this function, which is what prevents double-processing.

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

use crate::{AttemptEvent, AttemptState, EscrowStatus, PaymentStatus};

/// Something that happened to a payment and may move its status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentTrigger {
    /// Rail reported a completed deposit into the payment's deposit account
    DepositConfirmed { expected: Decimal, received: Decimal },

    /// Escrow creation claimed the payment
    EscrowCreationStarted { onchain_escrow_exists: bool },

    /// Chain confirmed creation and funding of the escrow
    EscrowFunded {
        tx_hash: String,
        custody_end: u64,
        now: u64,
    },

    /// Chain reports the custody period running
    CustodyActivated,

    /// Custody value redeemed back to fiat
    RedemptionConfirmed,

    /// Bank transfer to the payee confirmed
    PayoutConfirmed,

    DisputeRaised,
    DisputeResolved,

    /// Irrecoverable fault or exhausted retry budget
    Fault,

    /// Operator-initiated exit from `failed`
    ManualRecovery { resume: PaymentStatus },
}

impl PaymentTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentTrigger::DepositConfirmed { .. } => "deposit_confirmed",
            PaymentTrigger::EscrowCreationStarted { .. } => "escrow_creation_started",
            PaymentTrigger::EscrowFunded { .. } => "escrow_funded",
            PaymentTrigger::CustodyActivated => "custody_activated",
            PaymentTrigger::RedemptionConfirmed => "redemption_confirmed",
            PaymentTrigger::PayoutConfirmed => "payout_confirmed",
            PaymentTrigger::DisputeRaised => "dispute_raised",
            PaymentTrigger::DisputeResolved => "dispute_resolved",
            PaymentTrigger::Fault => "fault",
            PaymentTrigger::ManualRecovery { .. } => "manual_recovery",
        }
    }
}

impl fmt::Display for PaymentTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a transition that exists in the table was still refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardViolation {
    AmountMismatch { expected: Decimal, received: Decimal },
    EscrowAlreadyOnChain,
    MissingTxHash,
    CustodyDeadlineNotInFuture { custody_end: u64, now: u64 },
    InvalidResumeTarget(PaymentStatus),
}

impl fmt::Display for GuardViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardViolation::AmountMismatch { expected, received } => {
                write!(f, "deposit of {received} does not match expected {expected}")
            }
            GuardViolation::EscrowAlreadyOnChain => f.write_str("escrow already exists on chain"),
            GuardViolation::MissingTxHash => f.write_str("transaction hash missing"),
            GuardViolation::CustodyDeadlineNotInFuture { custody_end, now } => {
                write!(f, "custody end {custody_end} is not after now ({now})")
            }
            GuardViolation::InvalidResumeTarget(status) => {
                write!(f, "cannot resume into {status}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid transition: {trigger} is not allowed from {from}")]
    InvalidTransition {
        from: PaymentStatus,
        trigger: &'static str,
    },

    #[error("transition on {trigger} from {from} rejected: {violation}")]
    GuardRejected {
        from: PaymentStatus,
        trigger: &'static str,
        violation: GuardViolation,
    },

    #[error("invalid escrow transition: {from} -> {to}")]
    InvalidEscrowTransition { from: EscrowStatus, to: EscrowStatus },

    #[error("invalid attempt transition: {event:?} from {from:?}")]
    InvalidAttemptTransition {
        from: AttemptState,
        event: AttemptEvent,
    },
}

/// Statuses a manual recovery may resume into
pub const RESUMABLE_STATUSES: [PaymentStatus; 3] = [
    PaymentStatus::Funded,
    PaymentStatus::Active,
    PaymentStatus::PayoutPending,
];

/// Decide the next status for `current` on `trigger`
pub fn next_status(
    current: PaymentStatus,
    trigger: &PaymentTrigger,
) -> Result<PaymentStatus, TransitionError> {
    use PaymentStatus as S;
    use PaymentTrigger as T;

    let guard = |violation| TransitionError::GuardRejected {
        from: current,
        trigger: trigger.name(),
        violation,
    };

    match (current, trigger) {
        (S::Pending, T::DepositConfirmed { expected, received }) => {
            if expected != received {
                return Err(guard(GuardViolation::AmountMismatch {
                    expected: *expected,
                    received: *received,
                }));
            }
            Ok(S::Funded)
        }

        (
            S::Funded,
            T::EscrowCreationStarted {
                onchain_escrow_exists,
            },
        ) => {
            if *onchain_escrow_exists {
                return Err(guard(GuardViolation::EscrowAlreadyOnChain));
            }
            Ok(S::Processing)
        }

        (
            S::Processing,
            T::EscrowFunded {
                tx_hash,
                custody_end,
                now,
            },
        ) => {
            if tx_hash.trim().is_empty() {
                return Err(guard(GuardViolation::MissingTxHash));
            }
            if custody_end <= now {
                return Err(guard(GuardViolation::CustodyDeadlineNotInFuture {
                    custody_end: *custody_end,
                    now: *now,
                }));
            }
            Ok(S::Escrowed)
        }

        (S::Escrowed, T::CustodyActivated) => Ok(S::Active),
        (S::Active, T::RedemptionConfirmed) => Ok(S::PayoutPending),
        (S::PayoutPending, T::PayoutConfirmed) => Ok(S::Completed),

        (S::Processing | S::Escrowed | S::Active, T::DisputeRaised) => Ok(S::Disputed),
        (S::Disputed, T::DisputeResolved) => Ok(S::Active),

        (
            S::Pending
            | S::Funded
            | S::Processing
            | S::Escrowed
            | S::Active
            | S::PayoutPending
            | S::Disputed,
            T::Fault,
        ) => Ok(S::Failed),

        (S::Failed, T::ManualRecovery { resume }) => {
            if !RESUMABLE_STATUSES.contains(resume) {
                return Err(guard(GuardViolation::InvalidResumeTarget(*resume)));
            }
            Ok(*resume)
        }

        _ => Err(TransitionError::InvalidTransition {
            from: current,
            trigger: trigger.name(),
        }),
    }
}
