use escrow_automation_adapters::{AdapterError, Operation};
use escrow_automation_store::StoreError;
use escrow_automation_types::{
    EventKind, FailureClass, GuardViolation, PaymentError, PaymentId, RailTransactionKind,
    TransitionError,
};
use rust_decimal::Decimal;
use thiserror::Error;

/// Orchestrator errors
///
/// Adapter failures are classified into these variants at the orchestrator boundary;
/// only `InvalidTransition` is meant to reach an alerting path.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    InvalidTransition(TransitionError),

    #[error("{operation} failed: {reason}")]
    TransientAdapterFailure {
        operation: Operation,
        reason: String,
        /// The call timed out; the remote side may have acted
        outcome_unknown: bool,
    },

    #[error("insufficient balance for {operation}: needed {needed}, available {available}")]
    InsufficientBalance {
        operation: Operation,
        needed: Decimal,
        available: Decimal,
    },

    #[error("escrow contract is paused")]
    ContractPaused,

    #[error("data integrity fault: {0}")]
    DataIntegrityFault(String),

    #[error("{operation} already performed as {existing_ref}")]
    DuplicateOperation {
        operation: Operation,
        existing_ref: String,
    },

    #[error("withdrawal {external_ref} failed on the rail")]
    WithdrawalFailed { external_ref: String },

    /// A redemption or payout the rail settled as failed; the next attempt uses a new key
    #[error("{kind} {external_ref} failed on the rail")]
    RailTransferFailed {
        kind: RailTransactionKind,
        failed: EventKind,
        external_ref: String,
    },

    #[error("payment {0} is leased by another attempt")]
    LeaseHeld(PaymentId),

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),

    #[error("invalid payment: {0}")]
    InvalidPayment(#[from] PaymentError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("escrow missing for payment {0}")]
    EscrowMissing(PaymentId),
}

impl From<TransitionError> for OrchestratorError {
    fn from(err: TransitionError) -> Self {
        match &err {
            // A deadline already in the past can only come from bad input
            TransitionError::GuardRejected {
                violation: GuardViolation::CustodyDeadlineNotInFuture { .. },
                ..
            } => OrchestratorError::DataIntegrityFault(err.to_string()),
            _ => OrchestratorError::InvalidTransition(err),
        }
    }
}

impl OrchestratorError {
    pub fn class(&self) -> FailureClass {
        match self {
            OrchestratorError::TransientAdapterFailure {
                outcome_unknown: true,
                ..
            } => FailureClass::UnknownOutcome,
            OrchestratorError::TransientAdapterFailure { .. }
            | OrchestratorError::WithdrawalFailed { .. }
            | OrchestratorError::RailTransferFailed { .. }
            | OrchestratorError::LeaseHeld(_)
            | OrchestratorError::Store(_) => FailureClass::Transient,
            // Normally absorbed by the caller as success
            OrchestratorError::DuplicateOperation { .. } => FailureClass::Transient,
            OrchestratorError::InsufficientBalance { .. } => FailureClass::InsufficientBalance,
            OrchestratorError::ContractPaused => FailureClass::ContractPaused,
            OrchestratorError::DataIntegrityFault(_) | OrchestratorError::EscrowMissing(_) => {
                FailureClass::DataIntegrity
            }
            OrchestratorError::InvalidTransition(_)
            | OrchestratorError::Unrecoverable(_)
            | OrchestratorError::InvalidPayment(_)
            | OrchestratorError::PaymentNotFound(_) => FailureClass::Unrecoverable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Ledger entry that records this failure, if it is recorded at all
    pub fn event_kind(&self) -> Option<EventKind> {
        match self {
            OrchestratorError::TransientAdapterFailure {
                operation: Operation::CreateAndFund,
                outcome_unknown: true,
                ..
            } => Some(EventKind::EscrowOutcomeUnknown),
            OrchestratorError::TransientAdapterFailure { .. } => Some(EventKind::TransientFailure),
            OrchestratorError::InsufficientBalance { .. } => Some(EventKind::InsufficientBalance),
            OrchestratorError::ContractPaused => Some(EventKind::ContractPaused),
            OrchestratorError::DataIntegrityFault(_) | OrchestratorError::EscrowMissing(_) => {
                Some(EventKind::DataIntegrityFault)
            }
            OrchestratorError::WithdrawalFailed { .. } => Some(EventKind::BridgeWithdrawalFailed),
            OrchestratorError::RailTransferFailed { failed, .. } => Some(*failed),
            _ => None,
        }
    }

    /// External reference to attach to the failure entry
    pub fn reference(&self) -> Option<&str> {
        match self {
            OrchestratorError::WithdrawalFailed { external_ref }
            | OrchestratorError::RailTransferFailed { external_ref, .. } => Some(external_ref),
            _ => None,
        }
    }
}

/// Map an adapter error onto the orchestrator taxonomy
pub fn classify_adapter_error(operation: Operation, err: AdapterError) -> OrchestratorError {
    match err {
        AdapterError::Timeout { after_ms, .. } => OrchestratorError::TransientAdapterFailure {
            operation,
            reason: format!("no reply within {after_ms}ms"),
            outcome_unknown: true,
        },
        AdapterError::Transient(reason) | AdapterError::RateLimited(reason) => {
            OrchestratorError::TransientAdapterFailure {
                operation,
                reason,
                outcome_unknown: false,
            }
        }
        AdapterError::InsufficientFunds { needed, available } => {
            OrchestratorError::InsufficientBalance {
                operation,
                needed,
                available,
            }
        }
        AdapterError::Paused => OrchestratorError::ContractPaused,
        AdapterError::Duplicate { existing_ref } => OrchestratorError::DuplicateOperation {
            operation,
            existing_ref,
        },
        AdapterError::Rejected(reason) => {
            OrchestratorError::Unrecoverable(format!("{operation} rejected: {reason}"))
        }
    }
}
