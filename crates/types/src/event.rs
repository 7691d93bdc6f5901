use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ParseStatusError, PaymentId};

/// How a failed step should be treated by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network, rate limit or other temporary adapter fault
    Transient,
    /// Custodial or bridge balance not yet sufficient
    InsufficientBalance,
    /// Escrow contract administratively paused
    ContractPaused,
    /// Adapter timed out; the remote side may or may not have acted
    UnknownOutcome,
    /// Inputs are wrong; retrying reproduces the fault
    DataIntegrity,
    /// Retry budget exhausted or permanent rejection
    Unrecoverable,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::InsufficientBalance => "insufficient_balance",
            FailureClass::ContractPaused => "contract_paused",
            FailureClass::UnknownOutcome => "unknown_outcome",
            FailureClass::DataIntegrity => "data_integrity",
            FailureClass::Unrecoverable => "unrecoverable",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FailureClass::DataIntegrity | FailureClass::Unrecoverable
        )
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed taxonomy of ledger entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DepositDetected,
    StatusChanged,
    EscrowCreationStarted,
    ContractPaused,
    InsufficientBalance,
    BridgeWithdrawalSubmitted,
    BridgeWithdrawalInitiated,
    BridgeWithdrawalConfirmed,
    BridgeWithdrawalFailed,
    EscrowCreationSubmitted,
    EscrowCreated,
    EscrowOutcomeUnknown,
    CustodyActivated,
    ReleaseAuthorized,
    EscrowReleased,
    RedemptionInitiated,
    RedemptionConfirmed,
    RedemptionFailed,
    PayoutInitiated,
    PayoutConfirmed,
    PayoutFailed,
    DirectPayoutInitiated,
    DirectPayoutConfirmed,
    DirectPayoutFailed,
    DisputeRaised,
    DisputeResolved,
    TransientFailure,
    DuplicateOperation,
    DataIntegrityFault,
    PaymentFailed,
    ManualRecoveryRequested,
    LeaseReclaimed,
}

impl EventKind {
    pub const ALL: [EventKind; 32] = [
        EventKind::DepositDetected,
        EventKind::StatusChanged,
        EventKind::EscrowCreationStarted,
        EventKind::ContractPaused,
        EventKind::InsufficientBalance,
        EventKind::BridgeWithdrawalSubmitted,
        EventKind::BridgeWithdrawalInitiated,
        EventKind::BridgeWithdrawalConfirmed,
        EventKind::BridgeWithdrawalFailed,
        EventKind::EscrowCreationSubmitted,
        EventKind::EscrowCreated,
        EventKind::EscrowOutcomeUnknown,
        EventKind::CustodyActivated,
        EventKind::ReleaseAuthorized,
        EventKind::EscrowReleased,
        EventKind::RedemptionInitiated,
        EventKind::RedemptionConfirmed,
        EventKind::RedemptionFailed,
        EventKind::PayoutInitiated,
        EventKind::PayoutConfirmed,
        EventKind::PayoutFailed,
        EventKind::DirectPayoutInitiated,
        EventKind::DirectPayoutConfirmed,
        EventKind::DirectPayoutFailed,
        EventKind::DisputeRaised,
        EventKind::DisputeResolved,
        EventKind::TransientFailure,
        EventKind::DuplicateOperation,
        EventKind::DataIntegrityFault,
        EventKind::PaymentFailed,
        EventKind::ManualRecoveryRequested,
        EventKind::LeaseReclaimed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DepositDetected => "deposit_detected",
            EventKind::StatusChanged => "status_changed",
            EventKind::EscrowCreationStarted => "escrow_creation_started",
            EventKind::ContractPaused => "contract_paused",
            EventKind::InsufficientBalance => "insufficient_balance",
            EventKind::BridgeWithdrawalSubmitted => "bridge_withdrawal_submitted",
            EventKind::BridgeWithdrawalInitiated => "bridge_withdrawal_initiated",
            EventKind::BridgeWithdrawalConfirmed => "bridge_withdrawal_confirmed",
            EventKind::BridgeWithdrawalFailed => "bridge_withdrawal_failed",
            EventKind::EscrowCreationSubmitted => "escrow_creation_submitted",
            EventKind::EscrowCreated => "escrow_created",
            EventKind::EscrowOutcomeUnknown => "escrow_outcome_unknown",
            EventKind::CustodyActivated => "custody_activated",
            EventKind::ReleaseAuthorized => "release_authorized",
            EventKind::EscrowReleased => "escrow_released",
            EventKind::RedemptionInitiated => "redemption_initiated",
            EventKind::RedemptionConfirmed => "redemption_confirmed",
            EventKind::RedemptionFailed => "redemption_failed",
            EventKind::PayoutInitiated => "payout_initiated",
            EventKind::PayoutConfirmed => "payout_confirmed",
            EventKind::PayoutFailed => "payout_failed",
            EventKind::DirectPayoutInitiated => "direct_payout_initiated",
            EventKind::DirectPayoutConfirmed => "direct_payout_confirmed",
            EventKind::DirectPayoutFailed => "direct_payout_failed",
            EventKind::DisputeRaised => "dispute_raised",
            EventKind::DisputeResolved => "dispute_resolved",
            EventKind::TransientFailure => "transient_failure",
            EventKind::DuplicateOperation => "duplicate_operation",
            EventKind::DataIntegrityFault => "data_integrity_fault",
            EventKind::PaymentFailed => "payment_failed",
            EventKind::ManualRecoveryRequested => "manual_recovery_requested",
            EventKind::LeaseReclaimed => "lease_reclaimed",
        }
    }

    /// Failure class recorded by this kind of entry, if it records a failure
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            EventKind::ContractPaused => Some(FailureClass::ContractPaused),
            EventKind::InsufficientBalance => Some(FailureClass::InsufficientBalance),
            EventKind::TransientFailure
            | EventKind::BridgeWithdrawalFailed
            | EventKind::RedemptionFailed
            | EventKind::PayoutFailed
            | EventKind::DirectPayoutFailed => Some(FailureClass::Transient),
            EventKind::EscrowOutcomeUnknown => Some(FailureClass::UnknownOutcome),
            EventKind::DataIntegrityFault => Some(FailureClass::DataIntegrity),
            EventKind::PaymentFailed => Some(FailureClass::Unrecoverable),
            _ => None,
        }
    }

    /// Entries that prove a step moved forward; they reset the failure count
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            EventKind::DepositDetected
                | EventKind::EscrowCreationStarted
                | EventKind::BridgeWithdrawalInitiated
                | EventKind::BridgeWithdrawalConfirmed
                | EventKind::EscrowCreated
                | EventKind::CustodyActivated
                | EventKind::EscrowReleased
                | EventKind::RedemptionInitiated
                | EventKind::RedemptionConfirmed
                | EventKind::PayoutInitiated
                | EventKind::PayoutConfirmed
                | EventKind::DirectPayoutInitiated
                | EventKind::DirectPayoutConfirmed
                | EventKind::DisputeResolved
                | EventKind::ManualRecoveryRequested
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Immutable fact about a payment's processing history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Append order within the ledger; strictly increasing
    pub sequence: u64,
    pub payment_id: PaymentId,
    pub kind: EventKind,
    pub description: String,

    /// External reference, escrow id or tx hash tied to this entry
    pub reference: Option<String>,

    pub created_at: u64,
}

/// Ledger entry before the ledger assigns its sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub payment_id: PaymentId,
    pub kind: EventKind,
    pub description: String,
    pub reference: Option<String>,
    pub created_at: u64,
}

impl NewEvent {
    pub fn new(
        payment_id: PaymentId,
        kind: EventKind,
        description: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            payment_id,
            kind,
            description: description.into(),
            reference: None,
            created_at,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn into_event(self, sequence: u64) -> Event {
        Event {
            sequence,
            payment_id: self.payment_id,
            kind: self.kind,
            description: self.description,
            reference: self.reference,
            created_at: self.created_at,
        }
    }
}
