use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ParseStatusError, Payment, PaymentId, TransitionError};

/// Status of the on-chain custody record shadowing a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Local record only, nothing on chain yet
    Pending,
    /// Created and funded on chain
    Active,
    /// Released on chain, payout not yet confirmed
    Released,
    Disputed,
    Completed,
    Failed,
}

impl EscrowStatus {
    pub const ALL: [EscrowStatus; 6] = [
        EscrowStatus::Pending,
        EscrowStatus::Active,
        EscrowStatus::Released,
        EscrowStatus::Disputed,
        EscrowStatus::Completed,
        EscrowStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Active => "active",
            EscrowStatus::Released => "released",
            EscrowStatus::Disputed => "disputed",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Completed | EscrowStatus::Failed)
    }

    pub fn can_transition_to(&self, next: EscrowStatus) -> bool {
        matches!(
            (self, next),
            (EscrowStatus::Pending, EscrowStatus::Active)
                | (EscrowStatus::Pending, EscrowStatus::Failed)
                | (EscrowStatus::Active, EscrowStatus::Released)
                | (EscrowStatus::Active, EscrowStatus::Disputed)
                | (EscrowStatus::Disputed, EscrowStatus::Active)
                | (EscrowStatus::Disputed, EscrowStatus::Failed)
                | (EscrowStatus::Released, EscrowStatus::Completed)
        )
    }

    pub fn transition(self, next: EscrowStatus) -> Result<EscrowStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::InvalidEscrowTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscrowStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EscrowStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    None,
    Open,
    Resolved,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::None => "none",
            DisputeStatus::Open => "open",
            DisputeStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for DisputeStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DisputeStatus::None),
            "open" => Ok(DisputeStatus::Open),
            "resolved" => Ok(DisputeStatus::Resolved),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// On-chain custody record, owned one-to-one by its payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: String,
    pub payment_id: PaymentId,
    pub status: EscrowStatus,
    pub custody_amount: Decimal,
    pub custody_percent: Decimal,
    pub release_amount: Decimal,

    /// Requested custody duration; validated before any on-chain call
    pub custody_period_secs: i64,

    /// Absolute custody deadline (unix seconds), fixed when the escrow is created on chain
    pub custody_end: Option<u64>,

    pub onchain_escrow_id: Option<String>,
    pub blockchain_tx_hash: Option<String>,
    pub release_tx_hash: Option<String>,
    pub dispute_status: DisputeStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Escrow {
    /// Create the pending shadow record for a freshly funded payment
    pub fn pending_for(payment: &Payment, custody_period_secs: i64, now: u64) -> Self {
        let custody_amount = payment.custody_amount();
        Self {
            id: format!("esc-{}", payment.id),
            payment_id: payment.id,
            status: EscrowStatus::Pending,
            custody_amount,
            custody_percent: payment.custody_percent,
            release_amount: custody_amount,
            custody_period_secs,
            custody_end: None,
            onchain_escrow_id: None,
            blockchain_tx_hash: None,
            release_tx_hash: None,
            dispute_status: DisputeStatus::None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Once created on chain the association with the payment is permanent
    pub fn is_on_chain(&self) -> bool {
        self.onchain_escrow_id.is_some()
    }

    /// Custody window elapsed at `now`
    pub fn custody_elapsed(&self, now: u64) -> bool {
        self.custody_end.is_some_and(|end| now >= end)
    }

    pub fn amounts_consistent(&self) -> bool {
        self.custody_amount >= self.release_amount && self.release_amount >= Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escrow_transitions() {
        assert_eq!(
            EscrowStatus::Pending.transition(EscrowStatus::Active),
            Ok(EscrowStatus::Active)
        );
        assert_eq!(
            EscrowStatus::Active.transition(EscrowStatus::Released),
            Ok(EscrowStatus::Released)
        );
        assert!(EscrowStatus::Pending
            .transition(EscrowStatus::Released)
            .is_err());
        assert!(EscrowStatus::Completed
            .transition(EscrowStatus::Active)
            .is_err());
    }

    #[test]
    fn test_terminal_escrow_has_no_exits() {
        for from in [EscrowStatus::Completed, EscrowStatus::Failed] {
            for to in EscrowStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_pending_for_payment() {
        let payment = Payment::new(
            PaymentId(3),
            Decimal::from(1000),
            "646180157000000004",
            Decimal::from(50),
            100,
        )
        .unwrap();
        let escrow = Escrow::pending_for(&payment, 432_000, 150);

        assert_eq!(escrow.payment_id, PaymentId(3));
        assert_eq!(escrow.status, EscrowStatus::Pending);
        assert_eq!(escrow.custody_amount, Decimal::from(500));
        assert_eq!(escrow.release_amount, Decimal::from(500));
        assert!(escrow.amounts_consistent());
        assert!(!escrow.is_on_chain());
        assert!(!escrow.custody_elapsed(u64::MAX));
    }
}
