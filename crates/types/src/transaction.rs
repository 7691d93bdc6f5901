use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ParseStatusError, PaymentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RailTransactionKind {
    Deposit,
    Withdrawal,
    Redemption,
    Payout,
}

impl RailTransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RailTransactionKind::Deposit => "deposit",
            RailTransactionKind::Withdrawal => "withdrawal",
            RailTransactionKind::Redemption => "redemption",
            RailTransactionKind::Payout => "payout",
        }
    }
}

impl fmt::Display for RailTransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RailTransactionKind {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(RailTransactionKind::Deposit),
            "withdrawal" => Ok(RailTransactionKind::Withdrawal),
            "redemption" => Ok(RailTransactionKind::Redemption),
            "payout" => Ok(RailTransactionKind::Payout),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Settlement state of a transaction as reported by the fiat rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RailTransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl RailTransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RailTransactionStatus::Pending => "pending",
            RailTransactionStatus::Completed => "completed",
            RailTransactionStatus::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, RailTransactionStatus::Pending)
    }
}

impl fmt::Display for RailTransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RailTransactionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RailTransactionStatus::Pending),
            "completed" => Ok(RailTransactionStatus::Completed),
            "failed" => Ok(RailTransactionStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Local mirror of a rail transaction, keyed by its external reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTransaction {
    pub external_ref: String,
    pub kind: RailTransactionKind,
    pub payment_id: Option<PaymentId>,
    pub amount: Decimal,
    pub status: RailTransactionStatus,
    pub tx_hash: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ExternalTransaction {
    pub fn new(
        external_ref: impl Into<String>,
        kind: RailTransactionKind,
        payment_id: Option<PaymentId>,
        amount: Decimal,
        status: RailTransactionStatus,
        now: u64,
    ) -> Self {
        Self {
            external_ref: external_ref.into(),
            kind,
            payment_id,
            amount,
            status,
            tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}
