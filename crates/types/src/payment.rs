use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Numeric payment identifier assigned by the system of record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub u64);

impl PaymentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PaymentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Lifecycle status of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Deposit account assigned, waiting for fiat deposit
    Pending,
    /// Fiat deposit confirmed
    Funded,
    /// Escrow creation in progress
    Processing,
    /// On-chain escrow created and funded
    Escrowed,
    /// Custody period running
    Active,
    /// Redemption confirmed, bank transfer to payee not yet confirmed
    PayoutPending,
    /// Payout confirmed
    Completed,
    /// Counterparty dispute open
    Disputed,
    /// Irrecoverable; only manual recovery resumes it
    Failed,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 9] = [
        PaymentStatus::Pending,
        PaymentStatus::Funded,
        PaymentStatus::Processing,
        PaymentStatus::Escrowed,
        PaymentStatus::Active,
        PaymentStatus::PayoutPending,
        PaymentStatus::Completed,
        PaymentStatus::Disputed,
        PaymentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Funded => "funded",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Escrowed => "escrowed",
            PaymentStatus::Active => "active",
            PaymentStatus::PayoutPending => "payout_pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Disputed => "disputed",
            PaymentStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` accept no automatic transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status: {0}")]
pub struct ParseStatusError(pub String);

/// Time-bounded exclusive processing claim stored alongside the payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub expires_at: u64,
}

impl Lease {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("payment amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("custody percent must be in (0, 100], got {0}")]
    InvalidCustodyPercent(Decimal),

    #[error("payout account is required")]
    MissingPayoutAccount,
}

/// A fiat-denominated obligation between a payer and a payee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: Decimal,
    pub status: PaymentStatus,

    /// CLABE the payer deposits into
    pub deposit_account: Option<String>,

    /// Registered payee account for the final bank transfer
    pub payout_account: String,

    /// Rail reference of the confirmed deposit
    pub external_reference: Option<String>,

    /// Share of the amount held in on-chain custody, in percent
    pub custody_percent: Decimal,

    /// Per-payment custody period override; config default applies when absent
    pub custody_period_secs: Option<i64>,

    pub lease: Option<Lease>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Payment {
    pub fn new(
        id: PaymentId,
        amount: Decimal,
        payout_account: impl Into<String>,
        custody_percent: Decimal,
        created_at: u64,
    ) -> Result<Self, PaymentError> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::NonPositiveAmount(amount));
        }
        if custody_percent <= Decimal::ZERO || custody_percent > Decimal::ONE_HUNDRED {
            return Err(PaymentError::InvalidCustodyPercent(custody_percent));
        }
        let payout_account = payout_account.into();
        if payout_account.trim().is_empty() {
            return Err(PaymentError::MissingPayoutAccount);
        }

        Ok(Self {
            id,
            amount,
            status: PaymentStatus::Pending,
            deposit_account: None,
            payout_account,
            external_reference: None,
            custody_percent,
            custody_period_secs: None,
            lease: None,
            created_at,
            updated_at: created_at,
        })
    }

    pub fn with_custody_period(mut self, secs: i64) -> Self {
        self.custody_period_secs = Some(secs);
        self
    }

    /// Amount that goes into on-chain custody, rounded to cents
    pub fn custody_amount(&self) -> Decimal {
        (self.amount * self.custody_percent / Decimal::ONE_HUNDRED).round_dp(2)
    }

    /// Whether another worker currently holds an unexpired lease
    pub fn is_claimed_by_other(&self, owner: &str, now: u64) -> bool {
        match &self.lease {
            Some(lease) => lease.owner != owner && !lease.is_expired(now),
            None => false,
        }
    }
}
