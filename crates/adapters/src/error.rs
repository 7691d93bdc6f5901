use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// Adapter call, used to name deadlines, fault injection and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    IssueDepositAccount,
    CustodialBalance,
    Withdraw,
    Redeem,
    Payout,
    GetTransaction,
    ListDeposits,
    IsPaused,
    BridgeBalance,
    CreateAndFund,
    FindEscrow,
    Release,
    GetStatus,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::IssueDepositAccount => "issue_deposit_account",
            Operation::CustodialBalance => "custodial_balance",
            Operation::Withdraw => "withdraw",
            Operation::Redeem => "redeem",
            Operation::Payout => "payout",
            Operation::GetTransaction => "get_transaction",
            Operation::ListDeposits => "list_deposits",
            Operation::IsPaused => "is_paused",
            Operation::BridgeBalance => "bridge_balance",
            Operation::CreateAndFund => "create_and_fund",
            Operation::FindEscrow => "find_escrow",
            Operation::Release => "release",
            Operation::GetStatus => "get_status",
        }
    }

    /// Which external system serves this call
    pub fn adapter(&self) -> &'static str {
        match self {
            Operation::IssueDepositAccount
            | Operation::CustodialBalance
            | Operation::Withdraw
            | Operation::Redeem
            | Operation::Payout
            | Operation::GetTransaction
            | Operation::ListDeposits => "fiat_rail",
            Operation::IsPaused
            | Operation::BridgeBalance
            | Operation::CreateAndFund
            | Operation::FindEscrow
            | Operation::Release
            | Operation::GetStatus => "escrow_chain",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Local deadline expired; the remote side may still have acted
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: Operation, after_ms: u64 },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("escrow contract is paused")]
    Paused,

    /// Idempotency key (or escrow reference) already used; the operation already happened
    #[error("duplicate operation, existing reference {existing_ref}")]
    Duplicate { existing_ref: String },

    #[error("rejected: {0}")]
    Rejected(String),
}
