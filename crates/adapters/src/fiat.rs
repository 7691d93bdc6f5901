use async_trait::async_trait;
use escrow_automation_types::{PaymentId, RailTransactionStatus};
use rust_decimal::Decimal;

use crate::AdapterError;

/// Transaction as reported by the fiat rail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailTransfer {
    pub external_ref: String,
    pub amount: Decimal,
    pub status: RailTransactionStatus,
}

/// Incoming transfer credited to one of the issued deposit accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailDeposit {
    pub external_ref: String,
    /// CLABE the payer sent funds to
    pub account: String,
    pub amount: Decimal,
    pub status: RailTransactionStatus,
}

/// Banking rail: CLABE issuance, deposits, withdrawals to the bridge and SPEI payouts
///
/// `withdraw`, `redeem` and `payout` are idempotent on their key: replaying a key returns
/// `AdapterError::Duplicate` carrying the reference of the original transaction.
#[async_trait]
pub trait FiatRail: Send + Sync {
    /// Assign a deposit account (CLABE) to a payment
    async fn issue_deposit_account(&self, payment_id: PaymentId) -> Result<String, AdapterError>;

    /// Balance available on the platform custodial account
    async fn custodial_balance(&self) -> Result<Decimal, AdapterError>;

    /// Move funds from the custodial account to the bridge wallet
    async fn withdraw(
        &self,
        amount: Decimal,
        from_account: &str,
        to_bridge: &str,
        idempotency_key: &str,
    ) -> Result<String, AdapterError>;

    /// Convert released custody value back to fiat
    async fn redeem(&self, amount: Decimal, idempotency_key: &str) -> Result<String, AdapterError>;

    /// Bank transfer to the payee's registered account
    async fn payout(
        &self,
        amount: Decimal,
        payout_account: &str,
        idempotency_key: &str,
    ) -> Result<String, AdapterError>;

    async fn get_transaction(&self, external_ref: &str) -> Result<RailTransfer, AdapterError>;

    /// Deposits received on issued accounts
    async fn list_deposits(&self) -> Result<Vec<RailDeposit>, AdapterError>;
}
