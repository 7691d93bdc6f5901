use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::AdapterError;

/// Arguments for creating and funding a custody escrow in one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEscrowRequest {
    pub custody_amount: Decimal,
    pub custody_percent: Decimal,
    /// Absolute custody deadline (unix seconds)
    pub custody_end: u64,
    /// Payment-derived reference recorded on chain; lets a lost reply be found again
    pub reference: String,
}

/// Escrow as seen on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnchainEscrow {
    pub escrow_id: String,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEscrowStatus {
    /// Created, funding not yet final
    Pending,
    /// Funded and holding custody
    Active,
    Released,
    Disputed,
}

/// Escrow smart contract
#[async_trait]
pub trait EscrowChain: Send + Sync {
    async fn is_paused(&self) -> Result<bool, AdapterError>;

    /// Balance currently held by the bridge wallet
    async fn bridge_balance(&self) -> Result<Decimal, AdapterError>;

    async fn create_and_fund(
        &self,
        request: &CreateEscrowRequest,
    ) -> Result<OnchainEscrow, AdapterError>;

    /// Look up an escrow by the reference it was created with
    async fn find_escrow(&self, reference: &str) -> Result<Option<OnchainEscrow>, AdapterError>;

    /// Release custody; returns the release transaction hash
    async fn release(&self, onchain_escrow_id: &str) -> Result<String, AdapterError>;

    async fn get_status(&self, onchain_escrow_id: &str) -> Result<ChainEscrowStatus, AdapterError>;
}
