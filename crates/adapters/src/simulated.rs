//! Simulated adapter backends
//!
//! In-memory fiat rail and escrow chain with the same idempotency behaviour as the real
//! integrations, plus knobs for balances, pause state and one-shot fault injection. Used by
//! the test suites and the `local` environment.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use escrow_automation_types::{PaymentId, RailTransactionStatus};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    AdapterError, ChainEscrowStatus, CreateEscrowRequest, EscrowChain, FiatRail, OnchainEscrow,
    Operation, RailDeposit, RailTransfer,
};

/// Fault to apply to the next call of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail before anything happens remotely
    Fail(AdapterError),
    /// Perform the operation, then report a timeout to the caller
    SucceedThenTimeout,
}

#[derive(Debug, Default)]
struct FaultInjector {
    pending: HashMap<Operation, VecDeque<Fault>>,
    calls: HashMap<Operation, usize>,
}

impl FaultInjector {
    fn begin(&mut self, operation: Operation) -> Result<bool, AdapterError> {
        *self.calls.entry(operation).or_default() += 1;
        match self.pending.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(Fault::Fail(error)) => {
                debug!(operation = %operation, error = %error, "injected failure");
                Err(error)
            }
            Some(Fault::SucceedThenTimeout) => Ok(true),
            None => Ok(false),
        }
    }

    fn push(&mut self, operation: Operation, fault: Fault) {
        self.pending.entry(operation).or_default().push_back(fault);
    }

    fn calls(&self, operation: Operation) -> usize {
        self.calls.get(&operation).copied().unwrap_or(0)
    }
}

fn finish<T>(operation: Operation, value: T, lose_reply: bool) -> Result<T, AdapterError> {
    if lose_reply {
        debug!(operation = %operation, "reply dropped after remote success");
        return Err(AdapterError::Timeout {
            operation,
            after_ms: 0,
        });
    }
    Ok(value)
}

// ═══════════════════════════════════════════════════════════════════════════
// FIAT RAIL
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct RailState {
    faults: FaultInjector,
    custodial_balance: Decimal,
    settle_immediately: bool,
    next_account: u64,
    next_ref: u64,
    transfers: HashMap<String, RailTransfer>,
    by_key: HashMap<String, String>,
    deposits: Vec<RailDeposit>,
    payouts: Vec<(String, Decimal)>,
}

/// In-memory banking rail
#[derive(Debug)]
pub struct SimulatedFiatRail {
    state: RwLock<RailState>,
}

impl SimulatedFiatRail {
    pub fn new() -> Self {
        Self::with_custodial_balance(Decimal::from(1_000_000))
    }

    pub fn with_custodial_balance(balance: Decimal) -> Self {
        Self {
            state: RwLock::new(RailState {
                faults: FaultInjector::default(),
                custodial_balance: balance,
                settle_immediately: true,
                next_account: 1,
                next_ref: 1,
                transfers: HashMap::new(),
                by_key: HashMap::new(),
                deposits: Vec::new(),
                payouts: Vec::new(),
            }),
        }
    }

    pub async fn set_custodial_balance(&self, balance: Decimal) {
        self.state.write().await.custodial_balance = balance;
    }

    /// When false, withdrawals stay `pending` until `settle_pending` is called
    pub async fn set_settle_immediately(&self, settle: bool) {
        self.state.write().await.settle_immediately = settle;
    }

    /// Complete every pending transfer
    pub async fn settle_pending(&self) {
        let mut state = self.state.write().await;
        for transfer in state.transfers.values_mut() {
            if transfer.status == RailTransactionStatus::Pending {
                transfer.status = RailTransactionStatus::Completed;
            }
        }
    }

    /// Mark a transfer failed on the rail side
    pub async fn fail_transfer(&self, external_ref: &str) {
        if let Some(transfer) = self.state.write().await.transfers.get_mut(external_ref) {
            transfer.status = RailTransactionStatus::Failed;
        }
    }

    /// Credit a completed deposit to `account`; returns its external reference
    pub async fn receive_deposit(&self, account: &str, amount: Decimal) -> String {
        let mut state = self.state.write().await;
        let external_ref = format!("dep-{}", state.next_ref);
        state.next_ref += 1;
        state.deposits.push(RailDeposit {
            external_ref: external_ref.clone(),
            account: account.to_string(),
            amount,
            status: RailTransactionStatus::Completed,
        });
        external_ref
    }

    pub async fn inject(&self, operation: Operation, fault: Fault) {
        self.state.write().await.faults.push(operation, fault);
    }

    pub async fn calls(&self, operation: Operation) -> usize {
        self.state.read().await.faults.calls(operation)
    }

    /// Payouts executed so far, as (account, amount)
    pub async fn payouts(&self) -> Vec<(String, Decimal)> {
        self.state.read().await.payouts.clone()
    }

    fn record(
        state: &mut RailState,
        prefix: &str,
        key: &str,
        amount: Decimal,
        status: RailTransactionStatus,
    ) -> String {
        let external_ref = format!("{prefix}-{}", state.next_ref);
        state.next_ref += 1;
        state.transfers.insert(
            external_ref.clone(),
            RailTransfer {
                external_ref: external_ref.clone(),
                amount,
                status,
            },
        );
        state.by_key.insert(key.to_string(), external_ref.clone());
        external_ref
    }
}

impl Default for SimulatedFiatRail {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FiatRail for SimulatedFiatRail {
    async fn issue_deposit_account(&self, payment_id: PaymentId) -> Result<String, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::IssueDepositAccount)?;
        let account = format!("646180{:012}", state.next_account);
        state.next_account += 1;
        debug!(payment_id = %payment_id, account = %account, "deposit account issued");
        finish(Operation::IssueDepositAccount, account, lose_reply)
    }

    async fn custodial_balance(&self) -> Result<Decimal, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::CustodialBalance)?;
        let balance = state.custodial_balance;
        finish(Operation::CustodialBalance, balance, lose_reply)
    }

    async fn withdraw(
        &self,
        amount: Decimal,
        from_account: &str,
        to_bridge: &str,
        idempotency_key: &str,
    ) -> Result<String, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::Withdraw)?;

        if let Some(existing) = state.by_key.get(idempotency_key) {
            return Err(AdapterError::Duplicate {
                existing_ref: existing.clone(),
            });
        }
        if state.custodial_balance < amount {
            return Err(AdapterError::InsufficientFunds {
                needed: amount,
                available: state.custodial_balance,
            });
        }

        state.custodial_balance -= amount;
        let status = if state.settle_immediately {
            RailTransactionStatus::Completed
        } else {
            RailTransactionStatus::Pending
        };
        let external_ref = Self::record(&mut state, "wd", idempotency_key, amount, status);
        info!(
            external_ref = %external_ref,
            from = from_account,
            to = to_bridge,
            amount = %amount,
            "simulated withdrawal"
        );
        finish(Operation::Withdraw, external_ref, lose_reply)
    }

    async fn redeem(&self, amount: Decimal, idempotency_key: &str) -> Result<String, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::Redeem)?;

        if let Some(existing) = state.by_key.get(idempotency_key) {
            return Err(AdapterError::Duplicate {
                existing_ref: existing.clone(),
            });
        }
        let external_ref = Self::record(
            &mut state,
            "rdm",
            idempotency_key,
            amount,
            RailTransactionStatus::Completed,
        );
        finish(Operation::Redeem, external_ref, lose_reply)
    }

    async fn payout(
        &self,
        amount: Decimal,
        payout_account: &str,
        idempotency_key: &str,
    ) -> Result<String, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::Payout)?;

        if let Some(existing) = state.by_key.get(idempotency_key) {
            return Err(AdapterError::Duplicate {
                existing_ref: existing.clone(),
            });
        }
        let external_ref = Self::record(
            &mut state,
            "pay",
            idempotency_key,
            amount,
            RailTransactionStatus::Completed,
        );
        state.payouts.push((payout_account.to_string(), amount));
        finish(Operation::Payout, external_ref, lose_reply)
    }

    async fn get_transaction(&self, external_ref: &str) -> Result<RailTransfer, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::GetTransaction)?;
        let transfer = state
            .transfers
            .get(external_ref)
            .cloned()
            .ok_or_else(|| AdapterError::Rejected(format!("unknown transfer {external_ref}")))?;
        finish(Operation::GetTransaction, transfer, lose_reply)
    }

    async fn list_deposits(&self) -> Result<Vec<RailDeposit>, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::ListDeposits)?;
        let deposits = state.deposits.clone();
        finish(Operation::ListDeposits, deposits, lose_reply)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ESCROW CHAIN
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct SimulatedEscrow {
    reference: String,
    tx_hash: String,
    custody_amount: Decimal,
    status: ChainEscrowStatus,
    release_tx: Option<String>,
}

#[derive(Debug)]
struct ChainState {
    faults: FaultInjector,
    paused: bool,
    bridge_balance: Decimal,
    next_id: u64,
    escrows: HashMap<String, SimulatedEscrow>,
}

/// In-memory escrow contract
#[derive(Debug)]
pub struct SimulatedChain {
    state: RwLock<ChainState>,
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self::with_bridge_balance(Decimal::from(1_000_000))
    }

    pub fn with_bridge_balance(balance: Decimal) -> Self {
        Self {
            state: RwLock::new(ChainState {
                faults: FaultInjector::default(),
                paused: false,
                bridge_balance: balance,
                next_id: 1,
                escrows: HashMap::new(),
            }),
        }
    }

    pub async fn set_paused(&self, paused: bool) {
        self.state.write().await.paused = paused;
    }

    pub async fn set_bridge_balance(&self, balance: Decimal) {
        self.state.write().await.bridge_balance = balance;
    }

    /// Force the on-chain status of an escrow
    pub async fn set_status(&self, onchain_escrow_id: &str, status: ChainEscrowStatus) {
        if let Some(escrow) = self.state.write().await.escrows.get_mut(onchain_escrow_id) {
            escrow.status = status;
        }
    }

    pub async fn inject(&self, operation: Operation, fault: Fault) {
        self.state.write().await.faults.push(operation, fault);
    }

    pub async fn calls(&self, operation: Operation) -> usize {
        self.state.read().await.faults.calls(operation)
    }

    /// Number of escrows that exist on chain
    pub async fn escrow_count(&self) -> usize {
        self.state.read().await.escrows.len()
    }

    /// Custody amount locked under `reference`, if an escrow exists for it
    pub async fn custody_for(&self, reference: &str) -> Option<Decimal> {
        self.state
            .read()
            .await
            .escrows
            .values()
            .find(|e| e.reference == reference)
            .map(|e| e.custody_amount)
    }
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EscrowChain for SimulatedChain {
    async fn is_paused(&self) -> Result<bool, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::IsPaused)?;
        let paused = state.paused;
        finish(Operation::IsPaused, paused, lose_reply)
    }

    async fn bridge_balance(&self) -> Result<Decimal, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::BridgeBalance)?;
        let balance = state.bridge_balance;
        finish(Operation::BridgeBalance, balance, lose_reply)
    }

    async fn create_and_fund(
        &self,
        request: &CreateEscrowRequest,
    ) -> Result<OnchainEscrow, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::CreateAndFund)?;

        if state.paused {
            return Err(AdapterError::Paused);
        }
        if let Some((id, _)) = state
            .escrows
            .iter()
            .find(|(_, e)| e.reference == request.reference)
        {
            return Err(AdapterError::Duplicate {
                existing_ref: id.clone(),
            });
        }
        if state.bridge_balance < request.custody_amount {
            return Err(AdapterError::InsufficientFunds {
                needed: request.custody_amount,
                available: state.bridge_balance,
            });
        }

        state.bridge_balance -= request.custody_amount;
        let escrow_id = state.next_id.to_string();
        let tx_hash = format!("0x{:064x}", state.next_id);
        state.next_id += 1;
        state.escrows.insert(
            escrow_id.clone(),
            SimulatedEscrow {
                reference: request.reference.clone(),
                tx_hash: tx_hash.clone(),
                custody_amount: request.custody_amount,
                status: ChainEscrowStatus::Active,
                release_tx: None,
            },
        );

        info!(
            escrow_id = %escrow_id,
            reference = %request.reference,
            custody_amount = %request.custody_amount,
            custody_end = request.custody_end,
            "simulated escrow created"
        );
        finish(
            Operation::CreateAndFund,
            OnchainEscrow { escrow_id, tx_hash },
            lose_reply,
        )
    }

    async fn find_escrow(&self, reference: &str) -> Result<Option<OnchainEscrow>, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::FindEscrow)?;
        let found = state
            .escrows
            .iter()
            .find(|(_, e)| e.reference == reference)
            .map(|(id, e)| OnchainEscrow {
                escrow_id: id.clone(),
                tx_hash: e.tx_hash.clone(),
            });
        finish(Operation::FindEscrow, found, lose_reply)
    }

    async fn release(&self, onchain_escrow_id: &str) -> Result<String, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::Release)?;

        if state.paused {
            return Err(AdapterError::Paused);
        }
        let next_id = state.next_id;
        let escrow = state
            .escrows
            .get_mut(onchain_escrow_id)
            .ok_or_else(|| AdapterError::Rejected(format!("unknown escrow {onchain_escrow_id}")))?;

        if let Some(existing) = &escrow.release_tx {
            return Err(AdapterError::Duplicate {
                existing_ref: existing.clone(),
            });
        }
        if escrow.status != ChainEscrowStatus::Active {
            return Err(AdapterError::Rejected(format!(
                "escrow {onchain_escrow_id} is {:?}",
                escrow.status
            )));
        }

        let tx_hash = format!("0x{:064x}", next_id);
        escrow.status = ChainEscrowStatus::Released;
        escrow.release_tx = Some(tx_hash.clone());
        state.next_id += 1;
        finish(Operation::Release, tx_hash, lose_reply)
    }

    async fn get_status(&self, onchain_escrow_id: &str) -> Result<ChainEscrowStatus, AdapterError> {
        let mut state = self.state.write().await;
        let lose_reply = state.faults.begin(Operation::GetStatus)?;
        let status = state
            .escrows
            .get(onchain_escrow_id)
            .map(|e| e.status)
            .ok_or_else(|| AdapterError::Rejected(format!("unknown escrow {onchain_escrow_id}")))?;
        finish(Operation::GetStatus, status, lose_reply)
    }
}
