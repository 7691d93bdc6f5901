use async_trait::async_trait;
use escrow_automation_types::{
    Escrow, Event, ExternalTransaction, Lease, NewEvent, Payment, PaymentId, PaymentStatus,
};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record ID: {0}")]
    DuplicateId(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAITS
// ═══════════════════════════════════════════════════════════════════════════

/// Position in a status scan: the last payment a previous page returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScanCursor {
    pub created_at: u64,
    pub id: PaymentId,
}

impl ScanCursor {
    pub fn after(payment: &Payment) -> Self {
        Self {
            created_at: payment.created_at,
            id: payment.id,
        }
    }
}

/// Durable payment and escrow records
///
/// Status and lease columns are only ever changed through `compare_and_set_status`
/// and `try_claim`/`release_claim`; `update_payment` leaves them untouched so a stale
/// in-memory copy can never roll a status back.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Store a new payment
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError>;

    /// Persist the non-status attributes of a payment
    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    /// Move `id` from `expected` to `next`; returns false if the stored status differs
    async fn compare_and_set_status(
        &self,
        id: PaymentId,
        expected: PaymentStatus,
        next: PaymentStatus,
        now: u64,
    ) -> Result<bool, StoreError>;

    /// Payments in `status` ordered by `(created_at, id)`, starting after `after`
    async fn list_by_status_after(
        &self,
        status: PaymentStatus,
        after: Option<ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Payment>, StoreError>;

    /// First page of payments in `status`, oldest first
    async fn list_by_status(
        &self,
        status: PaymentStatus,
        limit: usize,
    ) -> Result<Vec<Payment>, StoreError> {
        self.list_by_status_after(status, None, limit).await
    }

    /// Store the escrow shadowing a payment; a second escrow for the same payment is rejected
    async fn insert_escrow(&self, escrow: &Escrow) -> Result<(), StoreError>;

    async fn get_escrow(&self, payment_id: PaymentId) -> Result<Option<Escrow>, StoreError>;

    async fn update_escrow(&self, escrow: &Escrow) -> Result<(), StoreError>;

    /// Take or renew the processing lease on a payment
    ///
    /// Succeeds when the payment is unclaimed, already claimed by `owner`, or the
    /// previous lease has expired.
    async fn try_claim(
        &self,
        id: PaymentId,
        owner: &str,
        now: u64,
        ttl_secs: u64,
    ) -> Result<bool, StoreError>;

    /// Drop the lease if `owner` still holds it
    async fn release_claim(&self, id: PaymentId, owner: &str) -> Result<(), StoreError>;

    async fn upsert_external_transaction(
        &self,
        transaction: &ExternalTransaction,
    ) -> Result<(), StoreError>;

    async fn get_external_transaction(
        &self,
        external_ref: &str,
    ) -> Result<Option<ExternalTransaction>, StoreError>;
}

/// Append-only audit log of everything that happened to a payment
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Append an entry and return it with its assigned sequence number
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError>;

    /// Entries for one payment in append order
    async fn events_for(&self, payment_id: PaymentId) -> Result<Vec<Event>, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE (for testing)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct MemoryState {
    payments: BTreeMap<PaymentId, Payment>,
    escrows: HashMap<PaymentId, Escrow>,
    events: Vec<Event>,
    transactions: HashMap<String, ExternalTransaction>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger entries across all payments (for testing)
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.payments.contains_key(&payment.id) {
            return Err(StoreError::DuplicateId(payment.id.to_string()));
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| StoreError::NotFound(payment.id.to_string()))?;

        stored.amount = payment.amount;
        stored.deposit_account = payment.deposit_account.clone();
        stored.payout_account = payment.payout_account.clone();
        stored.external_reference = payment.external_reference.clone();
        stored.custody_percent = payment.custody_percent;
        stored.custody_period_secs = payment.custody_period_secs;
        stored.updated_at = payment.updated_at;
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: PaymentId,
        expected: PaymentStatus,
        next: PaymentStatus,
        now: u64,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if payment.status != expected {
            return Ok(false);
        }
        payment.status = next;
        payment.updated_at = now;
        Ok(true)
    }

    async fn list_by_status_after(
        &self,
        status: PaymentStatus,
        after: Option<ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.read().await;
        let mut results: Vec<_> = state
            .payments
            .values()
            .filter(|p| p.status == status)
            .filter(|p| after.map_or(true, |cursor| ScanCursor::after(p) > cursor))
            .cloned()
            .collect();

        results.sort_by_key(|p| (p.created_at, p.id));
        results.truncate(limit);
        Ok(results)
    }

    async fn insert_escrow(&self, escrow: &Escrow) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.escrows.contains_key(&escrow.payment_id)
            || state.escrows.values().any(|e| e.id == escrow.id)
        {
            return Err(StoreError::DuplicateId(escrow.id.clone()));
        }
        state.escrows.insert(escrow.payment_id, escrow.clone());
        Ok(())
    }

    async fn get_escrow(&self, payment_id: PaymentId) -> Result<Option<Escrow>, StoreError> {
        Ok(self.state.read().await.escrows.get(&payment_id).cloned())
    }

    async fn update_escrow(&self, escrow: &Escrow) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.escrows.get_mut(&escrow.payment_id) {
            Some(stored) if stored.id == escrow.id => {
                *stored = escrow.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound(escrow.id.clone())),
        }
    }

    async fn try_claim(
        &self,
        id: PaymentId,
        owner: &str,
        now: u64,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if payment.is_claimed_by_other(owner, now) {
            return Ok(false);
        }
        payment.lease = Some(Lease {
            owner: owner.to_string(),
            expires_at: now.saturating_add(ttl_secs),
        });
        Ok(true)
    }

    async fn release_claim(&self, id: PaymentId, owner: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(payment) = state.payments.get_mut(&id) {
            if payment.lease.as_ref().is_some_and(|l| l.owner == owner) {
                payment.lease = None;
            }
        }
        Ok(())
    }

    async fn upsert_external_transaction(
        &self,
        transaction: &ExternalTransaction,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let created_at = state
            .transactions
            .get(&transaction.external_ref)
            .map(|t| t.created_at)
            .unwrap_or(transaction.created_at);

        let mut record = transaction.clone();
        record.created_at = created_at;
        state
            .transactions
            .insert(transaction.external_ref.clone(), record);
        Ok(())
    }

    async fn get_external_transaction(
        &self,
        external_ref: &str,
    ) -> Result<Option<ExternalTransaction>, StoreError> {
        Ok(self.state.read().await.transactions.get(external_ref).cloned())
    }
}

#[async_trait]
impl EventLedger for InMemoryStore {
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError> {
        let mut state = self.state.write().await;
        let sequence = state.events.len() as u64 + 1;
        let event = event.into_event(sequence);
        state.events.push(event.clone());
        Ok(event)
    }

    async fn events_for(&self, payment_id: PaymentId) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.payment_id == payment_id)
            .cloned()
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
