//! Orchestration scenarios against the in-memory store and simulated adapters

use std::sync::Arc;

use escrow_automation_adapters::{
    AdapterError, Fault, Operation, SimulatedChain, SimulatedFiatRail,
};
use escrow_automation_metrics::{MetricsCollector, WorkerId};
use escrow_automation_store::{EventLedger, InMemoryStore, PaymentStore};
use escrow_automation_types::{
    AttemptState, DisputeStatus, EscrowStatus, EventKind, FailureClass, PaymentId, PaymentStatus,
    TriggerSource,
};
use rust_decimal::Decimal;

use crate::{
    OrchestratorConfig, OrchestratorContext, OrchestratorError, PaymentRequest, Resolution,
    RetryScheduler, WithdrawalState,
};

const NOW: u64 = 1_000_000;
const CUSTODY_PERIOD: u64 = 432_000;
const PAYOUT_ACCOUNT: &str = "012180001234567891";

struct Harness {
    store: Arc<InMemoryStore>,
    fiat: Arc<SimulatedFiatRail>,
    chain: Arc<SimulatedChain>,
    scheduler: RetryScheduler,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(test_config())
    }

    fn with_config(config: OrchestratorConfig) -> Self {
        Self::over(
            Arc::new(InMemoryStore::new()),
            Arc::new(SimulatedFiatRail::new()),
            Arc::new(SimulatedChain::new()),
            config,
            "worker-a",
        )
    }

    /// A second process sharing the same store and external systems
    fn sibling(&self, worker: &str) -> Self {
        Self::over(
            self.store.clone(),
            self.fiat.clone(),
            self.chain.clone(),
            self.scheduler.context().config.clone(),
            worker,
        )
    }

    fn over(
        store: Arc<InMemoryStore>,
        fiat: Arc<SimulatedFiatRail>,
        chain: Arc<SimulatedChain>,
        config: OrchestratorConfig,
        worker: &str,
    ) -> Self {
        let ctx = OrchestratorContext::new(
            store.clone(),
            fiat.clone(),
            chain.clone(),
            config,
            MetricsCollector::new().unwrap(),
        )
        .with_worker(WorkerId::named(worker));

        Self {
            store,
            fiat,
            chain,
            scheduler: RetryScheduler::new(Arc::new(ctx)),
        }
    }

    async fn open(&self, id: u64, amount: i64) -> PaymentId {
        self.open_request(PaymentRequest::new(
            PaymentId(id),
            Decimal::from(amount),
            PAYOUT_ACCOUNT,
        ))
        .await
    }

    async fn open_request(&self, request: PaymentRequest) -> PaymentId {
        let payment = self
            .scheduler
            .deposits()
            .open_payment(request, NOW)
            .await
            .unwrap();
        payment.id
    }

    /// Open a payment and have its deposit detected
    async fn funded(&self, id: u64, amount: i64) -> PaymentId {
        self.funded_request(PaymentRequest::new(
            PaymentId(id),
            Decimal::from(amount),
            PAYOUT_ACCOUNT,
        ))
        .await
    }

    async fn funded_request(&self, request: PaymentRequest) -> PaymentId {
        let amount = request.amount;
        let payment_id = self.open_request(request).await;
        self.deposit(payment_id, amount).await;
        let report = self.scheduler.deposits().detect_deposits(NOW).await.unwrap();
        assert!(report.funded.contains(&payment_id));
        payment_id
    }

    /// Funded payment run through escrow creation and custody activation
    async fn active(&self, id: u64, amount: i64) -> PaymentId {
        self.active_request(PaymentRequest::new(
            PaymentId(id),
            Decimal::from(amount),
            PAYOUT_ACCOUNT,
        ))
        .await
    }

    async fn active_request(&self, request: PaymentRequest) -> PaymentId {
        let payment_id = self.funded_request(request).await;
        let report = self
            .scheduler
            .escrow()
            .run(payment_id, TriggerSource::Deposit, NOW)
            .await
            .unwrap();
        assert!(report.succeeded());
        let sync = self.scheduler.payouts().sync_custody(NOW).await.unwrap();
        assert!(sync.activated.contains(&payment_id));
        payment_id
    }

    async fn deposit(&self, payment_id: PaymentId, amount: Decimal) -> String {
        let payment = self.store.get_payment(payment_id).await.unwrap().unwrap();
        self.fiat
            .receive_deposit(payment.deposit_account.as_deref().unwrap(), amount)
            .await
    }

    async fn status(&self, payment_id: PaymentId) -> PaymentStatus {
        self.store
            .get_payment(payment_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    async fn kinds(&self, payment_id: PaymentId) -> Vec<EventKind> {
        self.store
            .events_for(payment_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::default().with_accounts("646180000000000001", "0xbridge")
}

// ==================== Deposits ====================

#[tokio::test]
async fn test_open_payment_issues_deposit_account() {
    let h = Harness::new();
    let payment_id = h.open(1, 1_000).await;

    let payment = h.store.get_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.deposit_account.unwrap().starts_with("646180"));
    assert_eq!(payment.custody_percent, Decimal::ONE_HUNDRED);
}

#[tokio::test]
async fn test_open_payment_rejects_invalid_amount() {
    let h = Harness::new();
    let result = h
        .scheduler
        .deposits()
        .open_payment(
            PaymentRequest::new(PaymentId(1), Decimal::ZERO, PAYOUT_ACCOUNT),
            NOW,
        )
        .await;
    assert!(matches!(result, Err(OrchestratorError::InvalidPayment(_))));
}

#[tokio::test]
async fn test_deposit_detection_funds_payment() {
    let h = Harness::new();
    let payment_id = h.open(1, 1_000).await;
    let external_ref = h.deposit(payment_id, Decimal::from(1_000)).await;

    let report = h.scheduler.deposits().detect_deposits(NOW).await.unwrap();
    assert_eq!(report.funded, vec![payment_id]);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Funded);

    let payment = h.store.get_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.external_reference.as_deref(), Some(external_ref.as_str()));

    let escrow = h.store.get_escrow(payment_id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Pending);
    assert_eq!(escrow.custody_period_secs, CUSTODY_PERIOD as i64);

    let mirror = h
        .store
        .get_external_transaction(&external_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirror.payment_id, Some(payment_id));

    let kinds = h.kinds(payment_id).await;
    // The deposit is on the ledger before the status change it causes
    assert_eq!(kinds, vec![EventKind::DepositDetected, EventKind::StatusChanged]);

    // A second pass funds nothing new
    let report = h.scheduler.deposits().detect_deposits(NOW + 1).await.unwrap();
    assert!(report.funded.is_empty());
    assert_eq!(h.kinds(payment_id).await.len(), 2);
}

#[tokio::test]
async fn test_deposit_amount_mismatch_leaves_payment_pending() {
    let h = Harness::new();
    let payment_id = h.open(1, 1_000).await;
    h.deposit(payment_id, Decimal::from(999)).await;

    let report = h.scheduler.deposits().detect_deposits(NOW).await.unwrap();
    assert!(report.funded.is_empty());
    assert_eq!(report.mismatched, vec![payment_id]);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Pending);
    assert!(h.store.get_escrow(payment_id).await.unwrap().is_none());
}

// ==================== Escrow creation ====================

#[tokio::test]
async fn test_happy_path_creates_escrow() {
    let h = Harness::new();
    let payment_id = h.funded(1, 1_000).await;

    let report = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    assert_eq!(report.state, AttemptState::Succeeded);
    assert_eq!(report.status, PaymentStatus::Escrowed);

    let escrow = h.store.get_escrow(payment_id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Active);
    assert_eq!(escrow.custody_end, Some(NOW + CUSTODY_PERIOD));
    assert!(escrow.onchain_escrow_id.is_some());
    assert!(escrow.blockchain_tx_hash.is_some());

    assert_eq!(h.chain.escrow_count().await, 1);
    assert_eq!(h.chain.custody_for("payment-1").await, Some(Decimal::from(1_000)));
    assert_eq!(h.fiat.calls(Operation::Withdraw).await, 1);

    let kinds = h.kinds(payment_id).await;
    for expected in [
        EventKind::EscrowCreationStarted,
        EventKind::BridgeWithdrawalSubmitted,
        EventKind::BridgeWithdrawalInitiated,
        EventKind::BridgeWithdrawalConfirmed,
        EventKind::EscrowCreationSubmitted,
        EventKind::EscrowCreated,
    ] {
        assert!(kinds.contains(&expected), "missing {expected}");
    }
    // pending -> funded -> processing -> escrowed
    let transitions = kinds.iter().filter(|k| **k == EventKind::StatusChanged).count();
    assert_eq!(transitions, 3);

    // Payment lease is released after the attempt
    let payment = h.store.get_payment(payment_id).await.unwrap().unwrap();
    assert!(payment.lease.is_none());
}

#[tokio::test]
async fn test_partial_custody_percent() {
    let h = Harness::new();
    let payment_id = h
        .open_request(
            PaymentRequest::new(PaymentId(7), Decimal::from(1_000), PAYOUT_ACCOUNT)
                .with_custody_percent(Decimal::from(25)),
        )
        .await;
    h.deposit(payment_id, Decimal::from(1_000)).await;
    h.scheduler.deposits().detect_deposits(NOW).await.unwrap();

    h.scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    assert_eq!(h.chain.custody_for("payment-7").await, Some(Decimal::from(250)));
}

#[tokio::test]
async fn test_paused_contract_defers_creation() {
    let h = Harness::new();
    let payment_id = h.funded(1, 1_000).await;
    h.chain.set_paused(true).await;

    let report = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    assert_eq!(report.state, AttemptState::FailedRetryable);
    assert_eq!(report.failure, Some(FailureClass::ContractPaused));
    assert_eq!(h.status(payment_id).await, PaymentStatus::Funded);
    assert_eq!(h.fiat.calls(Operation::Withdraw).await, 0);
    assert!(h.kinds(payment_id).await.contains(&EventKind::ContractPaused));

    h.chain.set_paused(false).await;

    // Backoff has not elapsed yet
    let tick = h.scheduler.steady_tick(NOW + 10).await.unwrap();
    assert_eq!(tick.attempted, 0);

    let tick = h.scheduler.steady_tick(NOW + 30).await.unwrap();
    assert_eq!(tick.attempted, 1);
    assert_eq!(tick.succeeded, 1);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Escrowed);
    assert_eq!(h.fiat.calls(Operation::Withdraw).await, 1);
}

#[tokio::test]
async fn test_insufficient_bridge_balance_uses_quick_retry() {
    let h = Harness::new();
    let payment_id = h.funded(1, 1_000).await;
    h.chain.set_bridge_balance(Decimal::ZERO).await;

    let report = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    assert_eq!(report.failure, Some(FailureClass::InsufficientBalance));
    assert_eq!(h.status(payment_id).await, PaymentStatus::Processing);
    assert_eq!(h.fiat.calls(Operation::Withdraw).await, 1);

    // Not picked up by the steady timer
    let tick = h.scheduler.steady_tick(NOW + 30).await.unwrap();
    assert_eq!(tick.attempted, 0);

    h.chain.set_bridge_balance(Decimal::from(5_000)).await;
    let tick = h.scheduler.quick_tick(NOW + 30).await.unwrap();
    assert_eq!(tick.succeeded, 1);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Escrowed);

    // The confirmed withdrawal was reused
    assert_eq!(h.fiat.calls(Operation::Withdraw).await, 1);
    assert_eq!(h.chain.escrow_count().await, 1);
}

#[tokio::test]
async fn test_insufficient_custodial_balance_skips_withdrawal() {
    let h = Harness::new();
    let payment_id = h.funded(1, 1_000).await;
    h.fiat.set_custodial_balance(Decimal::from(10)).await;

    let report = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    assert_eq!(report.failure, Some(FailureClass::InsufficientBalance));
    assert_eq!(h.fiat.calls(Operation::Withdraw).await, 0);

    h.fiat.set_custodial_balance(Decimal::from(1_000_000)).await;
    let tick = h.scheduler.quick_tick(NOW + 30).await.unwrap();
    assert_eq!(tick.succeeded, 1);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Escrowed);
}

#[tokio::test]
async fn test_short_custody_period_fails_before_chain_calls() {
    let h = Harness::new();
    let payment_id = h
        .open_request(
            PaymentRequest::new(PaymentId(1), Decimal::from(1_000), PAYOUT_ACCOUNT)
                .with_custody_period(1),
        )
        .await;
    h.deposit(payment_id, Decimal::from(1_000)).await;
    h.scheduler.deposits().detect_deposits(NOW).await.unwrap();

    let report = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    assert_eq!(report.state, AttemptState::FailedTerminal);
    assert_eq!(report.failure, Some(FailureClass::DataIntegrity));
    assert_eq!(h.status(payment_id).await, PaymentStatus::Failed);

    assert_eq!(h.chain.calls(Operation::IsPaused).await, 0);
    assert_eq!(h.chain.calls(Operation::CreateAndFund).await, 0);
    assert_eq!(h.fiat.calls(Operation::Withdraw).await, 0);

    let kinds = h.kinds(payment_id).await;
    assert!(kinds.contains(&EventKind::DataIntegrityFault));
    assert!(kinds.contains(&EventKind::PaymentFailed));

    // Never retried automatically
    let tick = h.scheduler.steady_tick(NOW + 10_000).await.unwrap();
    assert_eq!(tick.attempted, 0);
}

#[tokio::test]
async fn test_resume_after_crash_from_ledger() {
    let h = Harness::new();
    let payment_id = h.funded(1, 1_000).await;
    h.fiat.set_settle_immediately(false).await;

    // Withdrawal submitted but not yet settled when this worker goes away
    let report = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    assert_eq!(report.failure, Some(FailureClass::InsufficientBalance));
    assert_eq!(h.status(payment_id).await, PaymentStatus::Processing);

    h.fiat.settle_pending().await;
    let restarted = h.sibling("worker-b");
    let tick = restarted.scheduler.quick_tick(NOW + 30).await.unwrap();
    assert_eq!(tick.succeeded, 1);

    assert_eq!(restarted.status(payment_id).await, PaymentStatus::Escrowed);
    assert_eq!(h.fiat.calls(Operation::Withdraw).await, 1);
    assert_eq!(h.chain.escrow_count().await, 1);
}

#[tokio::test]
async fn test_abandoned_lease_is_reclaimed() {
    let h = Harness::new();
    let payment_id = h.funded(1, 1_000).await;
    assert!(h
        .store
        .try_claim(payment_id, "crashed-worker", NOW, 60)
        .await
        .unwrap());

    let report = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::SteadyRetry, NOW + 10)
        .await
        .unwrap();
    assert_eq!(report.state, AttemptState::Skipped);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Funded);

    let report = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::SteadyRetry, NOW + 61)
        .await
        .unwrap();
    assert!(report.succeeded());
    assert!(h.kinds(payment_id).await.contains(&EventKind::LeaseReclaimed));
}

#[tokio::test]
async fn test_repeated_invocation_creates_one_escrow() {
    let h = Harness::new();
    let payment_id = h.funded(1, 1_000).await;

    let first = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    let second = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::Manual, NOW + 1)
        .await
        .unwrap();

    assert!(first.succeeded());
    assert!(second.skipped());
    assert_eq!(h.chain.calls(Operation::CreateAndFund).await, 1);
    assert_eq!(h.chain.escrow_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_workers_create_one_escrow() {
    let h = Harness::new();
    let other = h.sibling("worker-b");
    let payment_id = h.funded(1, 1_000).await;

    let (a, b) = tokio::join!(
        h.scheduler.escrow().run(payment_id, TriggerSource::Deposit, NOW),
        other.scheduler.escrow().run(payment_id, TriggerSource::SteadyRetry, NOW),
    );
    let reports = [a.unwrap(), b.unwrap()];

    assert!(reports.iter().any(|r| r.succeeded()));
    assert_eq!(h.status(payment_id).await, PaymentStatus::Escrowed);
    assert_eq!(h.chain.calls(Operation::CreateAndFund).await, 1);
    assert_eq!(h.chain.escrow_count().await, 1);
    assert_eq!(h.fiat.calls(Operation::Withdraw).await, 1);
}

#[tokio::test]
async fn test_lost_create_reply_is_adopted() {
    let h = Harness::new();
    let payment_id = h.funded(1, 1_000).await;
    h.chain
        .inject(Operation::CreateAndFund, Fault::SucceedThenTimeout)
        .await;

    let report = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    assert_eq!(report.failure, Some(FailureClass::UnknownOutcome));
    assert_eq!(h.status(payment_id).await, PaymentStatus::Processing);
    assert!(h.kinds(payment_id).await.contains(&EventKind::EscrowOutcomeUnknown));
    assert_eq!(h.chain.escrow_count().await, 1);

    let tick = h.scheduler.steady_tick(NOW + 30).await.unwrap();
    assert_eq!(tick.succeeded, 1);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Escrowed);

    assert_eq!(h.chain.calls(Operation::CreateAndFund).await, 1);
    assert_eq!(h.chain.calls(Operation::FindEscrow).await, 1);
    assert_eq!(h.chain.escrow_count().await, 1);

    let escrow = h.store.get_escrow(payment_id).await.unwrap().unwrap();
    assert_eq!(escrow.custody_end, Some(NOW + CUSTODY_PERIOD));
}

#[tokio::test]
async fn test_failed_withdrawal_retries_with_new_key() {
    let h = Harness::new();
    let payment_id = h.funded(1, 1_000).await;
    h.fiat.set_settle_immediately(false).await;

    h.scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    let progress = h.scheduler.context().progress(payment_id).await.unwrap();
    let WithdrawalState::Initiated { reference } = progress.withdrawal.clone() else {
        panic!("withdrawal not initiated");
    };

    h.fiat.fail_transfer(&reference).await;
    let tick = h.scheduler.quick_tick(NOW + 30).await.unwrap();
    assert_eq!(tick.failed, 1);
    assert!(h
        .kinds(payment_id)
        .await
        .contains(&EventKind::BridgeWithdrawalFailed));

    h.fiat.set_settle_immediately(true).await;
    // Two failures on record: the second backoff step is 60s
    let tick = h.scheduler.steady_tick(NOW + 90).await.unwrap();
    assert_eq!(tick.succeeded, 1);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Escrowed);
    assert_eq!(h.fiat.calls(Operation::Withdraw).await, 2);

    let transaction = h
        .store
        .get_external_transaction(&reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        transaction.status,
        escrow_automation_types::RailTransactionStatus::Failed
    );
}

// ==================== Retry budget and recovery ====================

#[tokio::test]
async fn test_retry_budget_exhaustion_and_manual_recovery() {
    let h = Harness::with_config(test_config().with_max_attempts(2));
    let payment_id = h.funded(1, 1_000).await;
    h.chain.set_paused(true).await;

    let report = h
        .scheduler
        .escrow()
        .run(payment_id, TriggerSource::Deposit, NOW)
        .await
        .unwrap();
    assert_eq!(report.state, AttemptState::FailedRetryable);

    let tick = h.scheduler.steady_tick(NOW + 30).await.unwrap();
    assert_eq!(tick.failed, 1);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Failed);
    assert!(h.kinds(payment_id).await.contains(&EventKind::PaymentFailed));

    // Failed payments are left alone by the timers
    let tick = h.scheduler.steady_tick(NOW + 10_000).await.unwrap();
    assert_eq!(tick.examined, 0);

    h.chain.set_paused(false).await;
    let report = h
        .scheduler
        .recover(payment_id, "ops@platform", NOW + 20_000)
        .await
        .unwrap();
    assert_eq!(report.trigger, TriggerSource::Manual);
    assert!(report.succeeded());
    assert_eq!(h.status(payment_id).await, PaymentStatus::Escrowed);
    assert!(h
        .kinds(payment_id)
        .await
        .contains(&EventKind::ManualRecoveryRequested));
}

#[tokio::test]
async fn test_recover_completed_payment_is_noop() {
    let h = Harness::new();
    let payment_id = h.active(1, 1_000).await;
    h.scheduler
        .payouts()
        .process_pending_payouts(NOW + CUSTODY_PERIOD)
        .await
        .unwrap();
    assert_eq!(h.status(payment_id).await, PaymentStatus::Completed);
    let events_before = h.kinds(payment_id).await.len();

    let report = h
        .scheduler
        .recover(payment_id, "ops@platform", NOW + CUSTODY_PERIOD + 1)
        .await
        .unwrap();
    assert!(report.skipped());
    assert_eq!(h.kinds(payment_id).await.len(), events_before);
}

// ==================== Payouts ====================

#[tokio::test]
async fn test_custody_activation() {
    let h = Harness::new();
    let payment_id = h.active(1, 1_000).await;
    assert_eq!(h.status(payment_id).await, PaymentStatus::Active);
    assert!(h.kinds(payment_id).await.contains(&EventKind::CustodyActivated));
}

#[tokio::test]
async fn test_payout_waits_for_custody_end() {
    let h = Harness::new();
    let payment_id = h.active(1, 1_000).await;

    let report = h
        .scheduler
        .payouts()
        .process_pending_payouts(NOW + CUSTODY_PERIOD - 1)
        .await
        .unwrap();
    assert_eq!(report.total(), 0);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Active);

    let report = h
        .scheduler
        .payouts()
        .process_pending_payouts(NOW + CUSTODY_PERIOD)
        .await
        .unwrap();
    assert_eq!(report.processed, vec![payment_id]);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Completed);

    let escrow = h.store.get_escrow(payment_id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Completed);
    assert!(escrow.release_tx_hash.is_some());
    assert_eq!(
        h.fiat.payouts().await,
        vec![(PAYOUT_ACCOUNT.to_string(), Decimal::from(1_000))]
    );

    let kinds = h.kinds(payment_id).await;
    for expected in [
        EventKind::EscrowReleased,
        EventKind::RedemptionInitiated,
        EventKind::RedemptionConfirmed,
        EventKind::PayoutInitiated,
        EventKind::PayoutConfirmed,
    ] {
        assert!(kinds.contains(&expected), "missing {expected}");
    }
}

#[tokio::test]
async fn test_payout_batch_continues_past_failure() {
    let h = Harness::new();
    let first = h.active(1, 1_000).await;
    let second = h.active(2, 2_000).await;
    h.fiat
        .inject(
            Operation::Payout,
            Fault::Fail(AdapterError::Transient("rail maintenance".into())),
        )
        .await;

    let report = h
        .scheduler
        .payouts()
        .process_pending_payouts(NOW + CUSTODY_PERIOD)
        .await
        .unwrap();
    assert_eq!(report.processed.len(), 1);
    assert_eq!(report.failed.len(), 1);

    let (failed_id, _) = &report.failed[0];
    assert_eq!(h.status(*failed_id).await, PaymentStatus::PayoutPending);
    assert_eq!(h.fiat.payouts().await.len(), 1);

    let report = h
        .scheduler
        .payouts()
        .process_pending_payouts(NOW + CUSTODY_PERIOD + 30)
        .await
        .unwrap();
    assert_eq!(report.processed, vec![*failed_id]);
    assert_eq!(h.status(first).await, PaymentStatus::Completed);
    assert_eq!(h.status(second).await, PaymentStatus::Completed);

    // Redemption is never repeated
    assert_eq!(h.fiat.calls(Operation::Redeem).await, 2);
    assert_eq!(h.chain.calls(Operation::Release).await, 2);
}

#[tokio::test]
async fn test_partial_custody_pays_out_the_whole_amount() {
    let h = Harness::new();
    let payment_id = h
        .open_request(
            PaymentRequest::new(PaymentId(7), Decimal::from(1_000), PAYOUT_ACCOUNT)
                .with_custody_percent(Decimal::from(25)),
        )
        .await;
    h.deposit(payment_id, Decimal::from(1_000)).await;

    h.scheduler.sweep(NOW).await.unwrap();
    assert_eq!(h.status(payment_id).await, PaymentStatus::Active);
    // The share outside custody is paid when custody starts
    assert_eq!(
        h.fiat.payouts().await,
        vec![(PAYOUT_ACCOUNT.to_string(), Decimal::from(750))]
    );
    let kinds = h.kinds(payment_id).await;
    let direct = kinds
        .iter()
        .position(|k| *k == EventKind::DirectPayoutConfirmed)
        .expect("direct payout confirmed");
    let activated = kinds
        .iter()
        .position(|k| *k == EventKind::CustodyActivated)
        .expect("custody activated");
    assert!(direct < activated);

    h.scheduler.sweep(NOW + CUSTODY_PERIOD).await.unwrap();
    assert_eq!(h.status(payment_id).await, PaymentStatus::Completed);

    let payouts = h.fiat.payouts().await;
    assert_eq!(payouts.len(), 2);
    assert_eq!(payouts[1].1, Decimal::from(250));
    let total: Decimal = payouts.iter().map(|(_, amount)| *amount).sum();
    assert_eq!(total, Decimal::from(1_000));

    // A later sweep pays nothing twice
    h.scheduler.sweep(NOW + CUSTODY_PERIOD + 60).await.unwrap();
    assert_eq!(h.fiat.payouts().await.len(), 2);
}

#[tokio::test]
async fn test_failed_redemption_is_retried_under_a_new_key() {
    let h = Harness::with_config(test_config().with_max_attempts(2));
    let payment_id = h.active(1, 1_000).await;
    h.fiat
        .inject(
            Operation::GetTransaction,
            Fault::Fail(AdapterError::Transient("rail lookup down".into())),
        )
        .await;

    let report = h
        .scheduler
        .payouts()
        .process_pending_payouts(NOW + CUSTODY_PERIOD)
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    let progress = h.scheduler.context().progress(payment_id).await.unwrap();
    let failed_ref = progress
        .redemption
        .reference()
        .expect("redemption submitted")
        .to_string();

    h.fiat.fail_transfer(&failed_ref).await;
    let report = h
        .scheduler
        .payouts()
        .process_pending_payouts(NOW + CUSTODY_PERIOD + 30)
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert!(h.kinds(payment_id).await.contains(&EventKind::RedemptionFailed));
    // Second consecutive failure exhausts the budget of two
    assert_eq!(h.status(payment_id).await, PaymentStatus::Failed);

    let progress = h.scheduler.context().progress(payment_id).await.unwrap();
    assert_eq!(progress.redemption_key(payment_id), "redeem-1-1");

    let report = h
        .scheduler
        .recover(payment_id, "ops@platform", NOW + CUSTODY_PERIOD + 60)
        .await
        .unwrap();
    assert!(report.succeeded());
    assert_eq!(h.status(payment_id).await, PaymentStatus::Completed);
    assert_eq!(h.fiat.calls(Operation::Redeem).await, 2);
    // Release happened once; recovery resumed after it
    assert_eq!(h.chain.calls(Operation::Release).await, 1);

    let progress = h.scheduler.context().progress(payment_id).await.unwrap();
    assert!(progress.redemption.is_confirmed());
    assert_ne!(progress.redemption.reference(), Some(failed_ref.as_str()));

    let mirror = h
        .store
        .get_external_transaction(&failed_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        mirror.status,
        escrow_automation_types::RailTransactionStatus::Failed
    );
}

#[tokio::test]
async fn test_long_custody_does_not_block_later_payouts() {
    let mut config = test_config();
    config.payout_batch_size = 1;
    config.scan_limit = 1;
    let h = Harness::with_config(config);

    let held = h
        .active_request(
            PaymentRequest::new(PaymentId(1), Decimal::from(1_000), PAYOUT_ACCOUNT)
                .with_custody_period(CUSTODY_PERIOD as i64 * 10),
        )
        .await;
    let due = h.active(2, 2_000).await;

    let report = h
        .scheduler
        .payouts()
        .process_pending_payouts(NOW + CUSTODY_PERIOD)
        .await
        .unwrap();
    assert_eq!(report.processed, vec![due]);
    assert_eq!(h.status(due).await, PaymentStatus::Completed);
    assert_eq!(h.status(held).await, PaymentStatus::Active);
}

#[tokio::test]
async fn test_early_release_authorization() {
    let h = Harness::new();
    let payment_id = h.active(1, 1_000).await;

    h.scheduler
        .payouts()
        .authorize_release(payment_id, "payee-portal", NOW + 20)
        .await
        .unwrap();
    // Authorizing twice records one entry
    h.scheduler
        .payouts()
        .authorize_release(payment_id, "payee-portal", NOW + 21)
        .await
        .unwrap();
    let authorizations = h
        .kinds(payment_id)
        .await
        .into_iter()
        .filter(|k| *k == EventKind::ReleaseAuthorized)
        .count();
    assert_eq!(authorizations, 1);

    let report = h
        .scheduler
        .payouts()
        .process_pending_payouts(NOW + 30)
        .await
        .unwrap();
    assert_eq!(report.processed, vec![payment_id]);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Completed);

    let result = h
        .scheduler
        .payouts()
        .authorize_release(payment_id, "payee-portal", NOW + 40)
        .await;
    assert!(matches!(result, Err(OrchestratorError::InvalidTransition(_))));
}

// ==================== Disputes ====================

#[tokio::test]
async fn test_dispute_blocks_payout_until_resolved() {
    let h = Harness::new();
    let payment_id = h.active(1, 1_000).await;

    let status = h
        .scheduler
        .payouts()
        .raise_dispute(payment_id, "payer reports non-delivery", NOW + 10)
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Disputed);

    let escrow = h.store.get_escrow(payment_id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Disputed);
    assert_eq!(escrow.dispute_status, DisputeStatus::Open);

    let report = h
        .scheduler
        .payouts()
        .process_pending_payouts(NOW + CUSTODY_PERIOD)
        .await
        .unwrap();
    assert_eq!(report.total(), 0);

    let status = h
        .scheduler
        .payouts()
        .resolve_dispute(payment_id, Resolution::ResumeCustody, NOW + CUSTODY_PERIOD)
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Active);
    let escrow = h.store.get_escrow(payment_id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Active);
    assert_eq!(escrow.dispute_status, DisputeStatus::Resolved);

    let report = h
        .scheduler
        .payouts()
        .process_pending_payouts(NOW + CUSTODY_PERIOD + 1)
        .await
        .unwrap();
    assert_eq!(report.processed, vec![payment_id]);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_dispute_cancellation_fails_payment() {
    let h = Harness::new();
    let payment_id = h.active(1, 1_000).await;

    h.scheduler
        .payouts()
        .raise_dispute(payment_id, "chargeback", NOW + 10)
        .await
        .unwrap();
    let status = h
        .scheduler
        .payouts()
        .resolve_dispute(payment_id, Resolution::Cancel, NOW + 20)
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Failed);

    let escrow = h.store.get_escrow(payment_id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Failed);
    assert!(h.fiat.payouts().await.is_empty());
}

#[tokio::test]
async fn test_operator_actions_respect_the_lease() {
    let h = Harness::new();
    let payment_id = h.active(1, 1_000).await;
    assert!(h
        .store
        .try_claim(payment_id, "worker-b#0", NOW + 5, 300)
        .await
        .unwrap());

    let payouts = h.scheduler.payouts();
    let result = payouts
        .raise_dispute(payment_id, "chargeback", NOW + 10)
        .await;
    assert!(matches!(result, Err(OrchestratorError::LeaseHeld(id)) if id == payment_id));
    let result = payouts
        .authorize_release(payment_id, "payee-portal", NOW + 10)
        .await;
    assert!(matches!(result, Err(OrchestratorError::LeaseHeld(_))));
    let result = h.scheduler.recover(payment_id, "ops@platform", NOW + 10).await;
    assert!(matches!(result, Err(OrchestratorError::LeaseHeld(_))));

    assert_eq!(h.status(payment_id).await, PaymentStatus::Active);
    let escrow = h.store.get_escrow(payment_id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Active);
    assert_eq!(escrow.dispute_status, DisputeStatus::None);
    let kinds = h.kinds(payment_id).await;
    assert!(!kinds.contains(&EventKind::DisputeRaised));
    assert!(!kinds.contains(&EventKind::ReleaseAuthorized));
    assert!(!kinds.contains(&EventKind::ManualRecoveryRequested));

    // Once the other lease has expired the dispute goes through
    let status = payouts
        .raise_dispute(payment_id, "chargeback", NOW + 305)
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Disputed);
    assert!(h.kinds(payment_id).await.contains(&EventKind::LeaseReclaimed));
    let payment = h.store.get_payment(payment_id).await.unwrap().unwrap();
    assert!(payment.lease.is_none());
}

#[tokio::test]
async fn test_dispute_rejected_for_pending_payment() {
    let h = Harness::new();
    let payment_id = h.funded(1, 1_000).await;

    let result = h
        .scheduler
        .payouts()
        .raise_dispute(payment_id, "too early", NOW)
        .await;
    assert!(matches!(result, Err(OrchestratorError::InvalidTransition(_))));
    assert_eq!(h.status(payment_id).await, PaymentStatus::Funded);
}

// ==================== Full sweep ====================

#[tokio::test]
async fn test_sweep_drives_payment_to_completion() {
    let h = Harness::new();
    let payment_id = h.open(1, 1_000).await;
    h.deposit(payment_id, Decimal::from(1_000)).await;

    let report = h.scheduler.sweep(NOW).await.unwrap();
    assert_eq!(report.deposits.funded, vec![payment_id]);
    assert_eq!(report.custody.activated, vec![payment_id]);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Active);

    let report = h.scheduler.sweep(NOW + CUSTODY_PERIOD).await.unwrap();
    assert_eq!(report.payouts.processed, vec![payment_id]);
    assert_eq!(h.status(payment_id).await, PaymentStatus::Completed);

    let rendered = h.scheduler.context().metrics.render().unwrap();
    assert!(rendered.contains("escrow_automation_payment_transitions_total"));
    assert!(rendered.contains("escrow_automation_attempts_total"));
}

#[tokio::test]
async fn test_scheduler_stops_on_shutdown() {
    let h = Harness::new();
    let scheduler = Arc::new(h.scheduler);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = scheduler.spawn(shutdown_rx);
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
