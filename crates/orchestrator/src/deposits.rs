use std::collections::HashMap;
use std::sync::Arc;

use escrow_automation_adapters::{Operation, RailDeposit};
use escrow_automation_store::StoreError;
use escrow_automation_types::{
    Escrow, EventKind, ExternalTransaction, Payment, PaymentId, PaymentStatus, PaymentTrigger,
    RailTransactionKind, RailTransactionStatus, next_status,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::{OrchestratorContext, OrchestratorError};

/// A payment to open and issue a deposit account for
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub id: PaymentId,
    pub amount: Decimal,
    pub payout_account: String,
    /// Defaults to the configured custody percent
    pub custody_percent: Option<Decimal>,
    /// Defaults to the configured custody period
    pub custody_period_secs: Option<i64>,
}

impl PaymentRequest {
    pub fn new(id: PaymentId, amount: Decimal, payout_account: impl Into<String>) -> Self {
        Self {
            id,
            amount,
            payout_account: payout_account.into(),
            custody_percent: None,
            custody_period_secs: None,
        }
    }

    pub fn with_custody_percent(mut self, percent: Decimal) -> Self {
        self.custody_percent = Some(percent);
        self
    }

    pub fn with_custody_period(mut self, secs: i64) -> Self {
        self.custody_period_secs = Some(secs);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositReport {
    /// Payments moved to `funded` by this pass
    pub funded: Vec<PaymentId>,
    /// Deposits whose amount differs from the payment; left pending for review
    pub mismatched: Vec<PaymentId>,
    /// Completed deposits already recorded by an earlier pass
    pub already_recorded: usize,
    pub failed: Vec<(PaymentId, String)>,
}

/// Opens payments and matches completed rail deposits to them
pub struct DepositMonitor {
    ctx: Arc<OrchestratorContext>,
}

impl DepositMonitor {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self { ctx }
    }

    /// Create a pending payment with a freshly issued deposit account
    pub async fn open_payment(
        &self,
        request: PaymentRequest,
        now: u64,
    ) -> Result<Payment, OrchestratorError> {
        let ctx = &self.ctx;
        let percent = request
            .custody_percent
            .unwrap_or(ctx.config.default_custody_percent);
        let mut payment = Payment::new(
            request.id,
            request.amount,
            request.payout_account,
            percent,
            now,
        )?;
        if let Some(period) = request.custody_period_secs {
            payment = payment.with_custody_period(period);
        }

        let account = ctx
            .call_checked(
                Operation::IssueDepositAccount,
                ctx.fiat.issue_deposit_account(payment.id),
            )
            .await?;
        payment.deposit_account = Some(account);
        ctx.store.insert_payment(&payment).await?;

        info!(
            payment_id = %payment.id,
            amount = %payment.amount,
            deposit_account = payment.deposit_account.as_deref().unwrap_or_default(),
            "payment opened"
        );
        Ok(payment)
    }

    /// Match completed deposits to pending payments and fund them
    pub async fn detect_deposits(&self, now: u64) -> Result<DepositReport, OrchestratorError> {
        let ctx = &self.ctx;
        let deposits = ctx
            .call_checked(Operation::ListDeposits, ctx.fiat.list_deposits())
            .await?;
        let pending = ctx.all_by_status(PaymentStatus::Pending).await?;
        let by_account: HashMap<&str, &Payment> = pending
            .iter()
            .filter_map(|p| p.deposit_account.as_deref().map(|account| (account, p)))
            .collect();

        let mut report = DepositReport::default();
        for deposit in deposits
            .iter()
            .filter(|d| d.status == RailTransactionStatus::Completed)
        {
            let Some(payment) = by_account.get(deposit.account.as_str()) else {
                continue;
            };

            match self.fund(payment, deposit, now).await {
                Ok(true) => report.funded.push(payment.id),
                Ok(false) => report.already_recorded += 1,
                Err(OrchestratorError::InvalidTransition(err)) => {
                    warn!(
                        payment_id = %payment.id,
                        expected = %payment.amount,
                        received = %deposit.amount,
                        error = %err,
                        "deposit rejected; payment left pending"
                    );
                    report.mismatched.push(payment.id);
                }
                Err(err) => {
                    warn!(payment_id = %payment.id, error = %err, "failed to record deposit");
                    report.failed.push((payment.id, err.to_string()));
                }
            }
        }

        if !report.funded.is_empty() {
            info!(funded = report.funded.len(), "deposits detected");
        }
        Ok(report)
    }

    /// Returns false when the deposit was already recorded
    async fn fund(
        &self,
        payment: &Payment,
        deposit: &RailDeposit,
        now: u64,
    ) -> Result<bool, OrchestratorError> {
        let ctx = &self.ctx;
        if ctx
            .store
            .get_external_transaction(&deposit.external_ref)
            .await?
            .is_some()
        {
            debug!(external_ref = %deposit.external_ref, "deposit already recorded");
            return Ok(false);
        }

        let trigger = PaymentTrigger::DepositConfirmed {
            expected: payment.amount,
            received: deposit.amount,
        };
        // Amount mismatches are rejected before anything is written
        next_status(payment.status, &trigger)?;

        let period = payment
            .custody_period_secs
            .unwrap_or(ctx.config.default_custody_period_secs);
        match ctx
            .store
            .insert_escrow(&Escrow::pending_for(payment, period, now))
            .await
        {
            Ok(()) | Err(StoreError::DuplicateId(_)) => {}
            Err(err) => return Err(err.into()),
        }

        ctx.record(
            payment.id,
            EventKind::DepositDetected,
            format!("deposit of {} received on {}", deposit.amount, deposit.account),
            Some(&deposit.external_ref),
            now,
        )
        .await?;
        ctx.transition(payment.id, PaymentStatus::Pending, trigger, now)
            .await?;

        ctx.store
            .upsert_external_transaction(&ExternalTransaction::new(
                deposit.external_ref.as_str(),
                RailTransactionKind::Deposit,
                Some(payment.id),
                deposit.amount,
                RailTransactionStatus::Completed,
                now,
            ))
            .await?;

        let mut funded = ctx.payment(payment.id).await?;
        funded.external_reference = Some(deposit.external_ref.clone());
        funded.updated_at = now;
        ctx.store.update_payment(&funded).await?;

        Ok(true)
    }
}
