use std::future::Future;
use std::sync::Arc;

use escrow_automation_adapters::{AdapterError, ChainEscrowStatus, Operation};
use escrow_automation_types::{
    DisputeStatus, Escrow, EscrowStatus, EventKind, ExternalTransaction, Payment, PaymentId,
    PaymentStatus, PaymentTrigger, RailTransactionKind, RailTransactionStatus, TransitionError,
    TriggerSource,
};
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::{
    classify_adapter_error, AttemptReport, FlowProgress, OrchestratorContext, OrchestratorError,
    RailStep,
};

const PAYOUT_ELIGIBLE: [PaymentStatus; 2] = [PaymentStatus::Active, PaymentStatus::PayoutPending];

/// How an operator settles a dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Dispute dismissed; custody continues towards release
    ResumeCustody,
    /// Payment abandoned; left in `failed` for manual handling of the funds
    Cancel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustodySyncReport {
    pub activated: Vec<PaymentId>,
    pub failed: Vec<(PaymentId, String)>,
}

/// Result of one payout sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayoutBatchReport {
    /// Payments whose attempt succeeded (completed, or nothing left to do yet)
    pub processed: Vec<PaymentId>,
    pub failed: Vec<(PaymentId, String)>,
    pub skipped: usize,
}

impl PayoutBatchReport {
    pub fn total(&self) -> usize {
        self.processed.len() + self.failed.len() + self.skipped
    }
}

/// Describes one idempotent rail step (redemption, payout or direct payout)
struct RailPlan {
    operation: Operation,
    kind: RailTransactionKind,
    initiated: EventKind,
    confirmed: EventKind,
    failed: EventKind,
    amount: Decimal,
    key: String,
}

/// Post-escrow half of the flow: custody activation, release, redemption and payout
pub struct PayoutProcessor {
    ctx: Arc<OrchestratorContext>,
}

impl PayoutProcessor {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self { ctx }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CUSTODY ACTIVATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move `escrowed` payments whose escrow the chain reports active to `active`
    pub async fn sync_custody(&self, now: u64) -> Result<CustodySyncReport, OrchestratorError> {
        let escrowed = self.ctx.all_by_status(PaymentStatus::Escrowed).await?;

        let mut report = CustodySyncReport::default();
        for payment in escrowed {
            match self.activate(payment.id, TriggerSource::PayoutSweep, now).await {
                Ok(attempt) if attempt.status == PaymentStatus::Active => {
                    report.activated.push(payment.id);
                }
                Ok(attempt) if attempt.failure.is_some() => {
                    report
                        .failed
                        .push((payment.id, attempt.detail.unwrap_or_default()));
                }
                Ok(_) => {}
                Err(err) => {
                    error!(payment_id = %payment.id, error = %err, "custody activation failed");
                    report.failed.push((payment.id, err.to_string()));
                }
            }
        }
        Ok(report)
    }

    pub async fn activate(
        &self,
        payment_id: PaymentId,
        trigger: TriggerSource,
        now: u64,
    ) -> Result<AttemptReport, OrchestratorError> {
        self.ctx
            .attempt(payment_id, trigger, now, &[PaymentStatus::Escrowed], || {
                self.drive_activation(payment_id, now)
            })
            .await
    }

    async fn drive_activation(
        &self,
        payment_id: PaymentId,
        now: u64,
    ) -> Result<PaymentStatus, OrchestratorError> {
        let ctx = &self.ctx;
        let payment = ctx.payment(payment_id).await?;
        if payment.status != PaymentStatus::Escrowed {
            return Ok(payment.status);
        }

        let escrow = ctx.escrow(payment_id).await?;
        let onchain_id = onchain_id(&escrow)?;
        let chain_status = ctx
            .call_checked(Operation::GetStatus, ctx.chain.get_status(&onchain_id))
            .await?;

        match chain_status {
            ChainEscrowStatus::Active => {
                let progress = ctx.progress(payment_id).await?;
                self.pay_direct_share(&payment, &escrow, &progress, now)
                    .await?;
                ctx.record(
                    payment_id,
                    EventKind::CustodyActivated,
                    format!(
                        "custody running until {}",
                        escrow.custody_end.unwrap_or_default()
                    ),
                    Some(&onchain_id),
                    now,
                )
                .await?;
                ctx.transition(
                    payment_id,
                    PaymentStatus::Escrowed,
                    PaymentTrigger::CustodyActivated,
                    now,
                )
                .await
            }
            ChainEscrowStatus::Pending => {
                debug!(onchain_escrow_id = %onchain_id, "escrow funding not final yet");
                Ok(PaymentStatus::Escrowed)
            }
            other => Err(OrchestratorError::DataIntegrityFault(format!(
                "chain reports escrow {onchain_id} as {other:?} while the payment is escrowed"
            ))),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RELEASE AND PAYOUT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Allow release before the custody deadline
    pub async fn authorize_release(
        &self,
        payment_id: PaymentId,
        actor: &str,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        self.ctx
            .exclusive(payment_id, now, || {
                self.record_release_authorization(payment_id, actor, now)
            })
            .await
    }

    async fn record_release_authorization(
        &self,
        payment_id: PaymentId,
        actor: &str,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        let payment = self.ctx.payment(payment_id).await?;
        if payment.status != PaymentStatus::Active {
            return Err(OrchestratorError::InvalidTransition(
                TransitionError::InvalidTransition {
                    from: payment.status,
                    trigger: "release_authorized",
                },
            ));
        }
        if self.ctx.progress(payment_id).await?.release_authorized {
            debug!(payment_id = %payment_id, "release already authorized");
            return Ok(());
        }

        self.ctx
            .record(
                payment_id,
                EventKind::ReleaseAuthorized,
                format!("early release authorized by {actor}"),
                None,
                now,
            )
            .await?;
        info!(payment_id = %payment_id, actor, "early release authorized");
        Ok(())
    }

    /// Whether an `active` payment may be released at `now`
    fn release_due(escrow: &Escrow, progress: &FlowProgress, now: u64) -> bool {
        escrow.custody_elapsed(now) || progress.release_authorized
    }

    /// Run one release/redeem/payout attempt for a single payment
    pub async fn process_payment(
        &self,
        payment_id: PaymentId,
        trigger: TriggerSource,
        now: u64,
    ) -> Result<AttemptReport, OrchestratorError> {
        self.ctx
            .attempt(payment_id, trigger, now, &PAYOUT_ELIGIBLE, || {
                self.drive_payout(payment_id, now)
            })
            .await
    }

    /// Process every payment whose custody has elapsed or whose release was authorized
    ///
    /// Payments already in `payout_pending` go first, then due `active` payments oldest
    /// first; at most `payout_batch_size` are attempted per sweep. Payments are processed
    /// concurrently; one payment's failure never stops the others.
    pub async fn process_pending_payouts(
        &self,
        now: u64,
    ) -> Result<PayoutBatchReport, OrchestratorError> {
        let ctx = &self.ctx;
        let limit = ctx.config.payout_batch_size;
        let mut report = PayoutBatchReport::default();

        let mut candidates: Vec<PaymentId> = ctx
            .all_by_status(PaymentStatus::PayoutPending)
            .await?
            .iter()
            .map(|payment| payment.id)
            .collect();
        for payment in ctx.all_by_status(PaymentStatus::Active).await? {
            if candidates.len() >= limit {
                break;
            }
            match self.is_due(&payment, now).await {
                Ok(true) => candidates.push(payment.id),
                Ok(false) => {}
                Err(err) => report.failed.push((payment.id, err.to_string())),
            }
        }
        candidates.truncate(limit);

        if candidates.is_empty() {
            debug!("no payouts due");
            return Ok(report);
        }

        let attempts = join_all(
            candidates
                .iter()
                .map(|id| self.process_payment(*id, TriggerSource::PayoutSweep, now)),
        )
        .await;

        for (payment_id, result) in candidates.into_iter().zip(attempts) {
            match result {
                Ok(attempt) if attempt.succeeded() => report.processed.push(payment_id),
                Ok(attempt) if attempt.skipped() => report.skipped += 1,
                Ok(attempt) => report.failed.push((
                    payment_id,
                    attempt.detail.unwrap_or_else(|| attempt.state.to_string()),
                )),
                Err(err) => {
                    error!(payment_id = %payment_id, error = %err, "payout attempt aborted");
                    report.failed.push((payment_id, err.to_string()));
                }
            }
        }

        ctx.metrics
            .record_payout_batch(report.processed.len(), report.failed.len());
        info!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "payout sweep finished"
        );
        Ok(report)
    }

    async fn is_due(&self, payment: &Payment, now: u64) -> Result<bool, OrchestratorError> {
        let escrow = self.ctx.escrow(payment.id).await?;
        let progress = self.ctx.progress(payment.id).await?;
        Ok(Self::release_due(&escrow, &progress, now))
    }

    async fn drive_payout(
        &self,
        payment_id: PaymentId,
        now: u64,
    ) -> Result<PaymentStatus, OrchestratorError> {
        let ctx = &self.ctx;
        let payment = ctx.payment(payment_id).await?;
        let mut escrow = ctx.escrow(payment_id).await?;
        let progress = ctx.progress(payment_id).await?;

        match payment.status {
            PaymentStatus::Active => {
                if !Self::release_due(&escrow, &progress, now) {
                    debug!(custody_end = escrow.custody_end, "custody still running");
                    return Ok(PaymentStatus::Active);
                }
                // A payment resumed into `active` by recovery may not have had its share yet
                self.pay_direct_share(&payment, &escrow, &progress, now)
                    .await?;
                self.release_on_chain(&mut escrow, &progress, now).await?;
                self.redeem(&escrow, &progress, now).await?;
                ctx.transition(
                    payment_id,
                    PaymentStatus::Active,
                    PaymentTrigger::RedemptionConfirmed,
                    now,
                )
                .await?;
                self.pay_out(&payment, escrow, &progress, now).await
            }
            PaymentStatus::PayoutPending => self.pay_out(&payment, escrow, &progress, now).await,
            other => Ok(other),
        }
    }

    async fn release_on_chain(
        &self,
        escrow: &mut Escrow,
        progress: &FlowProgress,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        if progress.release_tx.is_some() {
            return Ok(());
        }

        let ctx = &self.ctx;
        let onchain_id = onchain_id(escrow)?;
        let chain_status = ctx
            .call_checked(Operation::GetStatus, ctx.chain.get_status(&onchain_id))
            .await?;

        let tx_hash = match chain_status {
            ChainEscrowStatus::Released => {
                info!(onchain_escrow_id = %onchain_id, "escrow already released on chain");
                escrow.release_tx_hash.clone()
            }
            ChainEscrowStatus::Active => {
                match ctx
                    .call(Operation::Release, ctx.chain.release(&onchain_id))
                    .await
                {
                    Ok(tx_hash) => Some(tx_hash),
                    Err(AdapterError::Duplicate { existing_ref }) => {
                        ctx.record(
                            escrow.payment_id,
                            EventKind::DuplicateOperation,
                            format!("escrow {onchain_id} already released"),
                            Some(&existing_ref),
                            now,
                        )
                        .await?;
                        Some(existing_ref)
                    }
                    Err(err) => return Err(classify_adapter_error(Operation::Release, err)),
                }
            }
            ChainEscrowStatus::Pending => {
                return Err(OrchestratorError::TransientAdapterFailure {
                    operation: Operation::GetStatus,
                    reason: format!("escrow {onchain_id} funding not final"),
                    outcome_unknown: false,
                });
            }
            ChainEscrowStatus::Disputed => {
                return Err(OrchestratorError::DataIntegrityFault(format!(
                    "escrow {onchain_id} is disputed on chain while the payment is active"
                )));
            }
        };

        if escrow.status == EscrowStatus::Active {
            escrow.status = escrow.status.transition(EscrowStatus::Released)?;
        }
        escrow.release_tx_hash = tx_hash.clone();
        escrow.updated_at = now;
        ctx.store.update_escrow(escrow).await?;
        ctx.record(
            escrow.payment_id,
            EventKind::EscrowReleased,
            format!("escrow {onchain_id} released"),
            tx_hash.as_deref(),
            now,
        )
        .await?;
        Ok(())
    }

    /// Pay out the share of the payment that never went into custody
    async fn pay_direct_share(
        &self,
        payment: &Payment,
        escrow: &Escrow,
        progress: &FlowProgress,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        let amount = payment.amount - escrow.custody_amount;
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let plan = RailPlan {
            operation: Operation::Payout,
            kind: RailTransactionKind::Payout,
            initiated: EventKind::DirectPayoutInitiated,
            confirmed: EventKind::DirectPayoutConfirmed,
            failed: EventKind::DirectPayoutFailed,
            amount,
            key: progress.direct_payout_key(payment.id),
        };
        let submit = self
            .ctx
            .fiat
            .payout(plan.amount, &payment.payout_account, &plan.key);
        self.run_rail_step(payment.id, &progress.direct_payout, &plan, now, submit)
            .await
    }

    async fn redeem(
        &self,
        escrow: &Escrow,
        progress: &FlowProgress,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        let plan = RailPlan {
            operation: Operation::Redeem,
            kind: RailTransactionKind::Redemption,
            initiated: EventKind::RedemptionInitiated,
            confirmed: EventKind::RedemptionConfirmed,
            failed: EventKind::RedemptionFailed,
            amount: escrow.release_amount,
            key: progress.redemption_key(escrow.payment_id),
        };
        let submit = self.ctx.fiat.redeem(plan.amount, &plan.key);
        self.run_rail_step(escrow.payment_id, &progress.redemption, &plan, now, submit)
            .await
    }

    async fn pay_out(
        &self,
        payment: &Payment,
        mut escrow: Escrow,
        progress: &FlowProgress,
        now: u64,
    ) -> Result<PaymentStatus, OrchestratorError> {
        let ctx = &self.ctx;
        let plan = RailPlan {
            operation: Operation::Payout,
            kind: RailTransactionKind::Payout,
            initiated: EventKind::PayoutInitiated,
            confirmed: EventKind::PayoutConfirmed,
            failed: EventKind::PayoutFailed,
            amount: escrow.release_amount,
            key: progress.payout_key(payment.id),
        };
        let submit = ctx
            .fiat
            .payout(plan.amount, &payment.payout_account, &plan.key);
        self.run_rail_step(payment.id, &progress.payout, &plan, now, submit)
            .await?;

        if escrow.status == EscrowStatus::Released {
            escrow.status = escrow.status.transition(EscrowStatus::Completed)?;
            escrow.updated_at = now;
            ctx.store.update_escrow(&escrow).await?;
        }

        let status = ctx
            .transition(
                payment.id,
                PaymentStatus::PayoutPending,
                PaymentTrigger::PayoutConfirmed,
                now,
            )
            .await?;
        info!(
            payment_id = %payment.id,
            amount = %plan.amount,
            payout_account = %payment.payout_account,
            "payout completed"
        );
        Ok(status)
    }

    /// Submit (once) and confirm an idempotent rail transaction
    ///
    /// `submit` is only awaited when the ledger shows no earlier submission. A transfer the
    /// rail settles as failed is recorded under `plan.failed`, which moves the next attempt
    /// to a fresh idempotency key.
    async fn run_rail_step<F>(
        &self,
        payment_id: PaymentId,
        step: &RailStep,
        plan: &RailPlan,
        now: u64,
        submit: F,
    ) -> Result<(), OrchestratorError>
    where
        F: Future<Output = Result<String, AdapterError>>,
    {
        let ctx = &self.ctx;
        let reference = match step {
            RailStep::Confirmed { .. } => return Ok(()),
            RailStep::Initiated { reference } => reference.clone(),
            RailStep::NotStarted => {
                let reference = match ctx.call(plan.operation, submit).await {
                    Ok(reference) => reference,
                    Err(AdapterError::Duplicate { existing_ref }) => {
                        ctx.record(
                            payment_id,
                            EventKind::DuplicateOperation,
                            format!("{} {} already submitted", plan.operation, plan.key),
                            Some(&existing_ref),
                            now,
                        )
                        .await?;
                        existing_ref
                    }
                    Err(err) => return Err(classify_adapter_error(plan.operation, err)),
                };
                ctx.store
                    .upsert_external_transaction(&ExternalTransaction::new(
                        reference.as_str(),
                        plan.kind,
                        Some(payment_id),
                        plan.amount,
                        RailTransactionStatus::Pending,
                        now,
                    ))
                    .await?;
                ctx.record(
                    payment_id,
                    plan.initiated,
                    format!("{} of {} initiated", plan.kind.as_str(), plan.amount),
                    Some(&reference),
                    now,
                )
                .await?;
                reference
            }
        };

        let transfer = ctx
            .call_checked(Operation::GetTransaction, ctx.fiat.get_transaction(&reference))
            .await?;
        let mirror = ExternalTransaction::new(
            reference.as_str(),
            plan.kind,
            Some(payment_id),
            plan.amount,
            transfer.status,
            now,
        );

        match transfer.status {
            RailTransactionStatus::Completed => {
                ctx.store.upsert_external_transaction(&mirror).await?;
                ctx.record(
                    payment_id,
                    plan.confirmed,
                    format!("{} {reference} settled", plan.kind.as_str()),
                    Some(&reference),
                    now,
                )
                .await?;
                Ok(())
            }
            RailTransactionStatus::Pending => Err(OrchestratorError::TransientAdapterFailure {
                operation: plan.operation,
                reason: format!("{reference} not settled yet"),
                outcome_unknown: false,
            }),
            RailTransactionStatus::Failed => {
                warn!(reference = %reference, kind = plan.kind.as_str(), "rail transaction failed");
                ctx.store.upsert_external_transaction(&mirror).await?;
                Err(OrchestratorError::RailTransferFailed {
                    kind: plan.kind,
                    failed: plan.failed,
                    external_ref: reference,
                })
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DISPUTES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Freeze a payment and its escrow until an operator resolves the dispute
    pub async fn raise_dispute(
        &self,
        payment_id: PaymentId,
        reason: &str,
        now: u64,
    ) -> Result<PaymentStatus, OrchestratorError> {
        self.ctx
            .exclusive(payment_id, now, || self.open_dispute(payment_id, reason, now))
            .await
    }

    async fn open_dispute(
        &self,
        payment_id: PaymentId,
        reason: &str,
        now: u64,
    ) -> Result<PaymentStatus, OrchestratorError> {
        let ctx = &self.ctx;
        let payment = ctx.payment(payment_id).await?;
        let mut escrow = ctx.escrow(payment_id).await?;

        let status = ctx
            .transition(payment_id, payment.status, PaymentTrigger::DisputeRaised, now)
            .await?;

        if escrow.status == EscrowStatus::Active {
            escrow.status = escrow.status.transition(EscrowStatus::Disputed)?;
        }
        escrow.dispute_status = DisputeStatus::Open;
        escrow.updated_at = now;
        ctx.store.update_escrow(&escrow).await?;

        ctx.record(payment_id, EventKind::DisputeRaised, reason, None, now)
            .await?;
        warn!(payment_id = %payment_id, reason, "dispute raised");
        Ok(status)
    }

    pub async fn resolve_dispute(
        &self,
        payment_id: PaymentId,
        resolution: Resolution,
        now: u64,
    ) -> Result<PaymentStatus, OrchestratorError> {
        self.ctx
            .exclusive(payment_id, now, || {
                self.settle_dispute(payment_id, resolution, now)
            })
            .await
    }

    async fn settle_dispute(
        &self,
        payment_id: PaymentId,
        resolution: Resolution,
        now: u64,
    ) -> Result<PaymentStatus, OrchestratorError> {
        let ctx = &self.ctx;
        let payment = ctx.payment(payment_id).await?;
        if payment.status != PaymentStatus::Disputed {
            return Err(OrchestratorError::InvalidTransition(
                TransitionError::InvalidTransition {
                    from: payment.status,
                    trigger: "dispute_resolved",
                },
            ));
        }
        let mut escrow = ctx.escrow(payment_id).await?;

        match resolution {
            Resolution::ResumeCustody => {
                if !escrow.is_on_chain() {
                    return Err(OrchestratorError::DataIntegrityFault(format!(
                        "cannot resume custody: escrow {} was never created on chain",
                        escrow.id
                    )));
                }
                if escrow.status == EscrowStatus::Disputed {
                    escrow.status = escrow.status.transition(EscrowStatus::Active)?;
                }
                escrow.dispute_status = DisputeStatus::Resolved;
                escrow.updated_at = now;
                ctx.store.update_escrow(&escrow).await?;
                ctx.record(
                    payment_id,
                    EventKind::DisputeResolved,
                    "dispute dismissed; custody resumed",
                    None,
                    now,
                )
                .await?;
                ctx.transition(
                    payment_id,
                    PaymentStatus::Disputed,
                    PaymentTrigger::DisputeResolved,
                    now,
                )
                .await
            }
            Resolution::Cancel => {
                if matches!(escrow.status, EscrowStatus::Pending | EscrowStatus::Disputed) {
                    escrow.status = escrow.status.transition(EscrowStatus::Failed)?;
                }
                escrow.dispute_status = DisputeStatus::Resolved;
                escrow.updated_at = now;
                ctx.store.update_escrow(&escrow).await?;
                ctx.record(
                    payment_id,
                    EventKind::DisputeResolved,
                    "dispute upheld; payment cancelled",
                    None,
                    now,
                )
                .await?;
                ctx.fail_payment(payment_id, "cancelled by dispute resolution", now)
                    .await?;
                Ok(PaymentStatus::Failed)
            }
        }
    }
}

fn onchain_id(escrow: &Escrow) -> Result<String, OrchestratorError> {
    escrow.onchain_escrow_id.clone().ok_or_else(|| {
        OrchestratorError::DataIntegrityFault(format!(
            "escrow {} has no on-chain id",
            escrow.id
        ))
    })
}
