use std::sync::Arc;
use std::time::Duration;

use escrow_automation_retry::Cadence;
use escrow_automation_types::{
    AttemptState, EventKind, Payment, PaymentId, PaymentStatus, PaymentTrigger, TriggerSource,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    current_timestamp, AttemptReport, CustodySyncReport, DepositMonitor, DepositReport,
    EscrowCreationOrchestrator, FlowProgress, OrchestratorContext, OrchestratorError,
    PayoutBatchReport, PayoutProcessor,
};

/// Tally of one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Payments in `processing` with no ledger activity for the stuck threshold
    pub stuck: usize,
    pub errors: Vec<(PaymentId, String)>,
}

impl TickReport {
    fn tally(&mut self, report: &AttemptReport) {
        match report.state {
            AttemptState::Succeeded => self.succeeded += 1,
            AttemptState::Skipped => self.skipped += 1,
            _ => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deposits: DepositReport,
    pub quick: TickReport,
    pub steady: TickReport,
    pub custody: CustodySyncReport,
    pub payouts: PayoutBatchReport,
}

/// Drives every payment forward on timers
///
/// The steady timer retries escrow creation for payments stuck in `funded`/`processing`
/// with exponential backoff; the quick timer retries balance shortfalls at a fixed short
/// interval; the sweep timer detects deposits, activates custody and pays out.
pub struct RetryScheduler {
    ctx: Arc<OrchestratorContext>,
    deposits: DepositMonitor,
    escrow: EscrowCreationOrchestrator,
    payouts: PayoutProcessor,
}

impl RetryScheduler {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self {
            deposits: DepositMonitor::new(ctx.clone()),
            escrow: EscrowCreationOrchestrator::new(ctx.clone()),
            payouts: PayoutProcessor::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<OrchestratorContext> {
        &self.ctx
    }

    pub fn deposits(&self) -> &DepositMonitor {
        &self.deposits
    }

    pub fn escrow(&self) -> &EscrowCreationOrchestrator {
        &self.escrow
    }

    pub fn payouts(&self) -> &PayoutProcessor {
        &self.payouts
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TICKS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Retry escrow creation for payments whose backoff has elapsed or that look stuck
    pub async fn steady_tick(&self, now: u64) -> Result<TickReport, OrchestratorError> {
        let report = self
            .tick(Cadence::Steady, TriggerSource::SteadyRetry, now)
            .await?;
        self.ctx.metrics.set_stuck_payments(report.stuck);
        Ok(report)
    }

    /// Retry payments waiting on a balance at the quick interval
    pub async fn quick_tick(&self, now: u64) -> Result<TickReport, OrchestratorError> {
        self.tick(Cadence::Quick, TriggerSource::QuickRetry, now)
            .await
    }

    async fn tick(
        &self,
        cadence: Cadence,
        trigger: TriggerSource,
        now: u64,
    ) -> Result<TickReport, OrchestratorError> {
        let ctx = &self.ctx;
        let mut report = TickReport::default();

        for status in [PaymentStatus::Funded, PaymentStatus::Processing] {
            for payment in ctx.all_by_status(status).await? {
                report.examined += 1;
                let progress = match ctx.progress(payment.id).await {
                    Ok(progress) => progress,
                    Err(err) => {
                        report.errors.push((payment.id, err.to_string()));
                        continue;
                    }
                };

                let stuck = self.is_stuck(&payment, &progress, now);
                if stuck {
                    report.stuck += 1;
                }
                if !self.is_due(&payment, &progress, cadence, stuck, now) {
                    continue;
                }

                report.attempted += 1;
                match self.escrow.run(payment.id, trigger, now).await {
                    Ok(attempt) => report.tally(&attempt),
                    Err(err) => {
                        error!(payment_id = %payment.id, error = %err, "retry attempt aborted");
                        report.failed += 1;
                        report.errors.push((payment.id, err.to_string()));
                    }
                }
            }
        }

        if report.attempted > 0 {
            info!(
                trigger = %trigger,
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                "retry tick finished"
            );
        }
        Ok(report)
    }

    fn is_stuck(&self, payment: &Payment, progress: &FlowProgress, now: u64) -> bool {
        if payment.status != PaymentStatus::Processing {
            return false;
        }
        let last_activity = progress.last_event_at.unwrap_or(payment.updated_at);
        now.saturating_sub(last_activity) >= self.ctx.config.stuck_threshold_secs
    }

    fn is_due(
        &self,
        payment: &Payment,
        progress: &FlowProgress,
        cadence: Cadence,
        stuck: bool,
        now: u64,
    ) -> bool {
        let policy = &self.ctx.config.retry;
        match progress.last_failure {
            Some(failure) => {
                Cadence::for_class(failure.class) == cadence
                    && (policy.budget_exhausted(progress.consecutive_failures)
                        || policy.is_due(
                            failure.class,
                            progress.consecutive_failures,
                            failure.at,
                            now,
                        ))
            }
            // No failure on record: a funded payment nobody picked up, or an attempt
            // that died mid-flight without recording anything
            None => {
                cadence == Cadence::Steady
                    && (payment.status == PaymentStatus::Funded || stuck)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MANUAL RECOVERY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Operator-initiated retry of a single payment, allowed from `failed`
    pub async fn recover(
        &self,
        payment_id: PaymentId,
        operator: &str,
        now: u64,
    ) -> Result<AttemptReport, OrchestratorError> {
        let ctx = &self.ctx;
        let payment = ctx.payment(payment_id).await?;
        info!(
            payment_id = %payment_id,
            operator,
            status = %payment.status,
            "manual recovery requested"
        );

        if payment.status != PaymentStatus::Completed {
            ctx.exclusive(payment_id, now, || self.reopen(payment_id, operator, now))
                .await?;
        }

        self.dispatch(payment_id, TriggerSource::Manual, now).await
    }

    /// Record the request and move a failed payment back to where it can resume
    async fn reopen(
        &self,
        payment_id: PaymentId,
        operator: &str,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        let ctx = &self.ctx;
        let status = ctx.payment(payment_id).await?.status;
        ctx.record(
            payment_id,
            EventKind::ManualRecoveryRequested,
            format!("manual recovery requested by {operator}"),
            None,
            now,
        )
        .await?;

        if status == PaymentStatus::Failed {
            let resume = self.resume_target(payment_id).await?;
            ctx.transition(
                payment_id,
                PaymentStatus::Failed,
                PaymentTrigger::ManualRecovery { resume },
                now,
            )
            .await?;
        }
        Ok(())
    }

    /// Furthest point the payment had safely reached before it failed
    async fn resume_target(&self, payment_id: PaymentId) -> Result<PaymentStatus, OrchestratorError> {
        let progress = self.ctx.progress(payment_id).await?;
        if progress.redemption.is_confirmed() {
            return Ok(PaymentStatus::PayoutPending);
        }
        let on_chain = self
            .ctx
            .store
            .get_escrow(payment_id)
            .await?
            .is_some_and(|escrow| escrow.is_on_chain());
        Ok(if on_chain {
            PaymentStatus::Active
        } else {
            PaymentStatus::Funded
        })
    }

    /// Run whichever step the payment's status calls for
    pub async fn dispatch(
        &self,
        payment_id: PaymentId,
        trigger: TriggerSource,
        now: u64,
    ) -> Result<AttemptReport, OrchestratorError> {
        let payment = self.ctx.payment(payment_id).await?;
        match payment.status {
            PaymentStatus::Funded | PaymentStatus::Processing => {
                self.escrow.run(payment_id, trigger, now).await
            }
            PaymentStatus::Escrowed => self.payouts.activate(payment_id, trigger, now).await,
            _ => self.payouts.process_payment(payment_id, trigger, now).await,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SWEEPS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposits, custody activation and payouts
    pub async fn sweep_payouts(
        &self,
        now: u64,
    ) -> Result<(DepositReport, CustodySyncReport, PayoutBatchReport), OrchestratorError> {
        let deposits = match self.deposits.detect_deposits(now).await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "deposit detection failed");
                DepositReport::default()
            }
        };
        for payment_id in &deposits.funded {
            if let Err(err) = self
                .escrow
                .run(*payment_id, TriggerSource::Deposit, now)
                .await
            {
                error!(payment_id = %payment_id, error = %err, "escrow creation aborted");
            }
        }

        let custody = self.payouts.sync_custody(now).await?;
        let payouts = self.payouts.process_pending_payouts(now).await?;
        Ok((deposits, custody, payouts))
    }

    /// One pass of everything the timers do
    pub async fn sweep(&self, now: u64) -> Result<SweepReport, OrchestratorError> {
        let quick = self.quick_tick(now).await?;
        let steady = self.steady_tick(now).await?;
        let (deposits, custody, payouts) = self.sweep_payouts(now).await?;
        Ok(SweepReport {
            deposits,
            quick,
            steady,
            custody,
            payouts,
        })
    }

    /// Run the timers until `shutdown` flips to true
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let config = &self.ctx.config;
            let mut steady = ticker(config.steady_interval);
            let mut quick = ticker(config.quick_interval);
            let mut sweep = ticker(config.sweep_interval);

            info!(worker = %self.ctx.worker, "retry scheduler started");
            loop {
                tokio::select! {
                    _ = steady.tick() => {
                        if let Err(err) = self.steady_tick(current_timestamp()).await {
                            error!(error = %err, "steady retry tick failed");
                        }
                    }
                    _ = quick.tick() => {
                        if let Err(err) = self.quick_tick(current_timestamp()).await {
                            error!(error = %err, "quick retry tick failed");
                        }
                    }
                    _ = sweep.tick() => {
                        if let Err(err) = self.sweep_payouts(current_timestamp()).await {
                            error!(error = %err, "payout sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        debug!("shutdown signal changed but not set");
                    }
                }
            }
            info!("retry scheduler stopped");
        })
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
