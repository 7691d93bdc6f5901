use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use escrow_automation_adapters::{with_deadline, AdapterError, EscrowChain, FiatRail, Operation};
use escrow_automation_metrics::{AttemptSpan, MetricsCollector, WorkerId};
use escrow_automation_store::{EventLedger, PaymentStore, ScanCursor};
use escrow_automation_types::{
    AttemptEvent, AttemptState, Escrow, Event, EventKind, FailureClass, NewEvent, Payment,
    PaymentId, PaymentStatus, PaymentTrigger, TransitionError, TriggerSource, next_status,
};
use tracing::{debug, error, info, warn, Instrument};

use crate::{classify_adapter_error, FlowProgress, OrchestratorConfig, OrchestratorError};

/// Persistence the orchestrators need: durable records plus the event ledger
pub trait Store: PaymentStore + EventLedger {}

impl<T: PaymentStore + EventLedger + ?Sized> Store for T {}

/// Outcome of one orchestration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub payment_id: PaymentId,
    pub trigger: TriggerSource,
    pub state: AttemptState,
    /// Payment status after the attempt
    pub status: PaymentStatus,
    pub failure: Option<FailureClass>,
    pub detail: Option<String>,
}

impl AttemptReport {
    pub fn succeeded(&self) -> bool {
        self.state == AttemptState::Succeeded
    }

    pub fn skipped(&self) -> bool {
        self.state == AttemptState::Skipped
    }
}

/// Shared services of the escrow creation orchestrator, payout processor and scheduler
///
/// Holds no per-payment state; everything about a payment's progress is read back from
/// the store and the ledger on every attempt.
pub struct OrchestratorContext {
    pub store: Arc<dyn Store>,
    pub fiat: Arc<dyn FiatRail>,
    pub chain: Arc<dyn EscrowChain>,
    pub metrics: MetricsCollector,
    pub config: OrchestratorConfig,
    pub worker: WorkerId,
    lease_seq: AtomicU64,
}

impl OrchestratorContext {
    pub fn new(
        store: Arc<dyn Store>,
        fiat: Arc<dyn FiatRail>,
        chain: Arc<dyn EscrowChain>,
        config: OrchestratorConfig,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            store,
            fiat,
            chain,
            metrics,
            config,
            worker: WorkerId::generate(),
            lease_seq: AtomicU64::new(0),
        }
    }

    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.worker = worker;
        self
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn payment(&self, payment_id: PaymentId) -> Result<Payment, OrchestratorError> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or(OrchestratorError::PaymentNotFound(payment_id))
    }

    pub async fn escrow(&self, payment_id: PaymentId) -> Result<Escrow, OrchestratorError> {
        self.store
            .get_escrow(payment_id)
            .await?
            .ok_or(OrchestratorError::EscrowMissing(payment_id))
    }

    pub async fn progress(&self, payment_id: PaymentId) -> Result<FlowProgress, OrchestratorError> {
        let events = self.store.events_for(payment_id).await?;
        Ok(FlowProgress::from_events(&events))
    }

    pub async fn events(&self, payment_id: PaymentId) -> Result<Vec<Event>, OrchestratorError> {
        Ok(self.store.events_for(payment_id).await?)
    }

    /// Every payment in `status`, oldest first, read in pages of `scan_limit`
    pub async fn all_by_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<Payment>, OrchestratorError> {
        let page_size = self.config.scan_limit.max(1);
        let mut payments = Vec::new();
        let mut after = None;
        loop {
            let page = self
                .store
                .list_by_status_after(status, after, page_size)
                .await?;
            let last_page = page.len() < page_size;
            after = page.last().map(ScanCursor::after);
            payments.extend(page);
            if last_page {
                break;
            }
        }
        Ok(payments)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ADAPTER CALLS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run an adapter call under the configured deadline, counting failures
    ///
    /// `Duplicate` replies are passed through untouched; callers treat them as success.
    pub async fn call<T, F>(&self, operation: Operation, call: F) -> Result<T, AdapterError>
    where
        F: Future<Output = Result<T, AdapterError>>,
    {
        let result = with_deadline(self.config.call_timeout, operation, call).await;
        if let Err(err) = &result {
            if !matches!(err, AdapterError::Duplicate { .. }) {
                let class = classify_adapter_error(operation, err.clone()).class();
                self.metrics.record_adapter_failure(operation.adapter(), class);
            }
        }
        result
    }

    /// Adapter call where every error, duplicates included, is a failure
    pub async fn call_checked<T, F>(
        &self,
        operation: Operation,
        call: F,
    ) -> Result<T, OrchestratorError>
    where
        F: Future<Output = Result<T, AdapterError>>,
    {
        self.call(operation, call)
            .await
            .map_err(|err| classify_adapter_error(operation, err))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LEDGER AND TRANSITIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Append a ledger entry
    pub async fn record(
        &self,
        payment_id: PaymentId,
        kind: EventKind,
        description: impl Into<String>,
        reference: Option<&str>,
        now: u64,
    ) -> Result<Event, OrchestratorError> {
        let mut event = NewEvent::new(payment_id, kind, description, now);
        if let Some(reference) = reference {
            event = event.with_reference(reference);
        }
        let event = self.store.append(event).await?;
        debug!(
            payment_id = %payment_id,
            kind = %kind,
            sequence = event.sequence,
            "ledger entry appended"
        );
        Ok(event)
    }

    /// Apply `trigger` to a payment currently in `current`
    ///
    /// The state machine decides the target; the store commits it only if the payment is
    /// still in `current`. Losing that race is reported as an invalid transition.
    pub async fn transition(
        &self,
        payment_id: PaymentId,
        current: PaymentStatus,
        trigger: PaymentTrigger,
        now: u64,
    ) -> Result<PaymentStatus, OrchestratorError> {
        let next = next_status(current, &trigger)?;

        if !self
            .store
            .compare_and_set_status(payment_id, current, next, now)
            .await?
        {
            let stored = self.payment(payment_id).await?.status;
            warn!(
                payment_id = %payment_id,
                expected = %current,
                stored = %stored,
                trigger = trigger.name(),
                "status changed concurrently; transition dropped"
            );
            return Err(OrchestratorError::InvalidTransition(
                TransitionError::InvalidTransition {
                    from: stored,
                    trigger: trigger.name(),
                },
            ));
        }

        self.record(
            payment_id,
            EventKind::StatusChanged,
            format!("{current} -> {next}"),
            None,
            now,
        )
        .await?;
        self.metrics.record_transition(current, next);
        info!(
            payment_id = %payment_id,
            from = %current,
            to = %next,
            trigger = trigger.name(),
            "payment status changed"
        );
        Ok(next)
    }

    /// Move a payment to `failed`, leaving it for manual recovery
    pub async fn fail_payment(
        &self,
        payment_id: PaymentId,
        reason: &str,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        let payment = self.payment(payment_id).await?;
        if payment.status.is_terminal() {
            return Ok(());
        }
        self.record(payment_id, EventKind::PaymentFailed, reason, None, now)
            .await?;
        self.transition(payment_id, payment.status, PaymentTrigger::Fault, now)
            .await?;
        error!(payment_id = %payment_id, reason, "payment failed; manual recovery required");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ATTEMPTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn lease_owner(&self) -> String {
        let seq = self.lease_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}#{seq}", self.worker)
    }

    /// Take the payment's lease under a fresh owner; `None` when someone else holds it
    async fn claim(
        &self,
        payment: &Payment,
        now: u64,
    ) -> Result<Option<String>, OrchestratorError> {
        let owner = self.lease_owner();
        let claimed = !payment.is_claimed_by_other(&owner, now)
            && self
                .store
                .try_claim(payment.id, &owner, now, self.config.lease_ttl_secs)
                .await?;
        Ok(claimed.then_some(owner))
    }

    async fn unclaim(&self, payment_id: PaymentId, owner: &str) {
        if let Err(err) = self.store.release_claim(payment_id, owner).await {
            warn!(
                payment_id = %payment_id,
                error = %err,
                "failed to release lease; it will expire"
            );
        }
    }

    /// Run an operator action under the payment's lease
    ///
    /// A lease held elsewhere fails the call with `LeaseHeld`; nothing is written.
    pub async fn exclusive<T, F, Fut>(
        &self,
        payment_id: PaymentId,
        now: u64,
        action: F,
    ) -> Result<T, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let payment = self.payment(payment_id).await?;
        let Some(owner) = self.claim(&payment, now).await? else {
            warn!(payment_id = %payment_id, "lease held by another attempt; action refused");
            return Err(OrchestratorError::LeaseHeld(payment_id));
        };

        let result = match self.note_reclaimed_lease(&payment, now).await {
            Ok(()) => action().await,
            Err(err) => Err(err),
        };
        self.unclaim(payment_id, &owner).await;
        result
    }

    /// Run one attempt on a payment under its lease
    ///
    /// Payments outside `eligible` and payments leased by another attempt are skipped.
    /// Adapter failures are recorded in the ledger and counted against the retry budget;
    /// store errors and invalid transitions are returned to the caller.
    pub async fn attempt<F, Fut>(
        &self,
        payment_id: PaymentId,
        trigger: TriggerSource,
        now: u64,
        eligible: &[PaymentStatus],
        drive: F,
    ) -> Result<AttemptReport, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PaymentStatus, OrchestratorError>>,
    {
        let span = AttemptSpan::new(payment_id, trigger, self.worker.clone()).span();
        self.attempt_inner(payment_id, trigger, now, eligible, drive)
            .instrument(span)
            .await
    }

    async fn attempt_inner<F, Fut>(
        &self,
        payment_id: PaymentId,
        trigger: TriggerSource,
        now: u64,
        eligible: &[PaymentStatus],
        drive: F,
    ) -> Result<AttemptReport, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PaymentStatus, OrchestratorError>>,
    {
        let started = Instant::now();
        let state = AttemptState::Scheduled;
        let payment = self.payment(payment_id).await?;

        if !eligible.contains(&payment.status) {
            debug!(status = %payment.status, "payment not eligible; skipping");
            let state = state.advance(AttemptEvent::Skip)?;
            return Ok(self.finish(
                started,
                AttemptReport {
                    payment_id,
                    trigger,
                    state,
                    status: payment.status,
                    failure: None,
                    detail: Some(format!("nothing to do in {}", payment.status)),
                },
            ));
        }

        let Some(owner) = self.claim(&payment, now).await? else {
            debug!("lease held by another attempt; skipping");
            let state = state.advance(AttemptEvent::Skip)?;
            return Ok(self.finish(
                started,
                AttemptReport {
                    payment_id,
                    trigger,
                    state,
                    status: payment.status,
                    failure: None,
                    detail: Some("lease held by another attempt".to_string()),
                },
            ));
        };

        let state = state.advance(AttemptEvent::Start)?;
        let result = match self.note_reclaimed_lease(&payment, now).await {
            Ok(()) => drive().await,
            Err(err) => Err(err),
        };

        self.unclaim(payment_id, &owner).await;

        match result {
            Ok(status) => {
                let state = state.advance(AttemptEvent::Succeed)?;
                info!(status = %status, "attempt succeeded");
                Ok(self.finish(
                    started,
                    AttemptReport {
                        payment_id,
                        trigger,
                        state,
                        status,
                        failure: None,
                        detail: None,
                    },
                ))
            }
            Err(err) => {
                self.after_failure(payment_id, trigger, state, err, now, started)
                    .await
            }
        }
    }

    async fn note_reclaimed_lease(&self, payment: &Payment, now: u64) -> Result<(), OrchestratorError> {
        if let Some(previous) = payment.lease.as_ref().filter(|lease| lease.is_expired(now)) {
            warn!(
                previous_owner = %previous.owner,
                expired_at = previous.expires_at,
                "reclaimed abandoned lease"
            );
            self.record(
                payment.id,
                EventKind::LeaseReclaimed,
                format!("lease of {} expired at {}", previous.owner, previous.expires_at),
                None,
                now,
            )
            .await?;
        }
        Ok(())
    }

    async fn after_failure(
        &self,
        payment_id: PaymentId,
        trigger: TriggerSource,
        state: AttemptState,
        err: OrchestratorError,
        now: u64,
        started: Instant,
    ) -> Result<AttemptReport, OrchestratorError> {
        match &err {
            OrchestratorError::InvalidTransition(_)
            | OrchestratorError::PaymentNotFound(_)
            | OrchestratorError::InvalidPayment(_)
            | OrchestratorError::Store(_) => {
                let event = if err.is_retryable() {
                    AttemptEvent::FailRetryable
                } else {
                    AttemptEvent::FailTerminal
                };
                let state = state.advance(event)?;
                error!(error = %err, "attempt aborted");
                self.metrics
                    .record_attempt(trigger, state, started.elapsed());
                return Err(err);
            }
            _ => {}
        }

        let class = err.class();
        let reason = err.to_string();
        if let Some(kind) = err.event_kind() {
            self.record(payment_id, kind, reason.as_str(), err.reference(), now)
                .await?;
        }

        let progress = self.progress(payment_id).await?;
        let exhausted = self
            .config
            .retry
            .budget_exhausted(progress.consecutive_failures);

        let state = if !class.is_retryable() || exhausted {
            let reason = if class.is_retryable() {
                format!(
                    "retry budget exhausted after {} failures: {reason}",
                    progress.consecutive_failures
                )
            } else {
                reason.clone()
            };
            self.fail_payment(payment_id, &reason, now).await?;
            state.advance(AttemptEvent::FailTerminal)?
        } else {
            warn!(
                class = %class,
                consecutive_failures = progress.consecutive_failures,
                error = %reason,
                "attempt failed; will retry"
            );
            state.advance(AttemptEvent::FailRetryable)?
        };

        let status = self.payment(payment_id).await?.status;
        Ok(self.finish(
            started,
            AttemptReport {
                payment_id,
                trigger,
                state,
                status,
                failure: Some(class),
                detail: Some(reason),
            },
        ))
    }

    fn finish(&self, started: Instant, report: AttemptReport) -> AttemptReport {
        self.metrics
            .record_attempt(report.trigger, report.state, started.elapsed());
        report
    }
}

/// Current unix time in seconds
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
