use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

use crate::collector::MetricsError;

/// Prometheus handles for the escrow automation service, all registered on one registry
#[derive(Clone)]
pub struct EscrowMetrics {
    // ═══════════════════════════════════════════════════════════════════════════
    // PAYMENT METRICS
    // ═══════════════════════════════════════════════════════════════════════════
    /// Committed payment status transitions by source and target status
    pub transitions: IntCounterVec,

    /// Payments currently considered stuck by the recovery scheduler
    pub stuck_payments: IntGauge,

    // ═══════════════════════════════════════════════════════════════════════════
    // ATTEMPT METRICS
    // ═══════════════════════════════════════════════════════════════════════════
    /// Orchestration attempts by trigger and outcome
    pub attempts: IntCounterVec,

    /// Attempt duration in milliseconds by trigger
    pub attempt_duration: HistogramVec,

    // ═══════════════════════════════════════════════════════════════════════════
    // ADAPTER METRICS
    // ═══════════════════════════════════════════════════════════════════════════
    /// Adapter failures by adapter and failure class
    pub adapter_failures: IntCounterVec,

    // ═══════════════════════════════════════════════════════════════════════════
    // PAYOUT METRICS
    // ═══════════════════════════════════════════════════════════════════════════
    pub payout_batches: IntCounter,
    pub payouts_processed: IntCounter,
    pub payouts_failed: IntCounter,

    /// Payments handled per sweep
    pub payout_batch_size: Histogram,
}

impl EscrowMetrics {
    /// Create every metric and register it on `registry`
    pub fn register(registry: &Registry) -> Result<Self, MetricsError> {
        let transitions = IntCounterVec::new(
            Opts::new(
                "escrow_automation_payment_transitions_total",
                "Committed payment status transitions",
            ),
            &["from", "to"],
        )?;

        let stuck_payments = IntGauge::new(
            "escrow_automation_stuck_payments",
            "Payments past the stuck threshold at the last recovery tick",
        )?;

        let attempts = IntCounterVec::new(
            Opts::new(
                "escrow_automation_attempts_total",
                "Orchestration attempts by trigger and outcome",
            ),
            &["trigger", "outcome"],
        )?;

        let attempt_duration = HistogramVec::new(
            HistogramOpts::new(
                "escrow_automation_attempt_duration_ms",
                "Orchestration attempt duration in milliseconds",
            )
            .buckets(vec![
                5.0, 25.0, 100.0, 250.0, 1000.0, 5000.0, 15000.0, 30000.0, 60000.0,
            ]),
            &["trigger"],
        )?;

        let adapter_failures = IntCounterVec::new(
            Opts::new(
                "escrow_automation_adapter_failures_total",
                "Adapter call failures by adapter and failure class",
            ),
            &["adapter", "class"],
        )?;

        let payout_batches = IntCounter::new(
            "escrow_automation_payout_batches_total",
            "Payout sweeps executed",
        )?;

        let payouts_processed = IntCounter::new(
            "escrow_automation_payouts_processed_total",
            "Payments advanced by payout sweeps",
        )?;

        let payouts_failed = IntCounter::new(
            "escrow_automation_payouts_failed_total",
            "Payments that failed during payout sweeps",
        )?;

        let payout_batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "escrow_automation_payout_batch_size",
                "Payments examined per payout sweep",
            )
            .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
        )?;

        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(stuck_payments.clone()))?;
        registry.register(Box::new(attempts.clone()))?;
        registry.register(Box::new(attempt_duration.clone()))?;
        registry.register(Box::new(adapter_failures.clone()))?;
        registry.register(Box::new(payout_batches.clone()))?;
        registry.register(Box::new(payouts_processed.clone()))?;
        registry.register(Box::new(payouts_failed.clone()))?;
        registry.register(Box::new(payout_batch_size.clone()))?;

        Ok(Self {
            transitions,
            stuck_payments,
            attempts,
            attempt_duration,
            adapter_failures,
            payout_batches,
            payouts_processed,
            payouts_failed,
            payout_batch_size,
        })
    }
}
