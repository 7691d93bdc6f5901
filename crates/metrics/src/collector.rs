use std::time::Duration;

use escrow_automation_types::{AttemptState, FailureClass, PaymentStatus, TriggerSource};
use prometheus::{Encoder, Registry, TextEncoder};

use crate::metrics::EscrowMetrics;

/// Metrics collector for the escrow automation service
///
/// Each collector owns its registry, so several orchestrators (or tests) in one process
/// never share counters.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Registry,
    metrics: EscrowMetrics,
}

impl MetricsCollector {
    /// Create a new metrics collector with a fresh registry
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Create a new metrics collector on a caller-supplied registry
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let metrics = EscrowMetrics::register(&registry)?;
        Ok(Self { registry, metrics })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PAYMENT METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a committed payment status transition
    pub fn record_transition(&self, from: PaymentStatus, to: PaymentStatus) {
        self.metrics
            .transitions
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }

    /// Update the number of payments the recovery scheduler found stuck
    pub fn set_stuck_payments(&self, count: usize) {
        self.metrics.stuck_payments.set(count as i64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ATTEMPT METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a finished orchestration attempt
    pub fn record_attempt(&self, trigger: TriggerSource, outcome: AttemptState, duration: Duration) {
        self.metrics
            .attempts
            .with_label_values(&[trigger.as_str(), outcome.as_str()])
            .inc();
        self.metrics
            .attempt_duration
            .with_label_values(&[trigger.as_str()])
            .observe(duration.as_millis() as f64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ADAPTER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a failed adapter call
    pub fn record_adapter_failure(&self, adapter: &str, class: FailureClass) {
        self.metrics
            .adapter_failures
            .with_label_values(&[adapter, class.as_str()])
            .inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PAYOUT METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record the outcome of one payout sweep
    pub fn record_payout_batch(&self, processed: usize, failed: usize) {
        self.metrics.payout_batches.inc();
        self.metrics.payouts_processed.inc_by(processed as u64);
        self.metrics.payouts_failed.inc_by(failed as u64);
        self.metrics
            .payout_batch_size
            .observe((processed + failed) as f64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export metrics in Prometheus text format
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

/// Metrics error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
    #[error("registry error: {0}")]
    RegistryError(String),
}

impl From<prometheus::Error> for MetricsError {
    fn from(err: prometheus::Error) -> Self {
        MetricsError::RegistryError(err.to_string())
    }
}
