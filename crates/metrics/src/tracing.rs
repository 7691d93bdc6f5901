use escrow_automation_types::{PaymentId, TriggerSource};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    Json,
    Pretty,
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (for example `"info"` or
/// `"info,escrow_automation_orchestrator=debug"`) is used.
pub fn init_tracing(format: TracingFormat, default_directive: &str) -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| TracingError::InitError(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        TracingFormat::Json => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .json(),
            )
            .try_init(),
        TracingFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_level(true))
            .try_init(),
    };

    result.map_err(|e| TracingError::InitError(e.to_string()))
}

/// Identity of a worker process, used as lease owner and span field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    /// Use a configured name
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generate a random worker name
    pub fn generate() -> Self {
        Self(format!("worker-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context for one orchestration attempt
#[derive(Debug, Clone)]
pub struct AttemptSpan {
    pub payment_id: PaymentId,
    pub trigger: TriggerSource,
    pub worker: WorkerId,
}

impl AttemptSpan {
    pub fn new(payment_id: PaymentId, trigger: TriggerSource, worker: WorkerId) -> Self {
        Self {
            payment_id,
            trigger,
            worker,
        }
    }

    /// Build the tracing span for this attempt
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "attempt",
            payment_id = %self.payment_id,
            trigger = %self.trigger,
            worker = %self.worker,
        )
    }
}

/// Tracing error types
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_generation() {
        let id1 = WorkerId::generate();
        let id2 = WorkerId::generate();

        // IDs should be unique
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("worker-"));
        assert_eq!(id1.as_str().len(), "worker-".len() + 36);
    }

    #[test]
    fn test_attempt_span_creation() {
        let span = AttemptSpan::new(
            PaymentId(7),
            TriggerSource::Manual,
            WorkerId::named("worker-a"),
        );

        assert_eq!(span.payment_id, PaymentId(7));
        assert_eq!(span.worker.as_str(), "worker-a");
        let _guard = span.span().entered();
    }

    #[test]
    fn test_init_tracing_rejects_bad_directive() {
        // Only reached when RUST_LOG is unset in the test environment
        if std::env::var("RUST_LOG").is_err() {
            let result = init_tracing(TracingFormat::Pretty, "info,[[[");
            assert!(matches!(result, Err(TracingError::InitError(_))));
        }
    }
}
