//! Metrics and logging for the escrow automation service
//!
//! # Features
//!
//! - Prometheus metrics on a per-collector registry
//! - Tracing subscriber setup with JSON or human output
//! - Per-attempt spans carrying payment, trigger and worker
//!
//! # Example
//!
//! ```no_run
//! use escrow_automation_metrics::{init_tracing, MetricsCollector, TracingFormat};
//! use escrow_automation_types::PaymentStatus;
//!
//! init_tracing(TracingFormat::Json, "info").unwrap();
//!
//! let collector = MetricsCollector::new().unwrap();
//! collector.record_transition(PaymentStatus::Funded, PaymentStatus::Processing);
//! println!("{}", collector.render().unwrap());
//! ```

pub mod collector;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError};
pub use metrics::EscrowMetrics;
pub use self::tracing::{init_tracing, AttemptSpan, TracingError, TracingFormat, WorkerId};
