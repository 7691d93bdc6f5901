//! Retry timing for escrow automation
//!
//! - `ExponentialBackoff`: capped exponential delays for the steady timer
//! - `Cadence`: which timer (quick, steady or none) owns a failure class
//! - `RetryPolicy`: attempt budget and next-attempt computation

pub mod backoff;
pub mod policy;

pub use backoff::ExponentialBackoff;
pub use escrow_automation_types::FailureClass;
pub use policy::{Cadence, RetryPolicy};
