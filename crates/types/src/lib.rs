pub mod attempt;
pub mod escrow;
pub mod event;
pub mod payment;
pub mod state_machine;
pub mod transaction;

pub use attempt::*;
pub use escrow::*;
pub use event::*;
pub use payment::*;
pub use state_machine::*;
pub use transaction::*;

/// Recommended custody period (5 days) when nothing else is configured.
pub const DEFAULT_CUSTODY_PERIOD_SECS: i64 = 432_000;
