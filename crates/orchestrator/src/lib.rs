//! Payment escrow orchestration: deposit detection, escrow creation, custody tracking,
//! release, redemption and payout, driven by retry timers and resumable from the ledger.

pub mod config;
pub mod context;
pub mod deposits;
pub mod error;
pub mod escrow_creation;
pub mod payout;
pub mod progress;
pub mod scheduler;

#[cfg(test)]
mod tests;

// Re-export main types
pub use config::OrchestratorConfig;
pub use context::{current_timestamp, AttemptReport, OrchestratorContext, Store};
pub use deposits::{DepositMonitor, DepositReport, PaymentRequest};
pub use error::{classify_adapter_error, OrchestratorError};
pub use escrow_creation::EscrowCreationOrchestrator;
pub use payout::{CustodySyncReport, PayoutBatchReport, PayoutProcessor, Resolution};
pub use progress::{
    direct_payout_key, escrow_reference, payout_key, redemption_key, withdrawal_key,
    EscrowCreationState, FlowProgress, LastFailure, RailStep, WithdrawalState,
};
pub use scheduler::{RetryScheduler, SweepReport, TickReport};
