//! Capability traits for the two external systems the orchestrator drives, the fiat
//! rail and the escrow contract, plus simulated implementations for tests and local runs.

pub mod chain;
pub mod deadline;
pub mod error;
pub mod fiat;
pub mod simulated;

pub use chain::*;
pub use deadline::*;
pub use error::*;
pub use fiat::*;
pub use simulated::*;
