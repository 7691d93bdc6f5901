//! Durable state for escrow automation: payments, escrows, rail transaction mirrors
//! and the append-only event ledger.

pub mod sqlite_store;
pub mod store;

pub use sqlite_store::*;
pub use store::*;
