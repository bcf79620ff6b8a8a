//! Application layer orchestrating settlements.
//!
//! `SettlementEngine` is the entry point. It drives the transaction ledger,
//! the wallet balances and the idempotency claims through the storage ports,
//! so any number of engines can share one backing store.

pub mod claims;
pub mod engine;
pub mod ledger;
pub mod wallet;
