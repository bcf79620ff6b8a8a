//! CSV adapters for the batch replay binary.

pub mod command_reader;
pub mod plan_reader;
pub mod wallet_writer;
