//! Domain types and the ports the settlement services talk through.

pub mod claim;
pub mod gateway;
pub mod money;
pub mod plan;
pub mod ports;
pub mod transaction;
pub mod wallet;
