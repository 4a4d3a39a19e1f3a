//! Outbound adapters (driven side): ledger stores.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
mod staging;
