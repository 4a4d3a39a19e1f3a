//! Application services (use cases).
//!
//! These services orchestrate domain logic over the store port: queueing,
//! retrying, posting to the ledger and settling markets.

pub mod continuation;
pub mod exchange;
pub mod ledger;
pub mod queue;
pub mod resolution;
pub mod retry;
