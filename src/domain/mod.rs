//! Pure trading and settlement logic. No I/O, no async runtime.

pub mod arbitrage;
pub mod bet;
pub mod contract;
pub mod cpmm;
pub mod error;
pub mod fees;
pub mod id;
pub mod liquidity;
pub mod matching;
pub mod metric;
pub mod money;
pub mod outcome;
pub mod patch;
pub mod payout;
pub mod rebalance;
pub mod resolution;
pub mod txn;
pub mod user;
