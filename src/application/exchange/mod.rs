//! The exchange: trading, liquidity and market lifecycle operations.

pub mod command;
pub mod liquidity;
pub mod market;
pub mod service;
pub mod settings;
pub mod trade;
