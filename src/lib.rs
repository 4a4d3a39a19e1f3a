//! Oddsmith - trading and settlement engine for prediction markets.
//!
//! Markets are priced by constant-product market makers, optionally matched
//! against resting limit orders, and settled through an append-only ledger of
//! transactions.
//!
//! # Architecture
//!
//! - **`domain`** - Pure pricing, matching, payout and rebalancing logic
//! - **`port`** - Storage and notification traits the engine drives
//! - **`application`** - The [`Exchange`](application::exchange::service::Exchange)
//!   service, the per-key mutation queue and the retry loop
//! - **`adapter`** - Memory and SQLite stores, and the `oddsmith` CLI
//! - **`infrastructure`** - Configuration, logging and runtime wiring
//!
//! # Features
//!
//! - `sqlite` (default) - SQLite ledger store via Diesel
//! - `testkit` - Builders shared by the integration tests
//!
//! # Example
//!
//! ```no_run
//! use oddsmith::adapter::outbound::memory::MemoryLedgerStore;
//! use oddsmith::application::exchange::service::Exchange;
//! use oddsmith::application::exchange::settings::ExchangeSettings;
//!
//! let exchange = Exchange::new(MemoryLedgerStore::new(), ExchangeSettings::default());
//! assert_eq!(exchange.settings().retry.attempts, ExchangeSettings::default().retry.attempts);
//! ```

pub mod adapter;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
