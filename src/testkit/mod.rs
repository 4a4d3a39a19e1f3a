//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`domain`] - Builders for users and markets in every mechanism.
//! - [`exchange`] - An exchange over the memory store with funded users and
//!   opened markets.

pub mod domain;
pub mod exchange;
