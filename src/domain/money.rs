//! Monetary types and the boundary between AMM math and the ledger.
//!
//! Pool reserves, shares and probabilities are `f64` because the pricing
//! formulas use fractional powers. Balances and ledger amounts are exact
//! [`Decimal`] values rounded to [`MONEY_SCALE`] places.

use std::fmt;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::{ensure_finite, DomainError};

/// Exact ledger amount.
pub type Money = Decimal;

/// Decimal places kept for ledger amounts.
pub const MONEY_SCALE: u32 = 8;

/// Floating point tolerance used when comparing AMM quantities.
pub const EPSILON: f64 = 1e-9;

/// Denomination of a market and of the balances it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Token {
    /// Play money, no fees on profit.
    Mana,
    /// Fee-bearing token: resolution charges a profit fee.
    Cash,
    /// Non-transferable reward points.
    Points,
}

impl Default for Token {
    fn default() -> Self {
        Self::Mana
    }
}

impl Token {
    /// Whether resolution assesses a fee on positive profit.
    #[must_use]
    pub const fn is_fee_bearing(self) -> bool {
        matches!(self, Self::Cash)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mana => "MANA",
            Self::Cash => "CASH",
            Self::Points => "POINTS",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert an AMM quantity into a ledger amount.
pub fn to_money(amount: f64) -> Result<Money, DomainError> {
    let amount = ensure_finite(amount)?;
    Decimal::from_f64(amount)
        .map(|d| d.round_dp(MONEY_SCALE))
        .ok_or(DomainError::NonFiniteAmount { amount })
}

/// Convert a ledger amount back into AMM space.
#[must_use]
pub fn to_f64(amount: Money) -> f64 {
    amount.to_f64().unwrap_or(0.0)
}

/// Approximate equality for AMM quantities.
#[must_use]
pub fn floating_equal(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}
