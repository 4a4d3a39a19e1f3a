//! Taker fees and how they are split.

use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Fees collected by one fill, split by recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fees {
    /// Paid to the market creator.
    pub creator_fee: f64,
    /// Paid to the bank.
    pub platform_fee: f64,
    /// Added back to the pool as liquidity.
    pub liquidity_fee: f64,
}

impl Fees {
    pub const ZERO: Self = Self {
        creator_fee: 0.0,
        platform_fee: 0.0,
        liquidity_fee: 0.0,
    };

    #[must_use]
    pub fn total(&self) -> f64 {
        self.creator_fee + self.platform_fee + self.liquidity_fee
    }
}

impl Add for Fees {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            creator_fee: self.creator_fee + rhs.creator_fee,
            platform_fee: self.platform_fee + rhs.platform_fee,
            liquidity_fee: self.liquidity_fee + rhs.liquidity_fee,
        }
    }
}

impl std::iter::Sum for Fees {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, f| acc + f)
    }
}

/// Taker fee curve and split.
///
/// The fee on a fill of `shares` at average probability `prob` is
/// `taker_fee * prob * (1 - prob) * shares`: largest at 50% and vanishing at
/// the extremes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub taker_fee: f64,
    pub creator_share: f64,
    pub platform_share: f64,
    pub liquidity_share: f64,
}

impl FeeSchedule {
    /// No fees at all. Used by administrative flows and arbitrage legs.
    pub const FREE: Self = Self {
        taker_fee: 0.0,
        creator_share: 0.0,
        platform_share: 0.0,
        liquidity_share: 0.0,
    };

    /// Fee charged on a fill.
    #[must_use]
    pub fn taker_fee(&self, shares: f64, prob: f64) -> f64 {
        if shares <= 0.0 || !prob.is_finite() {
            return 0.0;
        }
        self.taker_fee * prob * (1.0 - prob) * shares
    }

    /// Split a total fee between recipients.
    #[must_use]
    pub fn split(&self, total: f64) -> Fees {
        let shares = self.creator_share + self.platform_share + self.liquidity_share;
        if total <= 0.0 || shares <= 0.0 {
            return Fees::ZERO;
        }
        Fees {
            creator_fee: total * self.creator_share / shares,
            platform_fee: total * self.platform_share / shares,
            liquidity_fee: total * self.liquidity_share / shares,
        }
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.taker_fee == 0.0
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            taker_fee: 0.07,
            creator_share: 0.5,
            platform_share: 0.5,
            liquidity_share: 0.0,
        }
    }
}
