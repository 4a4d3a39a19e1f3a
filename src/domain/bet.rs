//! Bets, limit orders and their fills.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fees::Fees;
use super::id::{AnswerId, BetId, ContractId, UserId};
use super::money::EPSILON;
use super::outcome::Outcome;

/// One match event, against the pool (`matched_bet_id == None`) or a maker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub matched_bet_id: Option<BetId>,
    pub amount: f64,
    pub shares: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_sale: bool,
}

/// A bet. Limit orders carry `limit_prob` and `order_amount`; market orders
/// do not.
///
/// Sales are recorded as bets with negative amount and shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub contract_id: ContractId,
    #[serde(default)]
    pub answer_id: Option<AnswerId>,
    pub user_id: UserId,
    pub created_time: DateTime<Utc>,
    pub outcome: Outcome,
    /// Mana actually spent so far (negative for sales).
    pub amount: f64,
    pub shares: f64,
    /// Total mana a limit order is willing to spend.
    #[serde(default)]
    pub order_amount: Option<f64>,
    #[serde(default)]
    pub limit_prob: Option<f64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub prob_before: f64,
    pub prob_after: f64,
    #[serde(default)]
    pub fills: Vec<Fill>,
    #[serde(default)]
    pub fees: Fees,
    #[serde(default)]
    pub is_filled: bool,
    #[serde(default)]
    pub is_cancelled: bool,
    /// Zero-cost position created by redemptions and rebalancing.
    #[serde(default)]
    pub is_redemption: bool,
    #[serde(default)]
    pub is_sale: bool,
}

impl Bet {
    #[must_use]
    pub fn is_limit_order(&self) -> bool {
        self.limit_prob.is_some()
    }

    /// Whether this order still rests in the book at `now`.
    #[must_use]
    pub fn is_resting(&self, now: DateTime<Utc>) -> bool {
        self.is_limit_order()
            && !self.is_filled
            && !self.is_cancelled
            && self.expires_at.map_or(true, |expiry| expiry > now)
    }

    /// Unspent part of a limit order.
    #[must_use]
    pub fn remaining_amount(&self) -> f64 {
        self.order_amount
            .map_or(0.0, |order| (order - self.amount).max(0.0))
    }

    /// Add a maker-side fill; marks the order filled once nothing remains.
    pub fn record_maker_fill(&mut self, fill: Fill) {
        self.amount += fill.amount;
        self.shares += fill.shares;
        self.fills.push(fill);
        if self.remaining_amount() <= EPSILON {
            self.is_filled = true;
        }
    }

    /// Zero-amount position used for redemptions and Other conversions.
    #[must_use]
    pub fn redemption(
        contract_id: ContractId,
        answer_id: Option<AnswerId>,
        user_id: UserId,
        outcome: Outcome,
        shares: f64,
        prob: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BetId::generate(),
            contract_id,
            answer_id,
            user_id,
            created_time: now,
            outcome,
            amount: 0.0,
            shares,
            order_amount: None,
            limit_prob: None,
            expires_at: None,
            prob_before: prob,
            prob_after: prob,
            fills: vec![Fill {
                matched_bet_id: None,
                amount: 0.0,
                shares,
                timestamp: now,
                is_sale: false,
            }],
            fees: Fees::ZERO,
            is_filled: true,
            is_cancelled: false,
            is_redemption: true,
            is_sale: false,
        }
    }
}
