//! Limit-order matching against resting makers and the pool.
//!
//! An incoming order walks the book in price-time priority. Before each maker
//! the pool is used while it offers a better price, capped at the maker's limit
//! and the taker's own limit. Makers fill at their own limit price and never
//! beyond their remaining order amount or their balance.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::bet::{Bet, Fill};
use super::cpmm::{self, CpmmState};
use super::error::{ensure_positive, DomainError};
use super::fees::{FeeSchedule, Fees};
use super::id::{BetId, UserId};
use super::money::EPSILON;
use super::outcome::Outcome;

/// Upper bound on fill rounds for one order.
const MAX_FILL_ROUNDS: usize = 10_000;

/// An incoming order.
#[derive(Debug, Clone, Copy)]
pub struct TakerOrder<'a> {
    pub user_id: &'a UserId,
    pub outcome: Outcome,
    pub amount: f64,
    pub limit_prob: Option<f64>,
}

/// The maker side of one match.
#[derive(Debug, Clone, PartialEq)]
pub struct MakerFill {
    pub bet_id: BetId,
    pub user_id: UserId,
    pub amount: f64,
    pub shares: f64,
    pub timestamp: DateTime<Utc>,
}

/// Everything an order did to the book and the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct FillResult {
    /// Taker fills in order.
    pub fills: Vec<Fill>,
    pub makers: Vec<MakerFill>,
    /// Makers whose balance ran out.
    pub orders_to_cancel: Vec<BetId>,
    pub state: CpmmState,
    pub fees: Fees,
    pub prob_before: f64,
    pub prob_after: f64,
}

impl FillResult {
    /// Mana the taker spent.
    #[must_use]
    pub fn amount(&self) -> f64 {
        self.fills.iter().map(|f| f.amount).sum()
    }

    /// Shares the taker received.
    #[must_use]
    pub fn shares(&self) -> f64 {
        self.fills.iter().map(|f| f.shares).sum()
    }
}

/// Validate a caller-supplied limit price.
pub fn check_limit_prob(limit_prob: Option<f64>) -> Result<(), DomainError> {
    match limit_prob {
        Some(prob) if !(prob.is_finite() && prob > 0.0 && prob < 1.0) => {
            Err(DomainError::InvalidProbability { prob })
        }
        _ => Ok(()),
    }
}

/// Resting makers for a taker of `outcome`, best price first, then oldest.
#[must_use]
pub fn sorted_makers<'a>(
    resting: &'a [Bet],
    taker: &UserId,
    outcome: Outcome,
    now: DateTime<Utc>,
) -> Vec<&'a Bet> {
    let mut makers: Vec<&Bet> = resting
        .iter()
        .filter(|b| b.outcome != outcome && &b.user_id != taker && b.is_resting(now))
        .collect();

    makers.sort_by(|a, b| {
        let (pa, pb) = (a.limit_prob.unwrap_or(0.0), b.limit_prob.unwrap_or(0.0));
        let by_price = match outcome {
            Outcome::Yes => pa.total_cmp(&pb),
            Outcome::No => pb.total_cmp(&pa),
        };
        match by_price {
            Ordering::Equal => a.created_time.cmp(&b.created_time),
            other => other,
        }
    });
    makers
}

/// Match an order against `resting` makers and the pool.
///
/// `balances` holds the available balance of each maker; it is drawn down as
/// makers fill so that one user's orders cannot spend the same funds twice.
pub fn compute_fills(
    state: &CpmmState,
    order: &TakerOrder<'_>,
    resting: &[Bet],
    balances: &HashMap<UserId, f64>,
    schedule: &FeeSchedule,
    now: DateTime<Utc>,
) -> Result<FillResult, DomainError> {
    ensure_positive(order.amount)?;
    check_limit_prob(order.limit_prob)?;

    let outcome = order.outcome;
    let makers = sorted_makers(resting, order.user_id, outcome, now);
    let mut balances = balances.clone();

    let prob_before = state.probability();
    let mut state = *state;
    let mut remaining = order.amount;
    let mut fills = Vec::new();
    let mut maker_fills = Vec::new();
    let mut orders_to_cancel = Vec::new();
    let mut fees = Fees::ZERO;
    let mut next_maker = 0;

    for _ in 0..MAX_FILL_ROUNDS {
        if remaining <= EPSILON {
            break;
        }
        let prob = state.probability();
        let maker = makers.get(next_maker).copied();
        let maker_limit = maker.and_then(|m| m.limit_prob);

        if let Some(limit) = order.limit_prob {
            let reached = match outcome {
                Outcome::Yes => prob >= limit - EPSILON && maker_limit.unwrap_or(1.0) > limit,
                Outcome::No => prob <= limit + EPSILON && maker_limit.unwrap_or(0.0) < limit,
            };
            if reached {
                break;
            }
        }

        let pool_is_better = match maker_limit {
            None => true,
            Some(ml) => match outcome {
                Outcome::Yes => prob < ml - EPSILON,
                Outcome::No => prob > ml + EPSILON,
            },
        };

        if pool_is_better {
            let cap = match maker_limit {
                None => order.limit_prob,
                Some(ml) => Some(match outcome {
                    Outcome::Yes => ml.min(order.limit_prob.unwrap_or(1.0)),
                    Outcome::No => ml.max(order.limit_prob.unwrap_or(0.0)),
                }),
            };
            let buy_amount = match cap {
                None => remaining,
                Some(cap) => {
                    remaining.min(cpmm::amount_to_prob_with_fees(&state, cap, outcome, schedule))
                }
            };

            if buy_amount > EPSILON {
                let purchase = cpmm::buy(&state, buy_amount, outcome, schedule)?;
                fills.push(Fill {
                    matched_bet_id: None,
                    amount: buy_amount,
                    shares: purchase.shares,
                    timestamp: now,
                    is_sale: false,
                });
                fees = fees + purchase.fees;
                state = purchase.state;
                remaining -= buy_amount;
                continue;
            }
            if maker.is_none() {
                break;
            }
        }

        let (Some(maker), Some(maker_limit)) = (maker, maker_limit) else {
            break;
        };
        next_maker += 1;

        let taker_price = outcome.prob_of(maker_limit);
        let maker_price = 1.0 - taker_price;
        let balance = balances.entry(maker.user_id.clone()).or_insert(0.0);
        let fillable = maker.remaining_amount().min(balance.max(0.0));
        let shares = (remaining / taker_price).min(fillable / maker_price);
        let maker_amount = shares * maker_price;
        let taker_amount = shares * taker_price;

        *balance -= maker_amount;
        let order_left = maker.remaining_amount() - maker_amount;
        if *balance <= EPSILON && order_left > EPSILON {
            orders_to_cancel.push(maker.id.clone());
        }
        if maker_amount <= EPSILON {
            continue;
        }

        fills.push(Fill {
            matched_bet_id: Some(maker.id.clone()),
            amount: taker_amount,
            shares,
            timestamp: now,
            is_sale: false,
        });
        maker_fills.push(MakerFill {
            bet_id: maker.id.clone(),
            user_id: maker.user_id.clone(),
            amount: maker_amount,
            shares,
            timestamp: now,
        });
        remaining -= taker_amount;
    }

    Ok(FillResult {
        fills,
        makers: maker_fills,
        orders_to_cancel,
        prob_before,
        prob_after: state.probability(),
        state,
        fees,
    })
}
