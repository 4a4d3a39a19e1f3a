//! Trading in sum-to-one markets.
//!
//! Exactly one answer of a sum-to-one market pays out, so NO shares in every
//! answer but A are worth `n - 2` mana plus a YES share of A, and YES shares in
//! every answer but A are worth a NO share of A. A trade on A is split into
//! offsetting pool purchases on the other answers plus an order on A, sized by
//! bisection so the probabilities keep summing to one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::bet::{Bet, Fill};
use super::contract::Answer;
use super::cpmm::{self, bisect, CpmmState, Pool};
use super::error::{ensure_positive, DomainError};
use super::fees::{FeeSchedule, Fees};
use super::id::{AnswerId, UserId};
use super::matching::{compute_fills, FillResult, TakerOrder};
use super::money::EPSILON;
use super::outcome::Outcome;

/// Upper bound on the growth search of the de-arbitrage share count.
const MAX_BOUND_DOUBLINGS: usize = 30;

/// A fee-free pool purchase on another answer that is redeemed immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrageLeg {
    pub answer_id: AnswerId,
    pub outcome: Outcome,
    pub amount: f64,
    pub shares: f64,
    pub state: CpmmState,
}

/// Result of buying into one answer of a sum-to-one market.
#[derive(Debug, Clone, PartialEq)]
pub struct SumToOneTrade {
    pub answer_id: AnswerId,
    /// Order on the traded answer itself.
    pub main: FillResult,
    /// Net mana spent on the other answers.
    pub redemption_amount: f64,
    /// Shares of the traded answer obtained by redemption.
    pub redemption_shares: f64,
    pub legs: Vec<ArbitrageLeg>,
}

impl SumToOneTrade {
    #[must_use]
    pub fn amount(&self) -> f64 {
        self.main.amount() + self.redemption_amount
    }

    #[must_use]
    pub fn shares(&self) -> f64 {
        self.main.shares() + self.redemption_shares
    }

    #[must_use]
    pub fn fees(&self) -> Fees {
        self.main.fees
    }

    /// Taker fills including the redemption fill.
    #[must_use]
    pub fn taker_fills(&self, now: DateTime<Utc>) -> Vec<Fill> {
        let mut fills = self.main.fills.clone();
        if self.redemption_shares > EPSILON {
            fills.push(Fill {
                matched_bet_id: None,
                amount: self.redemption_amount,
                shares: self.redemption_shares,
                timestamp: now,
                is_sale: false,
            });
        }
        fills
    }

    /// Pools of every touched answer after the trade.
    #[must_use]
    pub fn pools(&self) -> Vec<(AnswerId, Pool)> {
        let mut pools: Vec<(AnswerId, Pool)> = self
            .legs
            .iter()
            .map(|leg| (leg.answer_id.clone(), leg.state.pool))
            .collect();
        pools.push((self.answer_id.clone(), self.main.state.pool));
        pools
    }

    fn probability_sum(&self) -> f64 {
        self.pools()
            .iter()
            .map(|(_, pool)| cpmm::probability(*pool, 0.5))
            .sum()
    }
}

/// Result of selling shares of one answer of a sum-to-one market.
#[derive(Debug, Clone, PartialEq)]
pub struct SumToOneSale {
    pub trade: SumToOneTrade,
    pub sale_value: f64,
}

fn fixed_p_leg(answer: &Answer, shares: f64, outcome: Outcome) -> Result<ArbitrageLeg, DomainError> {
    let amount = cpmm::amount_to_buy_shares_fixed_p(answer.pool, shares, outcome);
    let state = if amount > 0.0 {
        cpmm::buy(&answer.state(), amount, outcome, &FeeSchedule::FREE)?.state
    } else {
        answer.state()
    };
    Ok(ArbitrageLeg {
        answer_id: answer.id.clone(),
        outcome,
        amount,
        shares,
        state,
    })
}

fn empty_fills(state: CpmmState) -> FillResult {
    let prob = state.probability();
    FillResult {
        fills: Vec::new(),
        makers: Vec::new(),
        orders_to_cancel: Vec::new(),
        state,
        fees: Fees::ZERO,
        prob_before: prob,
        prob_after: prob,
    }
}

#[allow(clippy::too_many_arguments)]
fn attempt(
    answers: &[Answer],
    target: &Answer,
    order: &TakerOrder<'_>,
    redeemed_shares: f64,
    resting: &[Bet],
    balances: &HashMap<UserId, f64>,
    schedule: &FeeSchedule,
    now: DateTime<Utc>,
) -> Result<Option<SumToOneTrade>, DomainError> {
    let others: Vec<&Answer> = answers.iter().filter(|a| a.id != target.id).collect();
    let leg_outcome = order.outcome.opposite();
    let legs = others
        .iter()
        .map(|a| fixed_p_leg(a, redeemed_shares, leg_outcome))
        .collect::<Result<Vec<_>, _>>()?;
    let leg_total: f64 = legs.iter().map(|l| l.amount).sum();

    let redemption_amount = match order.outcome {
        Outcome::Yes => leg_total - redeemed_shares * (answers.len() as f64 - 2.0),
        Outcome::No => leg_total,
    };
    let main_amount = order.amount - redemption_amount;
    if main_amount < -EPSILON {
        return Ok(None);
    }

    let main = if main_amount > EPSILON {
        let main_order = TakerOrder {
            amount: main_amount,
            ..*order
        };
        compute_fills(&target.state(), &main_order, resting, balances, schedule, now)?
    } else {
        empty_fills(target.state())
    };

    Ok(Some(SumToOneTrade {
        answer_id: target.id.clone(),
        main,
        redemption_amount,
        redemption_shares: redeemed_shares,
        legs,
    }))
}

/// Buy `order.outcome` on `answer_id`, keeping the answers summing to one.
///
/// `answers` are the unresolved answers of the market. `resting` are the
/// limit orders on the traded answer.
pub fn buy_sum_to_one(
    answers: &[Answer],
    answer_id: &AnswerId,
    order: &TakerOrder<'_>,
    resting: &[Bet],
    balances: &HashMap<UserId, f64>,
    schedule: &FeeSchedule,
    now: DateTime<Utc>,
) -> Result<SumToOneTrade, DomainError> {
    ensure_positive(order.amount)?;
    let target = answers
        .iter()
        .find(|a| &a.id == answer_id)
        .ok_or_else(|| DomainError::UnknownAnswer(answer_id.to_string()))?;

    if answers.len() < 2 {
        let main = compute_fills(&target.state(), order, resting, balances, schedule, now)?;
        return Ok(SumToOneTrade {
            answer_id: answer_id.clone(),
            main,
            redemption_amount: 0.0,
            redemption_shares: 0.0,
            legs: Vec::new(),
        });
    }

    let others = answers.iter().filter(|a| a.id != target.id);
    let max_shares = match order.outcome {
        Outcome::Yes => {
            let no_price_sum: f64 = others.map(|a| 1.0 - a.prob).sum();
            order.amount / (no_price_sum - answers.len() as f64 + 2.0)
        }
        Outcome::No => {
            let yes_price_sum: f64 = others.map(|a| a.prob).sum();
            order.amount / yes_price_sum
        }
    };

    let distance = |shares: f64| -> f64 {
        match attempt(answers, target, order, shares, resting, balances, schedule, now) {
            Ok(Some(trade)) => match order.outcome {
                Outcome::Yes => 1.0 - trade.probability_sum(),
                Outcome::No => trade.probability_sum() - 1.0,
            },
            _ => 1.0,
        }
    };
    let shares = bisect(0.0, max_shares.max(0.0), distance);

    attempt(answers, target, order, shares, resting, balances, schedule, now)?
        .ok_or(DomainError::SumToOneViolated { sum: f64::NAN })
}

/// Sell `shares` of `outcome` on `answer_id` in a sum-to-one market.
///
/// Priced as buying the same number of opposite shares through
/// [`buy_sum_to_one`] and redeeming the pairs.
#[allow(clippy::too_many_arguments)]
pub fn sell_sum_to_one(
    answers: &[Answer],
    answer_id: &AnswerId,
    seller: &UserId,
    outcome: Outcome,
    shares: f64,
    resting: &[Bet],
    balances: &HashMap<UserId, f64>,
    schedule: &FeeSchedule,
    now: DateTime<Utc>,
) -> Result<SumToOneSale, DomainError> {
    let shares = ensure_positive(shares)?;
    let order_for = |amount: f64| TakerOrder {
        user_id: seller,
        outcome: outcome.opposite(),
        amount,
        limit_prob: None,
    };

    let upper = shares * (1.0 + schedule.taker_fee) + 1.0;
    let amount = bisect(0.0, upper, |amount| {
        match buy_sum_to_one(
            answers,
            answer_id,
            &order_for(amount),
            resting,
            balances,
            schedule,
            now,
        ) {
            Ok(trade) => trade.shares() - shares,
            Err(_) => 1.0,
        }
    });

    let trade = buy_sum_to_one(
        answers,
        answer_id,
        &order_for(amount),
        resting,
        balances,
        schedule,
        now,
    )?;
    Ok(SumToOneSale {
        sale_value: shares - trade.amount(),
        trade,
    })
}

/// Result of buying NO in every answer until the probabilities sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct DeArbitrage {
    pub pools: Vec<(AnswerId, Pool)>,
    pub no_shares: f64,
    /// Mana freed by redeeming the NO shares, net of their cost.
    pub extra_mana: f64,
}

fn buy_no_in_all(answers: &[Answer], no_shares: f64) -> Result<(Vec<ArbitrageLeg>, f64), DomainError> {
    let legs = answers
        .iter()
        .map(|a| fixed_p_leg(a, no_shares, Outcome::No))
        .collect::<Result<Vec<_>, _>>()?;
    let probability_sum = legs.iter().map(|l| l.state.probability()).sum();
    Ok((legs, probability_sum))
}

/// Buy equal NO shares in every answer (pool only, fee free) until the
/// probabilities sum to one. A market already at or below one is untouched.
pub fn buy_no_until_sum_to_one(answers: &[Answer]) -> Result<DeArbitrage, DomainError> {
    let untouched = DeArbitrage {
        pools: answers.iter().map(|a| (a.id.clone(), a.pool)).collect(),
        no_shares: 0.0,
        extra_mana: 0.0,
    };
    let sum: f64 = answers.iter().map(|a| a.prob).sum();
    if answers.len() < 2 || sum <= 1.0 + EPSILON {
        return Ok(untouched);
    }

    let mut upper = 10.0;
    for _ in 0..MAX_BOUND_DOUBLINGS {
        let (_, sum) = buy_no_in_all(answers, upper)?;
        if sum < 1.0 {
            break;
        }
        upper *= 10.0;
    }

    let no_shares = bisect(0.0, upper, |shares| match buy_no_in_all(answers, shares) {
        Ok((_, sum)) => 1.0 - sum,
        Err(_) => 1.0,
    });
    let (legs, _) = buy_no_in_all(answers, no_shares)?;

    let total_cost: f64 = legs.iter().map(|l| l.amount).sum();
    let redeemed = no_shares * (answers.len() as f64 - 1.0);
    Ok(DeArbitrage {
        pools: legs.into_iter().map(|l| (l.answer_id, l.state.pool)).collect(),
        no_shares,
        extra_mana: redeemed - total_cost,
    })
}
