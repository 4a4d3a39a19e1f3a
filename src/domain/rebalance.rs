//! Adding answers to multi-answer markets.
//!
//! In a sum-to-one market with an Other bucket a new answer is carved out of
//! Other: Other's pool is split between the two, YES holders of Other keep
//! their claim on both halves, NO holders of Other are converted into YES
//! holders of every earlier answer, and the probability mass created by the
//! split is bet back down so the answers sum to one again.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::arbitrage::buy_no_until_sum_to_one;
use super::bet::Bet;
use super::contract::{Answer, Contract, Mechanism};
use super::cpmm::{self, Pool};
use super::error::{ensure_positive, DomainError};
use super::id::{AnswerId, BetId, UserId};
use super::money::{floating_equal, EPSILON};
use super::outcome::Outcome;

/// The answer being added.
#[derive(Debug, Clone)]
pub struct NewAnswer<'a> {
    pub id: AnswerId,
    pub text: &'a str,
    pub user_id: &'a UserId,
    /// Mana paid by the creator of the answer.
    pub cost: f64,
}

/// Every change needed to add one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Rebalance {
    /// All answers of the market afterwards, ordered by index.
    pub answers: Vec<Answer>,
    pub answer_id: AnswerId,
    /// Zero-amount bets converting positions held in Other.
    pub conversions: Vec<Bet>,
    /// Resting orders on Other that no longer make sense.
    pub orders_to_cancel: Vec<BetId>,
    /// NO shares bought in every answer to restore the sum.
    pub de_arbitrage_shares: f64,
    /// Mana that could not be placed as liquidity.
    pub subsidy: f64,
}

/// Insert `new` into `contract`.
///
/// `bets` are the bets of the contract; only those on the Other bucket are
/// read.
pub fn add_answer(
    contract: &Contract,
    new: &NewAnswer<'_>,
    bets: &[Bet],
    now: DateTime<Utc>,
) -> Result<Rebalance, DomainError> {
    let cost = ensure_positive(new.cost)?;
    if contract.answer(&new.id).is_some() {
        return Err(DomainError::InvalidUpdate {
            operation: "add_answer",
            field: "answers",
        });
    }

    match contract.mechanism {
        Mechanism::SinglePool => Err(DomainError::UnsupportedMechanism {
            operation: "add_answer",
            mechanism: contract.mechanism.as_str(),
        }),
        Mechanism::MultiPool => {
            let mut answers = contract.answers.clone();
            answers.push(fresh_answer(new, answers.len(), Pool::new(cost, cost), now));
            Ok(Rebalance {
                answers,
                answer_id: new.id.clone(),
                conversions: Vec::new(),
                orders_to_cancel: Vec::new(),
                de_arbitrage_shares: 0.0,
                subsidy: 0.0,
            })
        }
        Mechanism::MultiPoolSumToOne => match contract.other_answer() {
            Some(other) => split_other(contract, other, new, bets, now),
            None => {
                let mut answers = contract.answers.clone();
                answers.push(fresh_answer(new, answers.len(), Pool::new(cost, cost), now));
                settle_sum(answers, new.id.clone(), Vec::new(), Vec::new())
            }
        },
    }
}

fn fresh_answer(new: &NewAnswer<'_>, index: usize, pool: Pool, now: DateTime<Utc>) -> Answer {
    Answer::new(
        new.id.clone(),
        index,
        new.text,
        new.user_id.clone(),
        pool,
        now,
    )
}

fn split_other(
    contract: &Contract,
    other: &Answer,
    new: &NewAnswer<'_>,
    bets: &[Bet],
    now: DateTime<Utc>,
) -> Result<Rebalance, DomainError> {
    let Pool { yes, no } = other.pool;
    let mana = new.cost + yes.min(no);
    let excess_yes = (yes - no).max(0.0);
    let excess_no = (no - yes).max(0.0);
    let half = new.cost.min(mana / 2.0);

    let mut answers: Vec<Answer> = Vec::with_capacity(contract.answers.len() + 1);
    for answer in contract.answers.iter().filter(|a| !a.is_other) {
        let mut answer = answer.clone();
        if !answer.is_resolved() {
            answer.set_pool(Pool::new(answer.pool.yes + excess_no, answer.pool.no));
        }
        answers.push(answer);
    }
    let previous: Vec<AnswerId> = answers
        .iter()
        .filter(|a| !a.is_resolved())
        .map(|a| a.id.clone())
        .collect();

    let mut added = fresh_answer(
        new,
        answers.len(),
        Pool::new(half + excess_yes, half),
        now,
    );
    added.total_liquidity = half;
    answers.push(added);

    let mut moved = other.clone();
    moved.index = answers.len();
    moved.set_pool(Pool::new(mana - half + excess_yes, mana - half));
    moved.total_liquidity = mana - half;
    answers.push(moved);

    let on_other: Vec<&Bet> = bets
        .iter()
        .filter(|b| b.answer_id.as_ref() == Some(&other.id))
        .collect();
    let orders_to_cancel = on_other
        .iter()
        .filter(|b| b.is_resting(now))
        .map(|b| b.id.clone())
        .collect();

    let prob_of = |id: &AnswerId| {
        answers
            .iter()
            .find(|a| &a.id == id)
            .map_or(0.5, |a| a.prob)
    };
    let conversions = convert_other_positions(
        contract,
        other,
        &new.id,
        &previous,
        &on_other,
        prob_of,
        now,
    );

    settle_sum(answers, new.id.clone(), conversions, orders_to_cancel)
}

/// YES in Other becomes YES in the new answer; NO in Other becomes YES in
/// every earlier answer.
fn convert_other_positions(
    contract: &Contract,
    other: &Answer,
    new_id: &AnswerId,
    previous: &[AnswerId],
    on_other: &[&Bet],
    prob_of: impl Fn(&AnswerId) -> f64,
    now: DateTime<Utc>,
) -> Vec<Bet> {
    let mut positions: BTreeMap<&UserId, f64> = BTreeMap::new();
    for bet in on_other {
        let signed = match bet.outcome {
            Outcome::Yes => bet.shares,
            Outcome::No => -bet.shares,
        };
        *positions.entry(&bet.user_id).or_default() += signed;
    }

    let mut conversions = Vec::new();
    for (user_id, position) in positions {
        if floating_equal(position, 0.0) {
            continue;
        }
        if position > 0.0 {
            conversions.push(Bet::redemption(
                contract.id.clone(),
                Some(new_id.clone()),
                user_id.clone(),
                Outcome::Yes,
                position,
                prob_of(new_id),
                now,
            ));
            continue;
        }

        let no_position = -position;
        conversions.push(Bet::redemption(
            contract.id.clone(),
            Some(other.id.clone()),
            user_id.clone(),
            Outcome::No,
            -no_position,
            other.prob,
            now,
        ));
        for answer_id in previous {
            conversions.push(Bet::redemption(
                contract.id.clone(),
                Some(answer_id.clone()),
                user_id.clone(),
                Outcome::Yes,
                no_position,
                prob_of(answer_id),
                now,
            ));
        }
    }
    conversions
}

/// Bet the unresolved answers back down to a sum of one and recycle the
/// freed mana as liquidity.
fn settle_sum(
    mut answers: Vec<Answer>,
    answer_id: AnswerId,
    conversions: Vec<Bet>,
    orders_to_cancel: Vec<BetId>,
) -> Result<Rebalance, DomainError> {
    let open: Vec<Answer> = answers.iter().filter(|a| !a.is_resolved()).cloned().collect();
    let de_arbitrage = buy_no_until_sum_to_one(&open)?;

    let pools: Vec<Pool> = de_arbitrage.pools.iter().map(|(_, pool)| *pool).collect();
    let (pools, leftover) = if de_arbitrage.extra_mana > EPSILON {
        cpmm::add_liquidity_sum_to_one(&pools, de_arbitrage.extra_mana)
    } else {
        (pools, de_arbitrage.extra_mana.max(0.0))
    };

    for ((id, _), pool) in de_arbitrage.pools.iter().zip(pools) {
        if let Some(answer) = answers.iter_mut().find(|a| &a.id == id) {
            cpmm::check_state(&cpmm::CpmmState::fixed(pool))?;
            answer.set_pool(pool);
        }
    }

    Ok(Rebalance {
        answers,
        answer_id,
        conversions,
        orders_to_cancel,
        de_arbitrage_shares: de_arbitrage.no_shares,
        subsidy: leftover,
    })
}
