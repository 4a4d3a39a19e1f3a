//! Resolution payouts.
//!
//! Turns a resolution request into per-pool targets, then values every user's
//! bets and liquidity against those targets.

use std::collections::BTreeMap;

use super::bet::Bet;
use super::contract::{Contract, Mechanism};
use super::error::DomainError;
use super::id::{AnswerId, UserId};
use super::liquidity::{net_contribution, provider_weights, LiquidityProvision};
use super::metric::{Shares, Valuation};
use super::outcome::Outcome;
use super::resolution::ResolutionOutcome;

/// How one pool resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolTarget {
    pub answer_id: Option<AnswerId>,
    pub valuation: Valuation,
    /// Probability recorded on the pool.
    pub probability: f64,
}

impl PoolTarget {
    fn new(answer_id: Option<AnswerId>, valuation: Valuation, prior: f64) -> Self {
        let probability = match valuation {
            Valuation::Probability(q) => q,
            Valuation::Cancel => prior,
        };
        Self {
            answer_id,
            valuation,
            probability,
        }
    }
}

fn invalid(reason: impl Into<String>) -> DomainError {
    DomainError::InvalidResolution(reason.into())
}

fn valuation_for(outcome: &ResolutionOutcome, prior: f64) -> Valuation {
    if outcome.is_cancel() {
        Valuation::Cancel
    } else {
        Valuation::Probability(outcome.probability(prior))
    }
}

/// Expand a resolution request into the pools it resolves.
///
/// # Errors
/// Returns [`DomainError::InvalidResolution`] when the market variant does not
/// accept the outcome shape, or when a named answer is missing or resolved.
pub fn resolution_targets(
    contract: &Contract,
    answer_id: Option<&AnswerId>,
    outcome: &ResolutionOutcome,
) -> Result<Vec<PoolTarget>, DomainError> {
    outcome.validate()?;

    let unresolved_answer = |id: &AnswerId| {
        contract
            .answer(id)
            .filter(|a| !a.is_resolved())
            .ok_or_else(|| invalid(format!("answer {id} is missing or already resolved")))
    };

    match (contract.mechanism, answer_id) {
        (Mechanism::SinglePool, Some(_)) => Err(invalid("binary markets have no answers")),
        (Mechanism::SinglePool, None) => {
            if outcome.is_multi_answer() {
                return Err(invalid(format!("{outcome} needs a multi-answer market")));
            }
            let prior = contract.probability(None).unwrap_or(0.5);
            Ok(vec![PoolTarget::new(
                None,
                valuation_for(outcome, prior),
                prior,
            )])
        }
        (Mechanism::MultiPool, Some(id)) => {
            if outcome.is_multi_answer() {
                return Err(invalid(format!(
                    "{outcome} needs a sum-to-one market without an answer id"
                )));
            }
            let answer = unresolved_answer(id)?;
            Ok(vec![PoolTarget::new(
                Some(answer.id.clone()),
                valuation_for(outcome, answer.prob),
                answer.prob,
            )])
        }
        (Mechanism::MultiPool, None) => {
            if !outcome.is_cancel() {
                return Err(invalid("independent answers resolve one at a time"));
            }
            Ok(contract
                .unresolved_answers()
                .map(|a| PoolTarget::new(Some(a.id.clone()), Valuation::Cancel, a.prob))
                .collect())
        }
        (Mechanism::MultiPoolSumToOne, Some(_)) => Err(invalid(
            "sum-to-one markets resolve every answer at once",
        )),
        (Mechanism::MultiPoolSumToOne, None) => match outcome {
            ResolutionOutcome::Cancel => Ok(contract
                .unresolved_answers()
                .map(|a| PoolTarget::new(Some(a.id.clone()), Valuation::Cancel, a.prob))
                .collect()),
            ResolutionOutcome::Choice { answer_id } => {
                unresolved_answer(answer_id)?;
                Ok(contract
                    .unresolved_answers()
                    .map(|a| {
                        let q = if &a.id == answer_id { 1.0 } else { 0.0 };
                        PoolTarget::new(Some(a.id.clone()), Valuation::Probability(q), a.prob)
                    })
                    .collect())
            }
            ResolutionOutcome::Percentages { resolutions } => {
                for r in resolutions {
                    unresolved_answer(&r.answer_id)?;
                }
                Ok(contract
                    .unresolved_answers()
                    .map(|a| {
                        let percent = resolutions
                            .iter()
                            .filter(|r| r.answer_id == a.id)
                            .map(|r| r.percent)
                            .sum::<f64>();
                        PoolTarget::new(
                            Some(a.id.clone()),
                            Valuation::Probability(percent / 100.0),
                            a.prob,
                        )
                    })
                    .collect())
            }
            _ => Err(invalid(format!(
                "{outcome} is not accepted by sum-to-one markets; choose an answer"
            ))),
        },
    }
}

/// What one user receives from a settlement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPayout {
    pub bet_payout: f64,
    pub liquidity_payout: f64,
    /// Net mana put into the resolved pools through bets.
    pub invested: f64,
    /// Profit fee owed on a fee-bearing token.
    pub fee: f64,
}

impl UserPayout {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.bet_payout + self.liquidity_payout
    }

    #[must_use]
    pub fn profit(&self) -> f64 {
        self.bet_payout - self.invested
    }
}

/// Payouts of a settlement, per user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayoutPlan {
    pub users: BTreeMap<UserId, UserPayout>,
}

impl PayoutPlan {
    /// Charge `rate` of each user's positive trading profit.
    pub fn apply_profit_fee(&mut self, rate: f64) {
        for payout in self.users.values_mut() {
            payout.fee = rate * payout.profit().max(0.0);
        }
    }

    /// The most negative aggregate payout, if any user owes money.
    #[must_use]
    pub fn min_payout(&self) -> Option<(&UserId, f64)> {
        self.users
            .iter()
            .map(|(user, p)| (user, p.total()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.users.values().map(UserPayout::total).sum()
    }
}

fn in_pool(answer_id: Option<&AnswerId>, target: &PoolTarget) -> bool {
    answer_id == target.answer_id.as_ref()
}

/// Provider weights for one pool: market-wide provisions plus those that
/// funded this pool.
fn pool_weights(provisions: &[LiquidityProvision], target: &PoolTarget) -> BTreeMap<UserId, f64> {
    let funding: Vec<LiquidityProvision> = provisions
        .iter()
        .filter(|l| l.answer_id.is_none() || in_pool(l.answer_id.as_ref(), target))
        .cloned()
        .collect();
    if funding.is_empty() {
        provider_weights(provisions)
    } else {
        provider_weights(&funding)
    }
}

/// Value every position and liquidity provision against `targets`.
///
/// YES shares pay `q` and NO shares `1 - q`; liquidity providers split the
/// final value of each pool they funded by [`provider_weights`]. Cancelled pools refund what each
/// user put in. `whole_market` marks settlements that close the contract,
/// which refund contract-level provisions on cancel.
#[must_use]
pub fn plan_payouts(
    contract: &Contract,
    targets: &[PoolTarget],
    bets: &[Bet],
    provisions: &[LiquidityProvision],
    whole_market: bool,
) -> PayoutPlan {
    let mut plan = PayoutPlan::default();

    for target in targets {
        let mut shares: BTreeMap<&UserId, (Shares, f64)> = BTreeMap::new();
        for bet in bets
            .iter()
            .filter(|b| b.contract_id == contract.id && in_pool(b.answer_id.as_ref(), target))
        {
            let entry = shares.entry(&bet.user_id).or_default();
            match bet.outcome {
                Outcome::Yes => entry.0.yes += bet.shares,
                Outcome::No => entry.0.no += bet.shares,
            }
            entry.1 += bet.amount;
        }

        for (user_id, (held, invested)) in shares {
            let payout = plan.users.entry(user_id.clone()).or_default();
            payout.invested += invested;
            payout.bet_payout += match target.valuation {
                Valuation::Probability(q) => held.value_at(q),
                Valuation::Cancel => invested,
            };
        }

        match target.valuation {
            Valuation::Probability(q) => {
                let Some(state) = contract.state(target.answer_id.as_ref()) else {
                    continue;
                };
                let pool_value = state.pool.yes * q + state.pool.no * (1.0 - q);
                for (user_id, weight) in &pool_weights(provisions, target) {
                    plan.users.entry(user_id.clone()).or_default().liquidity_payout +=
                        weight * pool_value;
                }
            }
            Valuation::Cancel => {
                let pool_provisions: Vec<LiquidityProvision> = provisions
                    .iter()
                    .filter(|l| in_pool(l.answer_id.as_ref(), target))
                    .cloned()
                    .collect();
                refund_provisions(&mut plan, &pool_provisions);
            }
        }
    }

    let cancels_market = targets.iter().any(|t| t.valuation == Valuation::Cancel);
    if whole_market && contract.is_multi() && cancels_market {
        let market_provisions: Vec<LiquidityProvision> = provisions
            .iter()
            .filter(|l| l.answer_id.is_none())
            .cloned()
            .collect();
        refund_provisions(&mut plan, &market_provisions);
    }

    plan.users.retain(|_, p| p.total().abs() > 0.0 || p.invested.abs() > 0.0);
    plan
}

fn refund_provisions(plan: &mut PayoutPlan, provisions: &[LiquidityProvision]) {
    let mut seen: Vec<&UserId> = Vec::new();
    for provision in provisions {
        if seen.contains(&&provision.user_id) {
            continue;
        }
        seen.push(&provision.user_id);
        let net = net_contribution(provisions, &provision.user_id).max(0.0);
        plan.users
            .entry(provision.user_id.clone())
            .or_default()
            .liquidity_payout += net;
    }
}

/// Limits on money clawed back by a cancel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegativePayoutPolicy {
    pub threshold: f64,
    pub loosened_threshold: f64,
    pub loosen_at_traders: usize,
}

impl Default for NegativePayoutPolicy {
    fn default() -> Self {
        Self {
            threshold: -10.0,
            loosened_threshold: -250.0,
            loosen_at_traders: 100,
        }
    }
}

impl NegativePayoutPolicy {
    #[must_use]
    pub fn threshold_for(&self, unique_traders: usize) -> f64 {
        if unique_traders >= self.loosen_at_traders {
            self.loosened_threshold
        } else {
            self.threshold
        }
    }

    /// The first user whose payout is at or below the threshold.
    #[must_use]
    pub fn violation<'a>(
        &self,
        plan: &'a PayoutPlan,
        unique_traders: usize,
    ) -> Option<(&'a UserId, f64)> {
        let threshold = self.threshold_for(unique_traders);
        plan.min_payout().filter(|(_, payout)| *payout <= threshold)
    }
}
