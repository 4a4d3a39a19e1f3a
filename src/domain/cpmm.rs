//! Constant-product market maker pricing.
//!
//! A pool holds YES and NO reserves and a weight `p`. The pool constant is
//! `YES^p * NO^(1-p)` and the implied YES probability is
//! `p * NO / ((1 - p) * YES + p * NO)`. With `p = 0.5` this reduces to
//! `NO / (YES + NO)`.
//!
//! Every function here is pure: callers get a new state back and decide
//! whether to commit it.

use serde::{Deserialize, Serialize};

use super::error::{ensure_finite, ensure_positive, DomainError};
use super::fees::{FeeSchedule, Fees};
use super::money::EPSILON;
use super::outcome::Outcome;

/// Rounds used to converge the fee toward the average fill price.
const FEE_ITERATIONS: usize = 10;

/// Rounds used by bisection searches.
pub(crate) const BISECT_ITERATIONS: usize = 100;

/// YES/NO reserves backing a market or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    #[serde(rename = "YES")]
    pub yes: f64,
    #[serde(rename = "NO")]
    pub no: f64,
}

impl Pool {
    #[must_use]
    pub const fn new(yes: f64, no: f64) -> Self {
        Self { yes, no }
    }

    /// Reserve of the given outcome.
    #[must_use]
    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.yes,
            Outcome::No => self.no,
        }
    }

    fn is_valid(&self) -> bool {
        self.yes.is_finite() && self.no.is_finite() && self.yes > 0.0 && self.no > 0.0
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Pool plus weight: everything needed to price a trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpmmState {
    pub pool: Pool,
    pub p: f64,
}

impl CpmmState {
    #[must_use]
    pub const fn new(pool: Pool, p: f64) -> Self {
        Self { pool, p }
    }

    /// Unweighted state used by multi-answer pools.
    #[must_use]
    pub const fn fixed(pool: Pool) -> Self {
        Self { pool, p: 0.5 }
    }

    #[must_use]
    pub fn probability(&self) -> f64 {
        probability(self.pool, self.p)
    }
}

/// Result of buying shares from the pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Purchase {
    /// Shares received.
    pub shares: f64,
    /// Pool state after the trade.
    pub state: CpmmState,
    /// Fees taken out of the amount.
    pub fees: Fees,
}

/// Result of selling shares back to the pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sale {
    /// Mana received for the shares.
    pub sale_value: f64,
    /// Amount spent buying the opposite outcome before redeeming pairs.
    pub buy_amount: f64,
    pub state: CpmmState,
    pub fees: Fees,
}

/// Accounting record of a liquidity change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidityChange {
    pub state: CpmmState,
    /// Reserve growth per side (negative on withdrawal).
    pub added: Pool,
    /// Minted shares that did not enter the pool, on `surplus_outcome`.
    pub surplus: f64,
    pub surplus_outcome: Outcome,
    /// Change of the pool constant.
    pub liquidity: f64,
}

/// Implied YES probability of a pool.
#[must_use]
pub fn probability(pool: Pool, p: f64) -> f64 {
    (p * pool.no) / ((1.0 - p) * pool.yes + p * pool.no)
}

/// Probability of `outcome` implied by a pool.
#[must_use]
pub fn outcome_probability(pool: Pool, p: f64, outcome: Outcome) -> f64 {
    outcome.prob_of(probability(pool, p))
}

/// Ensure a pool probability lies strictly inside (0, 1).
pub fn check_probability(prob: f64) -> Result<f64, DomainError> {
    if prob.is_finite() && prob > 0.0 && prob < 1.0 {
        Ok(prob)
    } else {
        Err(DomainError::ProbabilityOutOfRange { prob })
    }
}

/// Ensure a pool is usable: positive finite reserves and an interior price.
pub fn check_state(state: &CpmmState) -> Result<(), DomainError> {
    if !state.pool.is_valid() {
        return Err(DomainError::ProbabilityOutOfRange {
            prob: state.probability(),
        });
    }
    check_probability(state.probability()).map(|_| ())
}

/// Pool constant `YES^p * NO^(1-p)`.
#[must_use]
pub fn liquidity(pool: Pool, p: f64) -> f64 {
    pool.yes.powf(p) * pool.no.powf(1.0 - p)
}

/// Shares bought by `amount` before fees, keeping the pool constant.
pub fn shares_for_amount(
    pool: Pool,
    p: f64,
    amount: f64,
    outcome: Outcome,
) -> Result<f64, DomainError> {
    let amount = ensure_finite(amount)?;
    if amount == 0.0 {
        return Ok(0.0);
    }
    let Pool { yes: y, no: n } = pool;
    let k = liquidity(pool, p);

    let shares = match outcome {
        Outcome::Yes => y + amount - (k * (amount + n).powf(p - 1.0)).powf(1.0 / p),
        Outcome::No => n + amount - (k * (amount + y).powf(-p)).powf(1.0 / (1.0 - p)),
    };
    ensure_finite(shares)
}

/// Taker fee for `amount`, iterated toward the average fill price.
///
/// Returns the amount left to trade after fees and the fee split.
pub fn fees_for_amount(
    state: &CpmmState,
    amount: f64,
    outcome: Outcome,
    schedule: &FeeSchedule,
) -> Result<(f64, Fees), DomainError> {
    if amount == 0.0 || schedule.is_free() {
        return Ok((amount, Fees::ZERO));
    }

    let mut fee = 0.0;
    for _ in 0..FEE_ITERATIONS {
        let after_fee = amount - fee;
        let shares = shares_for_amount(state.pool, state.p, after_fee, outcome)?;
        if shares <= 0.0 {
            break;
        }
        let average_prob = after_fee / shares;
        fee = schedule.taker_fee(shares, average_prob);
    }

    let fee = fee.clamp(0.0, amount);
    Ok((amount - fee, schedule.split(fee)))
}

/// Buy `outcome` with `amount` mana.
///
/// The liquidity share of the fee is added back to the pool.
pub fn buy(
    state: &CpmmState,
    amount: f64,
    outcome: Outcome,
    schedule: &FeeSchedule,
) -> Result<Purchase, DomainError> {
    let amount = ensure_finite(amount)?;
    if amount == 0.0 {
        return Ok(Purchase {
            shares: 0.0,
            state: *state,
            fees: Fees::ZERO,
        });
    }

    let (remaining, fees) = fees_for_amount(state, amount, outcome, schedule)?;
    let shares = shares_for_amount(state.pool, state.p, remaining, outcome)?;
    let Pool { yes: y, no: n } = state.pool;

    let pool = match outcome {
        Outcome::Yes => Pool::new(y - shares + remaining, n + remaining),
        Outcome::No => Pool::new(y + remaining, n - shares + remaining),
    };
    let mut next = CpmmState::new(pool, state.p);
    if fees.liquidity_fee > 0.0 {
        next = add_liquidity(&next, fees.liquidity_fee)?.state;
    }
    check_state(&next)?;

    Ok(Purchase {
        shares,
        state: next,
        fees,
    })
}

/// Sell `shares` of `outcome` back to the pool.
///
/// Implemented as buying the same number of opposite shares and redeeming the
/// YES+NO pairs for one unit each.
pub fn sell(
    state: &CpmmState,
    shares: f64,
    outcome: Outcome,
    schedule: &FeeSchedule,
) -> Result<Sale, DomainError> {
    let shares = ensure_positive(shares)?;
    let opposite = outcome.opposite();

    let upper = shares * (1.0 + schedule.taker_fee) + 1.0;
    let buy_amount = bisect(0.0, upper, |amount| {
        match buy(state, amount, opposite, schedule) {
            Ok(purchase) => purchase.shares - shares,
            Err(_) => 1.0,
        }
    });

    let purchase = buy(state, buy_amount, opposite, schedule)?;
    Ok(Sale {
        sale_value: shares - buy_amount,
        buy_amount,
        state: purchase.state,
        fees: purchase.fees,
    })
}

/// Amount that moves the pool exactly to `prob` for `outcome` (before fees).
///
/// Returns `f64::INFINITY` for probabilities outside (0, 1).
#[must_use]
pub fn amount_to_prob(state: &CpmmState, prob: f64, outcome: Outcome) -> f64 {
    if !(prob > 0.0 && prob < 1.0) {
        return f64::INFINITY;
    }
    let CpmmState { pool, p } = *state;
    let Pool { yes: y, no: n } = pool;
    let k = liquidity(pool, p);

    let amount = match outcome {
        Outcome::Yes => {
            let r = (p * (prob - 1.0)) / ((p - 1.0) * prob);
            r.powf(-p) * (k - n * r.powf(p))
        }
        Outcome::No => {
            let prob = 1.0 - prob;
            let r = ((1.0 - p) * (prob - 1.0)) / (-p * prob);
            r.powf(p - 1.0) * (k - y * r.powf(1.0 - p))
        }
    };
    amount.max(0.0)
}

/// Amount, fees included, that moves the pool exactly to `prob`.
#[must_use]
pub fn amount_to_prob_with_fees(
    state: &CpmmState,
    prob: f64,
    outcome: Outcome,
    schedule: &FeeSchedule,
) -> f64 {
    let base = amount_to_prob(state, prob, outcome);
    if !base.is_finite() || base <= 0.0 || schedule.is_free() {
        return base;
    }

    let upper = base * (1.0 + schedule.taker_fee) + 1.0;
    bisect(base, upper, |amount| match buy(state, amount, outcome, schedule) {
        Ok(purchase) => match outcome {
            Outcome::Yes => purchase.state.probability() - prob,
            Outcome::No => prob - purchase.state.probability(),
        },
        Err(_) => 1.0,
    })
}

/// Fee-free amount needed to buy exactly `shares` of `outcome` at p = 0.5.
#[must_use]
pub fn amount_to_buy_shares_fixed_p(pool: Pool, shares: f64, outcome: Outcome) -> f64 {
    let Pool { yes: y, no: n } = pool;
    let other = match outcome {
        Outcome::Yes => n,
        Outcome::No => y,
    };
    (shares - y - n + (4.0 * other * shares + (y + n - shares).powi(2)).sqrt()) / 2.0
}

/// Add liquidity by scaling both reserves proportionally.
///
/// The larger reserve grows by `amount`; the smaller grows by the same factor,
/// so the probability is unchanged. The minted shares of the smaller side that
/// do not fit are reported as surplus.
pub fn add_liquidity(state: &CpmmState, amount: f64) -> Result<LiquidityChange, DomainError> {
    let amount = ensure_finite(amount)?;
    let CpmmState { pool, p } = *state;
    let larger = pool.yes.max(pool.no);
    if larger <= 0.0 {
        return Err(DomainError::InsufficientLiquidity {
            yes: pool.yes,
            no: pool.no,
        });
    }

    let factor = amount / larger;
    let added = Pool::new(pool.yes * factor, pool.no * factor);
    let next = Pool::new(pool.yes + added.yes, pool.no + added.no);

    let (surplus, surplus_outcome) = if pool.yes >= pool.no {
        (amount - added.no, Outcome::No)
    } else {
        (amount - added.yes, Outcome::Yes)
    };

    Ok(LiquidityChange {
        state: CpmmState::new(next, p),
        added,
        surplus,
        surplus_outcome,
        liquidity: liquidity(next, p) - liquidity(pool, p),
    })
}

/// Withdraw `amount` from both reserves, re-solving `p` to hold the price.
///
/// Fails when either reserve would drop to `floor` or below.
pub fn remove_liquidity(
    state: &CpmmState,
    amount: f64,
    floor: f64,
) -> Result<LiquidityChange, DomainError> {
    let amount = ensure_finite(amount)?;
    let CpmmState { pool, p } = *state;
    let prob = probability(pool, p);

    let next = Pool::new(pool.yes - amount, pool.no - amount);
    if next.yes <= floor.max(0.0) || next.no <= floor.max(0.0) {
        return Err(DomainError::InsufficientLiquidity {
            yes: next.yes,
            no: next.no,
        });
    }

    let new_p = prob * next.yes / (next.no * (1.0 - prob) + prob * next.yes);
    let next_state = CpmmState::new(next, new_p);
    check_state(&next_state)?;

    Ok(LiquidityChange {
        state: next_state,
        added: Pool::new(-amount, -amount),
        surplus: 0.0,
        surplus_outcome: Outcome::Yes,
        liquidity: liquidity(next, new_p) - liquidity(pool, new_p),
    })
}

/// Spread `amount` of liquidity over sum-to-one answer pools.
///
/// Shares thrown away by one answer are recycled: NO shares of an answer are
/// worth YES shares in every other answer, and one YES share in every answer
/// is worth one unit of mana. Returns the new pools and the mana that could not
/// be placed.
#[must_use]
pub fn add_liquidity_sum_to_one(pools: &[Pool], amount: f64) -> (Vec<Pool>, f64) {
    let count = pools.len();
    let mut next = pools.to_vec();
    if count == 0 {
        return (next, amount);
    }

    let mut remaining = amount;
    for _ in 0..BISECT_ITERATIONS {
        if remaining <= EPSILON {
            return (next, 0.0);
        }
        let per_answer = remaining / count as f64;
        let mut yes_thrown = vec![0.0; count];

        for i in 0..count {
            let pool = next[i];
            let prob = probability(pool, 0.5);
            let (pool, thrown_yes, thrown_no) = if prob < 0.5 {
                let no_added = prob / (1.0 - prob) * per_answer;
                (
                    Pool::new(pool.yes + per_answer, pool.no + no_added),
                    0.0,
                    per_answer - no_added,
                )
            } else {
                let yes_added = (1.0 - prob) / prob * per_answer;
                (
                    Pool::new(pool.yes + yes_added, pool.no + per_answer),
                    per_answer - yes_added,
                    0.0,
                )
            };
            next[i] = pool;
            yes_thrown[i] += thrown_yes;
            for (j, thrown) in yes_thrown.iter_mut().enumerate() {
                if j != i {
                    *thrown += thrown_no;
                }
            }
        }

        remaining = yes_thrown.iter().copied().fold(f64::INFINITY, f64::min);
    }
    (next, remaining.max(0.0))
}

/// Find the root of an increasing function on `[lo, hi]`.
pub(crate) fn bisect(mut lo: f64, mut hi: f64, mut f: impl FnMut(f64) -> f64) -> f64 {
    for _ in 0..BISECT_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        let value = f(mid);
        if value.abs() < EPSILON * 1e-3 {
            return mid;
        }
        if value < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-13 {
            break;
        }
    }
    (lo + hi) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn even() -> CpmmState {
        CpmmState::fixed(Pool::new(100.0, 100.0))
    }

    #[test]
    fn even_pool_is_fifty_percent() {
        assert!((probability(Pool::new(100.0, 100.0), 0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn weighted_pool_uses_p() {
        let prob = probability(Pool::new(100.0, 100.0), 0.7);
        assert!((prob - 0.7).abs() < 1e-12);
    }

    #[test]
    fn ten_mana_yes_matches_closed_form() {
        let purchase = buy(&even(), 10.0, Outcome::Yes, &FeeSchedule::FREE).unwrap();

        let expected_shares = 110.0 - 10_000.0 / 110.0;
        assert!((purchase.shares - expected_shares).abs() < 1e-9);
        assert!((purchase.state.pool.yes - 10_000.0 / 110.0).abs() < 1e-9);
        assert!((purchase.state.pool.no - 110.0).abs() < 1e-9);

        let expected_prob = 110.0 / (110.0 + 10_000.0 / 110.0);
        assert!((purchase.state.probability() - expected_prob).abs() < 1e-12);
    }

    #[test]
    fn buy_preserves_pool_constant_without_fees() {
        let state = CpmmState::new(Pool::new(80.0, 140.0), 0.35);
        let purchase = buy(&state, 25.0, Outcome::No, &FeeSchedule::FREE).unwrap();
        let before = liquidity(state.pool, state.p);
        let after = liquidity(purchase.state.pool, purchase.state.p);
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn buying_moves_probability_toward_outcome() {
        let state = even();
        let yes = buy(&state, 30.0, Outcome::Yes, &FeeSchedule::default()).unwrap();
        let no = buy(&state, 30.0, Outcome::No, &FeeSchedule::default()).unwrap();
        assert!(yes.state.probability() > 0.5);
        assert!(no.state.probability() < 0.5);
    }

    #[test]
    fn selling_moves_probability_away() {
        let state = even();
        let sale = sell(&state, 20.0, Outcome::Yes, &FeeSchedule::default()).unwrap();
        assert!(sale.state.probability() < 0.5);
        assert!(sale.sale_value > 0.0);
    }

    #[test]
    fn round_trip_never_creates_value() {
        let schedule = FeeSchedule::default();
        for amount in [1.0, 10.0, 75.0, 400.0] {
            for outcome in [Outcome::Yes, Outcome::No] {
                let purchase = buy(&even(), amount, outcome, &schedule).unwrap();
                let sale = sell(&purchase.state, purchase.shares, outcome, &schedule).unwrap();
                assert!(
                    sale.sale_value <= amount + 1e-9,
                    "amount {amount} {outcome}: got back {}",
                    sale.sale_value
                );
            }
        }
    }

    #[test]
    fn free_round_trip_restores_pool() {
        let purchase = buy(&even(), 40.0, Outcome::No, &FeeSchedule::FREE).unwrap();
        let sale = sell(&purchase.state, purchase.shares, Outcome::No, &FeeSchedule::FREE).unwrap();
        assert!((sale.sale_value - 40.0).abs() < 1e-6);
        assert!((sale.state.pool.yes - 100.0).abs() < 1e-6);
    }

    #[test]
    fn huge_bets_keep_probability_interior() {
        let purchase = buy(&even(), 1e9, Outcome::Yes, &FeeSchedule::FREE).unwrap();
        let prob = purchase.state.probability();
        assert!(prob > 0.0 && prob < 1.0);
    }

    #[test]
    fn amount_to_prob_lands_on_target() {
        let state = CpmmState::new(Pool::new(120.0, 90.0), 0.4);
        for (target, outcome) in [(0.6, Outcome::Yes), (0.2, Outcome::No)] {
            let amount = amount_to_prob(&state, target, outcome);
            let purchase = buy(&state, amount, outcome, &FeeSchedule::FREE).unwrap();
            assert!((purchase.state.probability() - target).abs() < 1e-9);
        }
    }

    #[test]
    fn amount_to_prob_with_fees_accounts_for_fee() {
        let state = even();
        let schedule = FeeSchedule::default();
        let amount = amount_to_prob_with_fees(&state, 0.7, Outcome::Yes, &schedule);
        assert!(amount > amount_to_prob(&state, 0.7, Outcome::Yes));
        let purchase = buy(&state, amount, Outcome::Yes, &schedule).unwrap();
        assert!((purchase.state.probability() - 0.7).abs() < 1e-7);
    }

    #[test]
    fn fixed_p_share_cost_matches_buy() {
        let pool = Pool::new(150.0, 60.0);
        let amount = amount_to_buy_shares_fixed_p(pool, 25.0, Outcome::No);
        let purchase = buy(&CpmmState::fixed(pool), amount, Outcome::No, &FeeSchedule::FREE).unwrap();
        assert!((purchase.shares - 25.0).abs() < 1e-9);
    }

    #[test]
    fn add_liquidity_preserves_probability() {
        let state = CpmmState::new(Pool::new(300.0, 100.0), 0.5);
        let change = add_liquidity(&state, 50.0).unwrap();
        assert!((change.state.probability() - state.probability()).abs() < 1e-12);
        assert!((change.added.yes - 50.0).abs() < 1e-12);
        assert_eq!(change.surplus_outcome, Outcome::No);
        assert!((change.surplus - (50.0 - 50.0 / 3.0)).abs() < 1e-9);
        assert!(change.liquidity > 0.0);
    }

    #[test]
    fn remove_liquidity_preserves_probability() {
        let state = CpmmState::new(Pool::new(300.0, 100.0), 0.5);
        let change = remove_liquidity(&state, 40.0, 0.0).unwrap();
        assert!((change.state.probability() - state.probability()).abs() < 1e-12);
        assert!((change.state.pool.no - 60.0).abs() < 1e-12);
    }

    #[test]
    fn remove_liquidity_rejects_emptying_a_reserve() {
        let state = even();
        let result = remove_liquidity(&state, 100.0, 0.0);
        assert!(matches!(result, Err(DomainError::InsufficientLiquidity { .. })));
        let result = remove_liquidity(&state, 60.0, 50.0);
        assert!(matches!(result, Err(DomainError::InsufficientLiquidity { .. })));
    }

    #[test]
    fn sum_to_one_liquidity_keeps_probabilities() {
        let pools = vec![
            Pool::new(50.0, 150.0),
            Pool::new(150.0, 50.0),
            Pool::new(150.0, 50.0),
        ];
        let before: Vec<f64> = pools.iter().map(|p| probability(*p, 0.5)).collect();
        let (after, leftover) = add_liquidity_sum_to_one(&pools, 90.0);
        for (pool, prob) in after.iter().zip(before) {
            assert!((probability(*pool, 0.5) - prob).abs() < 1e-9);
        }
        assert!(leftover < 1e-6);
        assert!(after[0].yes > pools[0].yes);
    }

    #[test]
    fn non_finite_amounts_are_rejected() {
        assert!(buy(&even(), f64::NAN, Outcome::Yes, &FeeSchedule::FREE).is_err());
        assert!(sell(&even(), -1.0, Outcome::Yes, &FeeSchedule::FREE).is_err());
    }
}
