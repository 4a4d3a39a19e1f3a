//! Per-user position summaries derived from bets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bet::Bet;
use super::id::{AnswerId, ContractId, UserId};
use super::money::EPSILON;
use super::outcome::Outcome;

/// How positions are valued.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Valuation {
    /// YES shares pay `q`, NO shares pay `1 - q`.
    Probability(f64),
    /// Every position is worth what was put in.
    Cancel,
}

/// Shares held per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Shares {
    pub yes: f64,
    pub no: f64,
}

impl Shares {
    #[must_use]
    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.yes,
            Outcome::No => self.no,
        }
    }

    /// Value of the position at YES probability `q`.
    #[must_use]
    pub fn value_at(&self, q: f64) -> f64 {
        self.yes * q + self.no * (1.0 - q)
    }
}

/// Aggregate position of one user in one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractMetric {
    pub user_id: UserId,
    pub contract_id: ContractId,
    #[serde(default)]
    pub answer_id: Option<AnswerId>,
    pub total_shares: Shares,
    /// Net mana put in (sales subtract).
    pub invested: f64,
    pub payout: f64,
    pub profit: f64,
    pub has_shares: bool,
    #[serde(default)]
    pub last_bet_time: Option<DateTime<Utc>>,
}

impl ContractMetric {
    /// Metric of one user's bets in one pool.
    #[must_use]
    pub fn from_bets<'a>(
        user_id: UserId,
        contract_id: ContractId,
        answer_id: Option<AnswerId>,
        bets: impl IntoIterator<Item = &'a Bet>,
        valuation: Valuation,
    ) -> Self {
        let mut shares = Shares::default();
        let mut invested = 0.0;
        let mut last_bet_time = None;

        for bet in bets {
            match bet.outcome {
                Outcome::Yes => shares.yes += bet.shares,
                Outcome::No => shares.no += bet.shares,
            }
            invested += bet.amount;
            last_bet_time = last_bet_time.max(Some(bet.created_time));
        }

        let payout = match valuation {
            Valuation::Probability(q) => shares.value_at(q),
            Valuation::Cancel => invested,
        };

        Self {
            user_id,
            contract_id,
            answer_id,
            total_shares: shares,
            invested,
            payout,
            profit: payout - invested,
            has_shares: shares.yes.abs() > EPSILON || shares.no.abs() > EPSILON,
            last_bet_time,
        }
    }
}

/// Metrics for every (user, answer) pair appearing in `bets`.
#[must_use]
pub fn compute_metrics(
    contract_id: &ContractId,
    bets: &[Bet],
    valuation: impl Fn(Option<&AnswerId>) -> Valuation,
) -> Vec<ContractMetric> {
    let mut grouped: BTreeMap<(UserId, Option<AnswerId>), Vec<&Bet>> = BTreeMap::new();
    for bet in bets.iter().filter(|b| &b.contract_id == contract_id) {
        grouped
            .entry((bet.user_id.clone(), bet.answer_id.clone()))
            .or_default()
            .push(bet);
    }

    grouped
        .into_iter()
        .map(|((user_id, answer_id), bets)| {
            let value = valuation(answer_id.as_ref());
            ContractMetric::from_bets(user_id, contract_id.clone(), answer_id, bets, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fees::Fees;
    use crate::domain::id::BetId;

    fn bet(user: &str, outcome: Outcome, amount: f64, shares: f64) -> Bet {
        Bet {
            id: BetId::generate(),
            contract_id: ContractId::from("c1"),
            answer_id: None,
            user_id: UserId::from(user),
            created_time: Utc::now(),
            outcome,
            amount,
            shares,
            order_amount: None,
            limit_prob: None,
            expires_at: None,
            prob_before: 0.5,
            prob_after: 0.5,
            fills: vec![],
            fees: Fees::ZERO,
            is_filled: true,
            is_cancelled: false,
            is_redemption: false,
            is_sale: amount < 0.0,
        }
    }

    #[test]
    fn yes_resolution_pays_yes_shares() {
        let bets = vec![
            bet("a", Outcome::Yes, 10.0, 19.0),
            bet("a", Outcome::No, 5.0, 8.0),
        ];
        let metrics = compute_metrics(&ContractId::from("c1"), &bets, |_| {
            Valuation::Probability(1.0)
        });
        assert_eq!(metrics.len(), 1);
        let m = &metrics[0];
        assert!((m.payout - 19.0).abs() < 1e-12);
        assert!((m.profit - 4.0).abs() < 1e-12);
    }

    #[test]
    fn sales_reduce_invested_and_shares() {
        let bets = vec![
            bet("a", Outcome::Yes, 10.0, 19.0),
            bet("a", Outcome::Yes, -12.0, -19.0),
        ];
        let metrics =
            compute_metrics(&ContractId::from("c1"), &bets, |_| Valuation::Cancel);
        let m = &metrics[0];
        assert!(!m.has_shares);
        assert!((m.invested + 2.0).abs() < 1e-12);
        assert!((m.payout + 2.0).abs() < 1e-12);
    }

    #[test]
    fn users_are_grouped_separately() {
        let bets = vec![
            bet("a", Outcome::Yes, 10.0, 19.0),
            bet("b", Outcome::No, 10.0, 19.0),
        ];
        let metrics = compute_metrics(&ContractId::from("c1"), &bets, |_| {
            Valuation::Probability(0.25)
        });
        assert_eq!(metrics.len(), 2);
        assert!((metrics[1].payout - 19.0 * 0.75).abs() < 1e-12);
    }
}
