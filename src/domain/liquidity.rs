//! Liquidity provisions and provider weights.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{AnswerId, ContractId, LiquidityId, UserId};

/// A contribution to (positive) or withdrawal from (negative) a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityProvision {
    pub id: LiquidityId,
    pub contract_id: ContractId,
    #[serde(default)]
    pub answer_id: Option<AnswerId>,
    pub user_id: UserId,
    pub amount: f64,
    /// Change of the pool constant caused by this provision.
    pub liquidity: f64,
    pub created_time: DateTime<Utc>,
}

/// Net contribution of one user.
#[must_use]
pub fn net_contribution(provisions: &[LiquidityProvision], user_id: &UserId) -> f64 {
    provisions
        .iter()
        .filter(|l| &l.user_id == user_id)
        .map(|l| l.amount)
        .sum()
}

/// Share of the final pool owed to each provider.
///
/// Weights are net contributions floored at zero and normalized. When every
/// provider has withdrawn everything, the earliest provider owns the pool.
#[must_use]
pub fn provider_weights(provisions: &[LiquidityProvision]) -> BTreeMap<UserId, f64> {
    let mut net: BTreeMap<UserId, f64> = BTreeMap::new();
    for provision in provisions {
        *net.entry(provision.user_id.clone()).or_default() += provision.amount;
    }
    for value in net.values_mut() {
        *value = value.max(0.0);
    }

    let total: f64 = net.values().sum();
    if total <= 0.0 {
        let mut weights = BTreeMap::new();
        if let Some(first) = provisions.iter().min_by_key(|l| l.created_time) {
            weights.insert(first.user_id.clone(), 1.0);
        }
        return weights;
    }

    net.into_iter()
        .filter(|(_, amount)| *amount > 0.0)
        .map(|(user, amount)| (user, amount / total))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn provision(user: &str, amount: f64, minutes: i64) -> LiquidityProvision {
        LiquidityProvision {
            id: LiquidityId::generate(),
            contract_id: ContractId::from("c1"),
            answer_id: None,
            user_id: UserId::from(user),
            amount,
            liquidity: amount,
            created_time: Utc::now() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn weights_are_proportional_to_net_contribution() {
        let weights = provider_weights(&[
            provision("a", 100.0, 0),
            provision("b", 300.0, 1),
            provision("b", -100.0, 2),
        ]);
        assert!((weights[&UserId::from("a")] - 1.0 / 3.0).abs() < 1e-12);
        assert!((weights[&UserId::from("b")] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn negative_net_is_floored() {
        let weights = provider_weights(&[provision("a", 50.0, 0), provision("b", -20.0, 1)]);
        assert_eq!(weights.len(), 1);
        assert!((weights[&UserId::from("a")] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn all_withdrawn_goes_to_first_provider() {
        let weights = provider_weights(&[
            provision("b", 10.0, 1),
            provision("a", 10.0, 0),
            provision("a", -10.0, 2),
            provision("b", -10.0, 3),
        ]);
        assert_eq!(weights.len(), 1);
        assert!((weights[&UserId::from("a")] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn net_contribution_sums_signed_amounts() {
        let provisions = [provision("a", 40.0, 0), provision("a", -15.0, 1)];
        assert!((net_contribution(&provisions, &UserId::from("a")) - 25.0).abs() < 1e-12);
    }
}
