//! Tunables of the exchange service.

use chrono::Duration;

use crate::application::retry::RetryPolicy;
use crate::domain::fees::FeeSchedule;
use crate::domain::payout::NegativePayoutPolicy;

/// Market creation and answer rules.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketRules {
    /// Mana charged for adding an answer.
    pub answer_cost: f64,
    /// Maximum unresolved answers per market.
    pub max_answers: usize,
    /// Smallest reserve a liquidity withdrawal may leave.
    pub min_pool_reserve: f64,
    /// Account receiving platform fees and funding grants.
    pub bank_id: String,
}

impl Default for MarketRules {
    fn default() -> Self {
        Self {
            answer_cost: 25.0,
            max_answers: 100,
            min_pool_reserve: 1.0,
            bank_id: "bank".to_string(),
        }
    }
}

/// Settlement rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionRules {
    pub negative_payouts: NegativePayoutPolicy,
    /// How long the creator may undo a resolution.
    pub unresolve_window: Duration,
    /// Fraction of positive trading profit charged on fee-bearing tokens.
    pub profit_fee: f64,
}

impl Default for ResolutionRules {
    fn default() -> Self {
        Self {
            negative_payouts: NegativePayoutPolicy::default(),
            unresolve_window: Duration::minutes(10),
            profit_fee: 0.1,
        }
    }
}

/// Everything the exchange needs besides its store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeSettings {
    pub fees: FeeSchedule,
    pub retry: RetryPolicy,
    pub markets: MarketRules,
    pub resolution: ResolutionRules,
}
