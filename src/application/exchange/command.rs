//! Requests accepted by the exchange and the results it returns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::bet::Bet;
use crate::domain::contract::{AddAnswersMode, Mechanism};
use crate::domain::id::{AnswerId, BetId, ContractId, UserId};
use crate::domain::matching::MakerFill;
use crate::domain::money::{Money, Token};
use crate::domain::outcome::Outcome;
use crate::domain::resolution::ResolutionOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceBet {
    pub contract_id: ContractId,
    pub user_id: UserId,
    pub amount: f64,
    pub outcome: Outcome,
    #[serde(default)]
    pub answer_id: Option<AnswerId>,
    #[serde(default)]
    pub limit_prob: Option<f64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellShares {
    pub contract_id: ContractId,
    pub user_id: UserId,
    pub outcome: Outcome,
    /// Everything held when absent.
    #[serde(default)]
    pub shares: Option<f64>,
    #[serde(default)]
    pub answer_id: Option<AnswerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMarket {
    pub creator_id: UserId,
    pub question: String,
    pub mechanism: Mechanism,
    #[serde(default)]
    pub token: Token,
    /// Initial liquidity paid by the creator.
    pub ante: f64,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub add_answers_mode: AddAnswersMode,
    /// Adds an Other answer to sum-to-one markets.
    #[serde(default)]
    pub other_bucket: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveMarket {
    pub contract_id: ContractId,
    pub user_id: UserId,
    pub outcome: ResolutionOutcome,
    #[serde(default)]
    pub answer_id: Option<AnswerId>,
}

/// A committed trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BetPlaced {
    pub bet: Bet,
    #[serde(skip)]
    pub makers: Vec<MakerFill>,
    pub cancelled_orders: Vec<BetId>,
    pub prob_after: f64,
}

/// A committed resolution or its undo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub contract_id: ContractId,
    pub answer_id: Option<AnswerId>,
    pub resolution_id: String,
    pub outcome: String,
    /// Net amount credited per user. Negative means debited.
    pub payouts: BTreeMap<UserId, Money>,
    pub fees: Money,
    pub txn_count: usize,
}
