//! Markets and their answers.
//!
//! A [`Contract`] is the aggregate root: answers of multi-answer markets live
//! inside it and are versioned and committed with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cpmm::{self, CpmmState, Pool};
use super::error::DomainError;
use super::fees::Fees;
use super::id::{AnswerId, ContractId, UserId};
use super::money::Token;
use super::resolution::Resolution;

/// Tolerance on the sum of answer probabilities.
pub const SUM_TO_ONE_TOLERANCE: f64 = 1e-6;

/// How a market prices its outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mechanism {
    /// One binary YES/NO pool.
    SinglePool,
    /// Independent binary pool per answer.
    MultiPool,
    /// Pools per answer whose probabilities sum to one.
    MultiPoolSumToOne,
}

impl Mechanism {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SinglePool => "single-pool",
            Self::MultiPool => "multi-pool",
            Self::MultiPoolSumToOne => "multi-pool-sum-to-one",
        }
    }
}

impl std::fmt::Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may add answers after creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddAnswersMode {
    #[default]
    Disabled,
    OnlyCreator,
    Anyone,
}

/// One answer of a multi-answer market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub index: usize,
    pub text: String,
    pub user_id: UserId,
    pub pool: Pool,
    pub prob: f64,
    #[serde(default)]
    pub total_liquidity: f64,
    #[serde(default)]
    pub subsidy_pool: f64,
    #[serde(default)]
    pub volume: f64,
    /// The catch-all bucket for outcomes not listed yet.
    #[serde(default)]
    pub is_other: bool,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    pub created_time: DateTime<Utc>,
}

impl Answer {
    #[must_use]
    pub fn new(
        id: AnswerId,
        index: usize,
        text: impl Into<String>,
        user_id: UserId,
        pool: Pool,
        created_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            index,
            text: text.into(),
            user_id,
            prob: cpmm::probability(pool, 0.5),
            total_liquidity: cpmm::liquidity(pool, 0.5),
            pool,
            subsidy_pool: 0.0,
            volume: 0.0,
            is_other: false,
            resolution: None,
            created_time,
        }
    }

    #[must_use]
    pub fn state(&self) -> CpmmState {
        CpmmState::fixed(self.pool)
    }

    /// Replace the pool and refresh the cached probability.
    pub fn set_pool(&mut self, pool: Pool) {
        self.pool = pool;
        self.prob = cpmm::probability(pool, 0.5);
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

/// A prediction market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub creator_id: UserId,
    pub question: String,
    pub mechanism: Mechanism,
    #[serde(default)]
    pub token: Token,
    /// Pool of single-pool markets. Unused for multi-answer markets.
    pub pool: Pool,
    pub p: f64,
    #[serde(default)]
    pub total_liquidity: f64,
    #[serde(default)]
    pub subsidy_pool: f64,
    #[serde(default)]
    pub collected_fees: Fees,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub unique_bettor_ids: Vec<UserId>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub add_answers_mode: AddAnswersMode,
    #[serde(default)]
    pub sum_to_one_with_other_bucket: bool,
    #[serde(default)]
    pub answers: Vec<Answer>,
}

impl Contract {
    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.mechanism != Mechanism::SinglePool
    }

    #[must_use]
    pub fn is_sum_to_one(&self) -> bool {
        self.mechanism == Mechanism::MultiPoolSumToOne
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Closed markets accept no trades but can still be resolved.
    #[must_use]
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.close_time.is_some_and(|close| close <= now)
    }

    #[must_use]
    pub fn answer(&self, id: &AnswerId) -> Option<&Answer> {
        self.answers.iter().find(|a| &a.id == id)
    }

    pub fn answer_mut(&mut self, id: &AnswerId) -> Option<&mut Answer> {
        self.answers.iter_mut().find(|a| &a.id == id)
    }

    /// The Other bucket of a sum-to-one market, if it has one.
    #[must_use]
    pub fn other_answer(&self) -> Option<&Answer> {
        self.answers.iter().find(|a| a.is_other)
    }

    pub fn unresolved_answers(&self) -> impl Iterator<Item = &Answer> {
        self.answers.iter().filter(|a| !a.is_resolved())
    }

    /// Pricing state of the contract pool or of one answer.
    #[must_use]
    pub fn state(&self, answer_id: Option<&AnswerId>) -> Option<CpmmState> {
        match answer_id {
            None if !self.is_multi() => Some(CpmmState::new(self.pool, self.p)),
            None => None,
            Some(id) => self.answer(id).map(Answer::state),
        }
    }

    /// YES probability of the contract pool or of one answer.
    #[must_use]
    pub fn probability(&self, answer_id: Option<&AnswerId>) -> Option<f64> {
        self.state(answer_id).map(|s| s.probability())
    }

    /// Write a new pricing state back into the aggregate.
    pub fn set_state(
        &mut self,
        answer_id: Option<&AnswerId>,
        state: CpmmState,
    ) -> Result<(), DomainError> {
        match answer_id {
            None => {
                self.pool = state.pool;
                self.p = state.p;
                Ok(())
            }
            Some(id) => {
                let answer = self
                    .answer_mut(id)
                    .ok_or_else(|| DomainError::UnknownAnswer(id.to_string()))?;
                answer.set_pool(state.pool);
                Ok(())
            }
        }
    }

    /// Sum of probabilities over unresolved answers.
    #[must_use]
    pub fn probability_sum(&self) -> f64 {
        self.unresolved_answers().map(|a| a.prob).sum()
    }

    /// Record a trader for the unique-bettor count. Returns false if known.
    pub fn add_bettor(&mut self, user_id: &UserId) -> bool {
        if self.unique_bettor_ids.contains(user_id) {
            return false;
        }
        self.unique_bettor_ids.push(user_id.clone());
        true
    }

    /// Verify the numeric invariants of every unresolved pool.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.is_resolved() {
            return Ok(());
        }
        if !self.is_multi() {
            return cpmm::check_state(&CpmmState::new(self.pool, self.p));
        }
        for answer in self.unresolved_answers() {
            cpmm::check_state(&answer.state())?;
        }
        let any_resolved = self.answers.iter().any(Answer::is_resolved);
        if self.is_sum_to_one() && !any_resolved && !self.answers.is_empty() {
            let sum = self.probability_sum();
            if (sum - 1.0).abs() > SUM_TO_ONE_TOLERANCE {
                return Err(DomainError::SumToOneViolated { sum });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(id: &str, index: usize, pool: Pool) -> Answer {
        Answer::new(
            AnswerId::from(id),
            index,
            id,
            UserId::from("creator"),
            pool,
            Utc::now(),
        )
    }

    fn contract(mechanism: Mechanism, answers: Vec<Answer>) -> Contract {
        Contract {
            id: ContractId::from("c1"),
            creator_id: UserId::from("creator"),
            question: "Will it rain?".into(),
            mechanism,
            token: Token::Mana,
            pool: Pool::new(100.0, 100.0),
            p: 0.5,
            total_liquidity: 100.0,
            subsidy_pool: 0.0,
            collected_fees: Fees::ZERO,
            volume: 0.0,
            unique_bettor_ids: vec![],
            close_time: None,
            created_time: Utc::now(),
            resolution: None,
            add_answers_mode: AddAnswersMode::Anyone,
            sum_to_one_with_other_bucket: false,
            answers,
        }
    }

    #[test]
    fn mechanism_serializes_kebab_case() {
        let json = serde_json::to_string(&Mechanism::MultiPoolSumToOne).unwrap();
        assert_eq!(json, "\"multi-pool-sum-to-one\"");
    }

    #[test]
    fn sum_to_one_invariant_detects_drift() {
        let balanced = contract(
            Mechanism::MultiPoolSumToOne,
            vec![
                answer("a", 0, Pool::new(100.0, 100.0)),
                answer("b", 1, Pool::new(100.0, 100.0)),
            ],
        );
        assert!(balanced.check_invariants().is_ok());

        let drifted = contract(
            Mechanism::MultiPoolSumToOne,
            vec![
                answer("a", 0, Pool::new(100.0, 100.0)),
                answer("b", 1, Pool::new(50.0, 100.0)),
            ],
        );
        assert!(matches!(
            drifted.check_invariants(),
            Err(DomainError::SumToOneViolated { .. })
        ));
    }

    #[test]
    fn independent_answers_need_not_sum_to_one() {
        let c = contract(
            Mechanism::MultiPool,
            vec![
                answer("a", 0, Pool::new(100.0, 100.0)),
                answer("b", 1, Pool::new(100.0, 100.0)),
                answer("c", 2, Pool::new(100.0, 100.0)),
            ],
        );
        assert!(c.check_invariants().is_ok());
    }

    #[test]
    fn state_is_per_answer_for_multi() {
        let c = contract(
            Mechanism::MultiPool,
            vec![answer("a", 0, Pool::new(300.0, 100.0))],
        );
        assert!(c.state(None).is_none());
        let prob = c.probability(Some(&AnswerId::from("a"))).unwrap();
        assert!((prob - 0.25).abs() < 1e-12);
    }

    #[test]
    fn bettors_are_recorded_once() {
        let mut c = contract(Mechanism::SinglePool, vec![]);
        assert!(c.add_bettor(&UserId::from("u")));
        assert!(!c.add_bettor(&UserId::from("u")));
        assert_eq!(c.unique_bettor_ids.len(), 1);
    }
}
