//! Builders for domain primitives used across tests.
//!
//! Provides concise factory functions for users and contracts so tests focus
//! on assertions rather than construction boilerplate. Pools are taken as
//! given; no ledger rows back them.

use chrono::Utc;
use rust_decimal::Decimal;

use crate::domain::contract::{AddAnswersMode, Answer, Contract, Mechanism};
use crate::domain::cpmm::{self, Pool};
use crate::domain::fees::Fees;
use crate::domain::id::{AnswerId, ContractId, UserId};
use crate::domain::money::Token;
use crate::domain::user::User;

/// A user holding `balance` mana.
pub fn user(id: &str, balance: Decimal) -> User {
    let mut user = User::new(UserId::from(id), id, Utc::now());
    user.balance = balance;
    user
}

fn contract(id: &str, mechanism: Mechanism, pool: Pool, answers: Vec<Answer>) -> Contract {
    Contract {
        id: ContractId::from(id),
        creator_id: UserId::from("creator"),
        question: format!("Question {id}?"),
        mechanism,
        token: Token::Mana,
        pool,
        p: 0.5,
        total_liquidity: cpmm::liquidity(pool, 0.5),
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

/// Answers `a0`, `a1`, ... over the given pools.
fn answers(pools: &[Pool]) -> Vec<Answer> {
    pools
        .iter()
        .enumerate()
        .map(|(index, pool)| {
            Answer::new(
                AnswerId::from(format!("a{index}")),
                index,
                format!("Answer {index}"),
                UserId::from("creator"),
                *pool,
                Utc::now(),
            )
        })
        .collect()
}

/// A binary market created by `creator`.
pub fn binary_contract(id: &str, pool: Pool) -> Contract {
    contract(id, Mechanism::SinglePool, pool, vec![])
}

/// An independent multi-answer market with one answer per pool.
pub fn multi_contract(id: &str, pools: &[Pool]) -> Contract {
    contract(id, Mechanism::MultiPool, Pool::default(), answers(pools))
}

/// A sum-to-one market of `n` answers at `1/n` each, funded with `ante`.
pub fn sum_to_one_contract(id: &str, n: usize, ante: f64) -> Contract {
    let pool = Pool::new(ante / 2.0, ante / (2.0 * (n as f64 - 1.0)));
    contract(
        id,
        Mechanism::MultiPoolSumToOne,
        Pool::default(),
        answers(&vec![pool; n]),
    )
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn sum_to_one_fixture_is_uniform() {
        let market = sum_to_one_contract("c1", 4, 120.0);
        assert_eq!(market.answers.len(), 4);
        assert!((market.probability_sum() - 1.0).abs() < 1e-9);
        for answer in &market.answers {
            assert!((answer.prob - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn user_fixture_holds_mana() {
        let alice = user("alice", dec!(25));
        assert_eq!(alice.balance_of(Token::Mana), dec!(25));
        assert_eq!(alice.balance_of(Token::Cash), Decimal::ZERO);
    }
}
