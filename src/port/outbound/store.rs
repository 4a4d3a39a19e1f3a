//! Persistence port for the ledger and the market aggregates.
//!
//! Reads return rows together with their version. Writes are collected in a
//! [`WriteBatch`] and applied by [`LedgerStore::commit`] atomically: either
//! every row, balance delta, field update and txn lands, or nothing does.

use std::future::Future;

use crate::domain::bet::Bet;
use crate::domain::contract::Contract;
use crate::domain::id::{BetId, ContractId, UserId};
use crate::domain::liquidity::LiquidityProvision;
use crate::domain::metric::ContractMetric;
use crate::domain::money::{Money, Token};
use crate::domain::patch::{ContractField, Update, UserField};
use crate::domain::txn::{Account, Txn, TxnCategory};
use crate::domain::user::User;
use crate::error::Result;

/// A row and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }
}

/// Identity of a versioned row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    User(UserId),
    Contract(ContractId),
    Bet(BetId),
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user {id}"),
            Self::Contract(id) => write!(f, "contract {id}"),
            Self::Bet(id) => write!(f, "bet {id}"),
        }
    }
}

/// Signed change to the cached balance of one account.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceUpdate {
    pub account: Account,
    pub token: Token,
    pub delta: Money,
}

/// Everything one mutation writes.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Versions the mutation read. `None` requires the row to be absent.
    pub expected: Vec<(RowKey, Option<u64>)>,
    pub users: Vec<User>,
    pub contracts: Vec<Contract>,
    pub bets: Vec<Bet>,
    pub liquidity: Vec<LiquidityProvision>,
    pub txns: Vec<Txn>,
    pub balances: Vec<BalanceUpdate>,
    pub contract_updates: Vec<(ContractId, Update<ContractField>)>,
    pub user_updates: Vec<(UserId, Update<UserField>)>,
    /// Replaces the stored metric of the same (user, contract, answer).
    pub metrics: Vec<ContractMetric>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&mut self, key: RowKey, version: Option<u64>) {
        if !self.expected.iter().any(|(k, _)| k == &key) {
            self.expected.push((key, version));
        }
    }

    /// Queue a contract write, replacing an earlier write of the same row.
    pub fn put_contract(&mut self, contract: Contract) {
        self.contracts.retain(|c| c.id != contract.id);
        self.contracts.push(contract);
    }

    /// Queue a bet write, replacing an earlier write of the same row.
    pub fn put_bet(&mut self, bet: Bet) {
        self.bets.retain(|b| b.id != bet.id);
        self.bets.push(bet);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.contracts.is_empty()
            && self.bets.is_empty()
            && self.liquidity.is_empty()
            && self.txns.is_empty()
            && self.balances.is_empty()
            && self.contract_updates.is_empty()
            && self.user_updates.is_empty()
            && self.metrics.is_empty()
    }
}

/// Balances of the accounts a commit touched, as stored afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    pub balances: Vec<(Account, Token, Money)>,
}

impl CommitReceipt {
    #[must_use]
    pub fn balance(&self, account: &Account, token: Token) -> Option<Money> {
        self.balances
            .iter()
            .find(|(a, t, _)| a == account && *t == token)
            .map(|(_, _, amount)| *amount)
    }
}

/// Selects ledger rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxnFilter {
    pub contract_id: Option<ContractId>,
    pub resolution_id: Option<String>,
    pub category: Option<TxnCategory>,
    pub account: Option<Account>,
}

impl TxnFilter {
    #[must_use]
    pub fn matches(&self, txn: &Txn) -> bool {
        self.contract_id
            .as_ref()
            .map_or(true, |id| txn.data.contract_id.as_ref() == Some(id))
            && self
                .resolution_id
                .as_ref()
                .map_or(true, |id| txn.data.resolution_id.as_ref() == Some(id))
            && self.category.map_or(true, |c| txn.category == c)
            && self
                .account
                .as_ref()
                .map_or(true, |a| &txn.from == a || &txn.to == a)
    }
}

/// Storage of users, markets, bets, liquidity, metrics and the ledger.
pub trait LedgerStore: Send + Sync {
    fn user(&self, id: &UserId) -> impl Future<Output = Result<Option<Versioned<User>>>> + Send;

    fn contract(
        &self,
        id: &ContractId,
    ) -> impl Future<Output = Result<Option<Versioned<Contract>>>> + Send;

    fn bet(&self, id: &BetId) -> impl Future<Output = Result<Option<Versioned<Bet>>>> + Send;

    /// All bets of a contract in creation order.
    fn bets(
        &self,
        contract_id: &ContractId,
    ) -> impl Future<Output = Result<Vec<Versioned<Bet>>>> + Send;

    fn liquidity(
        &self,
        contract_id: &ContractId,
    ) -> impl Future<Output = Result<Vec<LiquidityProvision>>> + Send;

    fn metrics(
        &self,
        contract_id: &ContractId,
    ) -> impl Future<Output = Result<Vec<ContractMetric>>> + Send;

    /// Ledger rows in insertion order.
    fn txns(&self, filter: &TxnFilter) -> impl Future<Output = Result<Vec<Txn>>> + Send;

    /// Cached balance of any account. Unknown accounts hold zero.
    fn balance(
        &self,
        account: &Account,
        token: Token,
    ) -> impl Future<Output = Result<Money>> + Send;

    /// Apply the batch atomically.
    ///
    /// Fails with [`crate::error::Error::TransientConflict`] when an expected
    /// version no longer matches.
    fn commit(&self, batch: WriteBatch) -> impl Future<Output = Result<CommitReceipt>> + Send;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::id::TxnId;
    use crate::domain::txn::TxnData;

    fn txn(category: TxnCategory, contract: &str) -> Txn {
        Txn {
            id: TxnId::generate(),
            from: Account::user(&UserId::from("u1")),
            to: Account::contract(&ContractId::from(contract)),
            amount: dec!(10),
            token: Token::Mana,
            category,
            created_time: Utc::now(),
            data: TxnData::for_contract(&ContractId::from(contract)),
        }
    }

    #[test]
    fn filter_matches_every_set_field() {
        let filter = TxnFilter {
            contract_id: Some(ContractId::from("c1")),
            category: Some(TxnCategory::Bet),
            ..TxnFilter::default()
        };
        assert!(filter.matches(&txn(TxnCategory::Bet, "c1")));
        assert!(!filter.matches(&txn(TxnCategory::Bet, "c2")));
        assert!(!filter.matches(&txn(TxnCategory::BetSale, "c1")));
        assert!(TxnFilter::default().matches(&txn(TxnCategory::BetSale, "c2")));
    }

    #[test]
    fn expectations_are_recorded_once() {
        let mut batch = WriteBatch::new();
        batch.expect(RowKey::User(UserId::from("u1")), Some(3));
        batch.expect(RowKey::User(UserId::from("u1")), Some(4));
        assert_eq!(batch.expected.len(), 1);
        assert_eq!(batch.expected[0].1, Some(3));
        assert!(batch.is_empty());
    }
}
