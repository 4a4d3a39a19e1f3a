//! In-memory ledger store.
//!
//! Holds every table behind one lock so a commit is atomic with respect to
//! every read. Used by tests and by the `replay` command when no database is
//! configured.

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::adapter::outbound::staging::{stage, RowSource};
use crate::domain::bet::Bet;
use crate::domain::contract::Contract;
use crate::domain::id::{AnswerId, BetId, ContractId, UserId};
use crate::domain::liquidity::LiquidityProvision;
use crate::domain::metric::ContractMetric;
use crate::domain::money::{Money, Token};
use crate::domain::txn::{Account, Txn};
use crate::domain::user::User;
use crate::error::Result;
use crate::port::outbound::store::{
    CommitReceipt, LedgerStore, RowKey, TxnFilter, Versioned, WriteBatch,
};

type MetricKey = (UserId, ContractId, Option<AnswerId>);

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, Versioned<User>>,
    contracts: HashMap<ContractId, Versioned<Contract>>,
    bets: Vec<Versioned<Bet>>,
    bet_index: HashMap<BetId, usize>,
    liquidity: Vec<LiquidityProvision>,
    txns: Vec<Txn>,
    system_balances: HashMap<(Account, Token), Money>,
    metrics: HashMap<MetricKey, ContractMetric>,
}

struct Snapshot<'a>(&'a Tables);

impl RowSource for Snapshot<'_> {
    fn version(&mut self, key: &RowKey) -> Result<Option<u64>> {
        let tables = self.0;
        Ok(match key {
            RowKey::User(id) => tables.users.get(id).map(|u| u.version),
            RowKey::Contract(id) => tables.contracts.get(id).map(|c| c.version),
            RowKey::Bet(id) => tables.bet_index.get(id).map(|&i| tables.bets[i].version),
        })
    }

    fn user(&mut self, id: &UserId) -> Result<Option<Versioned<User>>> {
        Ok(self.0.users.get(id).cloned())
    }

    fn contract(&mut self, id: &ContractId) -> Result<Option<Versioned<Contract>>> {
        Ok(self.0.contracts.get(id).cloned())
    }

    fn system_balance(&mut self, account: &Account, token: Token) -> Result<Money> {
        Ok(self
            .0
            .system_balances
            .get(&(account.clone(), token))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}

/// Ledger store kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl MemoryLedgerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger rows written so far.
    pub fn txn_count(&self) -> usize {
        self.tables.read().txns.len()
    }
}

impl LedgerStore for MemoryLedgerStore {
    async fn user(&self, id: &UserId) -> Result<Option<Versioned<User>>> {
        Ok(self.tables.read().users.get(id).cloned())
    }

    async fn contract(&self, id: &ContractId) -> Result<Option<Versioned<Contract>>> {
        Ok(self.tables.read().contracts.get(id).cloned())
    }

    async fn bet(&self, id: &BetId) -> Result<Option<Versioned<Bet>>> {
        let tables = self.tables.read();
        Ok(tables.bet_index.get(id).map(|&i| tables.bets[i].clone()))
    }

    async fn bets(&self, contract_id: &ContractId) -> Result<Vec<Versioned<Bet>>> {
        Ok(self
            .tables
            .read()
            .bets
            .iter()
            .filter(|b| &b.value.contract_id == contract_id)
            .cloned()
            .collect())
    }

    async fn liquidity(&self, contract_id: &ContractId) -> Result<Vec<LiquidityProvision>> {
        Ok(self
            .tables
            .read()
            .liquidity
            .iter()
            .filter(|l| &l.contract_id == contract_id)
            .cloned()
            .collect())
    }

    async fn metrics(&self, contract_id: &ContractId) -> Result<Vec<ContractMetric>> {
        let tables = self.tables.read();
        let mut metrics: Vec<ContractMetric> = tables
            .metrics
            .values()
            .filter(|m| &m.contract_id == contract_id)
            .cloned()
            .collect();
        metrics.sort_by(|a, b| {
            (&a.user_id, &a.answer_id).cmp(&(&b.user_id, &b.answer_id))
        });
        Ok(metrics)
    }

    async fn txns(&self, filter: &TxnFilter) -> Result<Vec<Txn>> {
        Ok(self
            .tables
            .read()
            .txns
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn balance(&self, account: &Account, token: Token) -> Result<Money> {
        let tables = self.tables.read();
        Ok(match account.user_id() {
            Some(id) => tables
                .users
                .get(&id)
                .map_or(Decimal::ZERO, |u| u.value.balance_of(token)),
            None => tables
                .system_balances
                .get(&(account.clone(), token))
                .copied()
                .unwrap_or(Decimal::ZERO),
        })
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let mut tables = self.tables.write();
        let staged = stage(&batch, &mut Snapshot(&*tables))?;

        tables.users.extend(staged.users);
        tables.contracts.extend(staged.contracts);
        for bet in staged.bets {
            match tables.bet_index.get(&bet.value.id).copied() {
                Some(index) => tables.bets[index] = bet,
                None => {
                    let index = tables.bets.len();
                    tables.bet_index.insert(bet.value.id.clone(), index);
                    tables.bets.push(bet);
                }
            }
        }
        tables.system_balances.extend(staged.system_balances);
        tables.liquidity.extend(batch.liquidity);
        tables.txns.extend(batch.txns);
        for metric in batch.metrics {
            let key = (
                metric.user_id.clone(),
                metric.contract_id.clone(),
                metric.answer_id.clone(),
            );
            tables.metrics.insert(key, metric);
        }
        Ok(staged.receipt)
    }
}
