//! Balance movements of one mutation.
//!
//! [`Postings`] turns transfers into txn rows and balance deltas for a
//! [`WriteBatch`], checking funds against a running balance: the snapshot read
//! at the start of the mutation adjusted by the earlier transfers of the same
//! commit. After the commit, [`reconcile`] compares the stored balances of the
//! debited users with what the postings expected.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::id::{TxnId, UserId};
use crate::domain::money::{to_money, Money, Token};
use crate::domain::txn::{Account, AccountKind, Txn, TxnCategory, TxnData};
use crate::domain::user::User;
use crate::error::{Error, Result};
use crate::port::outbound::store::{BalanceUpdate, CommitReceipt, RowKey, Versioned, WriteBatch};

/// Expected post-commit balances of debited users.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expectation {
    pub balances: Vec<(Account, Token, Money)>,
}

/// Ledger entries collected by one mutation.
#[derive(Debug)]
pub struct Postings {
    now: DateTime<Utc>,
    running: BTreeMap<(UserId, Token), Money>,
    versions: Vec<(UserId, u64)>,
    debited: Vec<(UserId, Token)>,
    deltas: BTreeMap<(Account, Token), Money>,
    txns: Vec<Txn>,
}

impl Postings {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            running: BTreeMap::new(),
            versions: Vec::new(),
            debited: Vec::new(),
            deltas: BTreeMap::new(),
            txns: Vec::new(),
        }
    }

    /// Register the snapshot of a user whose balance this mutation reads.
    ///
    /// The user row's version becomes part of the commit's expectations.
    pub fn track(&mut self, user: &Versioned<User>) {
        let id = &user.value.id;
        if self.versions.iter().any(|(u, _)| u == id) {
            return;
        }
        self.versions.push((id.clone(), user.version));
        for token in [Token::Mana, Token::Cash, Token::Points] {
            self.running
                .insert((id.clone(), token), user.value.balance_of(token));
        }
    }

    /// Running balance of a tracked user.
    #[must_use]
    pub fn balance(&self, user_id: &UserId, token: Token) -> Option<Money> {
        self.running.get(&(user_id.clone(), token)).copied()
    }

    /// Move `amount` (AMM units) from one account to another.
    pub fn transfer(
        &mut self,
        from: Account,
        to: Account,
        amount: f64,
        token: Token,
        category: TxnCategory,
        data: TxnData,
    ) -> Result<Option<TxnId>> {
        let amount = to_money(amount)?;
        self.transfer_money(from, to, amount, token, category, data)
    }

    /// Move an exact amount.
    ///
    /// Non-administrative transfers must be positive and may not overdraw a
    /// user. Administrative transfers skip both checks; a negative amount is
    /// booked in the opposite direction and a zero amount books nothing.
    pub fn transfer_money(
        &mut self,
        from: Account,
        to: Account,
        amount: Money,
        token: Token,
        category: TxnCategory,
        data: TxnData,
    ) -> Result<Option<TxnId>> {
        let administrative = category.is_administrative();
        if !administrative && amount <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "{} transfer must be positive, got {amount}",
                category_name(category)
            )));
        }
        if amount.is_zero() {
            return Ok(None);
        }
        let (from, to, amount) = if amount < Decimal::ZERO {
            (to, from, -amount)
        } else {
            (from, to, amount)
        };

        if let Some(user_id) = from.user_id() {
            let available = self.balance(&user_id, token).ok_or_else(|| {
                Error::Invariant(format!("debit from untracked user {user_id}"))
            })?;
            if !administrative && available < amount {
                return Err(Error::InsufficientBalance {
                    user_id: user_id.to_string(),
                    token: token.to_string(),
                    needed: amount,
                    available,
                });
            }
            if !self.debited.contains(&(user_id.clone(), token)) {
                self.debited.push((user_id.clone(), token));
            }
            self.running.insert((user_id, token), available - amount);
        }
        if let Some(user_id) = to.user_id() {
            if let Some(balance) = self.running.get_mut(&(user_id, token)) {
                *balance += amount;
            }
        }

        *self.deltas.entry((from.clone(), token)).or_default() -= amount;
        *self.deltas.entry((to.clone(), token)).or_default() += amount;

        let txn = Txn {
            id: TxnId::generate(),
            from,
            to,
            amount,
            token,
            category,
            created_time: self.now,
            data,
        };
        let id = txn.id.clone();
        self.txns.push(txn);
        Ok(Some(id))
    }

    /// Append an already built row, typically a reversal.
    pub fn append(&mut self, txn: Txn) -> Result<()> {
        let Txn {
            from,
            to,
            amount,
            token,
            category,
            data,
            ..
        } = txn;
        self.transfer_money(from, to, amount, token, category, data)
            .map(|_| ())
    }

    #[must_use]
    pub fn txns(&self) -> &[Txn] {
        &self.txns
    }

    /// Move everything into `batch` and return what the commit should leave.
    pub fn write_into(self, batch: &mut WriteBatch) -> Expectation {
        for (user_id, version) in self.versions {
            batch.expect(RowKey::User(user_id), Some(version));
        }
        for ((account, token), delta) in self.deltas {
            if !delta.is_zero() {
                batch.balances.push(BalanceUpdate {
                    account,
                    token,
                    delta,
                });
            }
        }
        batch.txns.extend(self.txns);

        let balances = self
            .debited
            .into_iter()
            .filter_map(|(user_id, token)| {
                let expected = self.running.get(&(user_id.clone(), token)).copied()?;
                Some((Account::user(&user_id), token, expected))
            })
            .collect();
        Expectation { balances }
    }
}

fn category_name(category: TxnCategory) -> String {
    serde_json::to_value(category)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{category:?}"))
}

/// Compare stored balances with expectations. Returns the mismatch count.
///
/// Mismatches and negative balances are logged, never raised.
pub fn reconcile(expectation: &Expectation, receipt: &CommitReceipt) -> usize {
    let mut mismatches = 0;
    for (account, token, expected) in &expectation.balances {
        match receipt.balance(account, *token) {
            Some(actual) if actual != *expected => {
                mismatches += 1;
                warn!(
                    account = %account,
                    token = %token,
                    expected = %expected,
                    actual = %actual,
                    "reconciliation mismatch"
                );
            }
            Some(actual) if actual < Decimal::ZERO && account.kind == AccountKind::User => {
                warn!(account = %account, token = %token, balance = %actual, "negative balance");
            }
            Some(_) => {}
            None => {
                mismatches += 1;
                warn!(account = %account, token = %token, "reconciliation: balance missing from receipt");
            }
        }
    }
    mismatches
}
