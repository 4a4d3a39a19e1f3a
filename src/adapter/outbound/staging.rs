//! Applying a write batch onto the rows it touches.
//!
//! Backends load touched rows through [`RowSource`], stage the whole batch in
//! memory and persist the staged rows only when every step succeeded. Puts
//! land first, then balance deltas, then field updates. Every row that
//! changes gets exactly one version bump per commit.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::domain::bet::Bet;
use crate::domain::contract::Contract;
use crate::domain::id::{ContractId, UserId};
use crate::domain::money::{Money, Token};
use crate::domain::patch::Patchable;
use crate::domain::txn::Account;
use crate::domain::user::User;
use crate::error::{Error, Result};
use crate::port::outbound::store::{CommitReceipt, RowKey, Versioned, WriteBatch};

/// Read access a backend grants while a commit is being staged.
pub(crate) trait RowSource {
    /// Current version of a row, `None` when absent.
    fn version(&mut self, key: &RowKey) -> Result<Option<u64>>;

    fn user(&mut self, id: &UserId) -> Result<Option<Versioned<User>>>;

    fn contract(&mut self, id: &ContractId) -> Result<Option<Versioned<Contract>>>;

    /// Balance of a non-user account.
    fn system_balance(&mut self, account: &Account, token: Token) -> Result<Money>;
}

/// Rows a commit will write, carrying their new versions.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    pub users: BTreeMap<UserId, Versioned<User>>,
    pub contracts: BTreeMap<ContractId, Versioned<Contract>>,
    pub bets: Vec<Versioned<Bet>>,
    pub system_balances: BTreeMap<(Account, Token), Money>,
    pub receipt: CommitReceipt,
}

impl Staged {
    fn user_mut(&mut self, source: &mut impl RowSource, id: &UserId) -> Result<&mut User> {
        let row = match self.users.entry(id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let stored = source
                    .user(id)?
                    .ok_or_else(|| Error::Invariant(format!("write to unknown user {id}")))?;
                entry.insert(Versioned::new(stored.value, stored.version + 1))
            }
        };
        Ok(&mut row.value)
    }

    fn contract_mut(
        &mut self,
        source: &mut impl RowSource,
        id: &ContractId,
    ) -> Result<&mut Contract> {
        let row = match self.contracts.entry(id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let stored = source
                    .contract(id)?
                    .ok_or_else(|| Error::Invariant(format!("write to unknown contract {id}")))?;
                entry.insert(Versioned::new(stored.value, stored.version + 1))
            }
        };
        Ok(&mut row.value)
    }

    fn balance_of(&self, account: &Account, token: Token) -> Option<Money> {
        match account.user_id() {
            Some(id) => self.users.get(&id).map(|u| u.value.balance_of(token)),
            None => self.system_balances.get(&(account.clone(), token)).copied(),
        }
    }
}

fn next_version(source: &mut impl RowSource, key: &RowKey) -> Result<u64> {
    Ok(source.version(key)?.unwrap_or(0) + 1)
}

/// Check the batch's expectations and stage every row it writes.
///
/// # Errors
/// [`Error::TransientConflict`] when an expected version no longer matches;
/// [`Error::Invariant`] or a validation error when an update does not apply.
pub(crate) fn stage(batch: &WriteBatch, source: &mut impl RowSource) -> Result<Staged> {
    for (key, expected) in &batch.expected {
        let current = source.version(key)?;
        if current != *expected {
            return Err(Error::TransientConflict(format!(
                "{key} (read {expected:?}, now {current:?})"
            )));
        }
    }

    let mut staged = Staged::default();
    for user in &batch.users {
        let version = next_version(source, &RowKey::User(user.id.clone()))?;
        staged
            .users
            .insert(user.id.clone(), Versioned::new(user.clone(), version));
    }
    for contract in &batch.contracts {
        let version = next_version(source, &RowKey::Contract(contract.id.clone()))?;
        staged
            .contracts
            .insert(contract.id.clone(), Versioned::new(contract.clone(), version));
    }
    for bet in &batch.bets {
        let version = next_version(source, &RowKey::Bet(bet.id.clone()))?;
        staged.bets.push(Versioned::new(bet.clone(), version));
    }

    let mut touched: Vec<(Account, Token)> = Vec::new();
    for update in &batch.balances {
        match update.account.user_id() {
            Some(id) => {
                *staged.user_mut(source, &id)?.balance_mut(update.token) += update.delta;
            }
            None => {
                let key = (update.account.clone(), update.token);
                let slot = match staged.system_balances.entry(key) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let current = source.system_balance(&update.account, update.token)?;
                        entry.insert(current)
                    }
                };
                *slot += update.delta;
            }
        }
        let key = (update.account.clone(), update.token);
        if !touched.contains(&key) {
            touched.push(key);
        }
    }

    for (id, update) in &batch.contract_updates {
        staged.contract_mut(source, id)?.apply(update)?;
    }
    for (id, update) in &batch.user_updates {
        staged.user_mut(source, id)?.apply(update)?;
    }

    staged.receipt.balances = touched
        .into_iter()
        .filter_map(|(account, token)| {
            let balance = staged.balance_of(&account, token)?;
            Some((account, token, balance))
        })
        .collect();
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::cpmm::Pool;
    use crate::domain::patch::{ContractField, Update};
    use crate::port::outbound::store::BalanceUpdate;
    use crate::testkit::domain::{binary_contract, user};

    #[derive(Default)]
    struct Fixed {
        users: HashMap<UserId, Versioned<User>>,
        contracts: HashMap<ContractId, Versioned<Contract>>,
    }

    impl RowSource for Fixed {
        fn version(&mut self, key: &RowKey) -> Result<Option<u64>> {
            Ok(match key {
                RowKey::User(id) => self.users.get(id).map(|u| u.version),
                RowKey::Contract(id) => self.contracts.get(id).map(|c| c.version),
                RowKey::Bet(_) => None,
            })
        }

        fn user(&mut self, id: &UserId) -> Result<Option<Versioned<User>>> {
            Ok(self.users.get(id).cloned())
        }

        fn contract(&mut self, id: &ContractId) -> Result<Option<Versioned<Contract>>> {
            Ok(self.contracts.get(id).cloned())
        }

        fn system_balance(&mut self, _: &Account, _: Token) -> Result<Money> {
            Ok(dec!(100))
        }
    }

    fn source() -> Fixed {
        let mut source = Fixed::default();
        let alice = user("alice", dec!(50));
        source
            .users
            .insert(alice.id.clone(), Versioned::new(alice, 4));
        let contract = binary_contract("c1", Pool::new(100.0, 100.0));
        source
            .contracts
            .insert(contract.id.clone(), Versioned::new(contract, 7));
        source
    }

    #[test]
    fn stale_expectation_is_a_transient_conflict() {
        let mut batch = WriteBatch::new();
        batch.expect(RowKey::User(UserId::from("alice")), Some(3));
        let result = stage(&batch, &mut source());
        assert!(matches!(result, Err(Error::TransientConflict(_))));
    }

    #[test]
    fn absent_expectation_rejects_existing_row() {
        let mut batch = WriteBatch::new();
        batch.expect(RowKey::User(UserId::from("alice")), None);
        assert!(stage(&batch, &mut source()).is_err());
    }

    #[test]
    fn balances_and_updates_bump_versions_once() {
        let contract_id = ContractId::from("c1");
        let mut batch = WriteBatch::new();
        batch.balances.push(BalanceUpdate {
            account: Account::user(&UserId::from("alice")),
            token: Token::Mana,
            delta: dec!(-20),
        });
        batch.balances.push(BalanceUpdate {
            account: Account::contract(&contract_id),
            token: Token::Mana,
            delta: dec!(20),
        });
        for by in [5.0, 15.0] {
            batch.contract_updates.push((
                contract_id.clone(),
                Update::Increment {
                    field: ContractField::Volume,
                    by,
                },
            ));
        }

        let staged = stage(&batch, &mut source()).unwrap();

        let alice = &staged.users[&UserId::from("alice")];
        assert_eq!(alice.version, 5);
        assert_eq!(alice.value.balance, dec!(30));
        let contract = &staged.contracts[&contract_id];
        assert_eq!(contract.version, 8);
        assert!((contract.value.volume - 20.0).abs() < 1e-12);
        assert_eq!(
            staged.receipt.balance(&Account::contract(&contract_id), Token::Mana),
            Some(dec!(120))
        );
    }

    #[test]
    fn unknown_user_balance_is_an_invariant_breach() {
        let mut batch = WriteBatch::new();
        batch.balances.push(BalanceUpdate {
            account: Account::user(&UserId::from("ghost")),
            token: Token::Mana,
            delta: dec!(1),
        });
        assert!(matches!(
            stage(&batch, &mut source()),
            Err(Error::Invariant(_))
        ));
    }
}
