//! Liquidity provision and withdrawal.

use chrono::Utc;
use tracing::info;

use crate::application::continuation::Committed;
use crate::application::ledger::{self, Postings};
use crate::application::queue::Priority;
use crate::domain::bet::Bet;
use crate::domain::contract::{Contract, Mechanism};
use crate::domain::cpmm::{self, Pool};
use crate::domain::error::{ensure_positive, DomainError};
use crate::domain::id::{AnswerId, ContractId, LiquidityId, UserId};
use crate::domain::liquidity::{net_contribution, LiquidityProvision};
use crate::domain::money::EPSILON;
use crate::domain::patch::{ContractField, Update};
use crate::domain::txn::{Account, TxnCategory, TxnData};
use crate::error::{Error, Result};
use crate::port::outbound::notifier::Event;
use crate::port::outbound::store::{LedgerStore, RowKey, WriteBatch};

use super::service::{contract_key, merged_bets, metrics_for, post, user_key, Exchange};

/// Result of pricing a deposit into the market's pools.
#[derive(Debug, Default)]
struct Deposit {
    liquidity: f64,
    /// Zero-cost positions for minted shares that did not fit a pool.
    surplus_bets: Vec<Bet>,
    /// Mana left over after spreading over sum-to-one answers.
    subsidy: f64,
}

/// Add `amount` to the pools of `market` on behalf of `user_id`.
fn deposit(market: &mut Contract, user_id: &UserId, amount: f64) -> Result<Deposit> {
    let now = Utc::now();
    match market.mechanism {
        Mechanism::SinglePool => {
            let state = market
                .state(None)
                .ok_or_else(|| Error::Invariant("binary market without a pool".into()))?;
            let change = cpmm::add_liquidity(&state, amount)?;
            market.set_state(None, change.state)?;
            let mut surplus_bets = Vec::new();
            if change.surplus > EPSILON {
                surplus_bets.push(Bet::redemption(
                    market.id.clone(),
                    None,
                    user_id.clone(),
                    change.surplus_outcome,
                    change.surplus,
                    state.probability(),
                    now,
                ));
            }
            Ok(Deposit {
                liquidity: change.liquidity,
                surplus_bets,
                subsidy: 0.0,
            })
        }
        Mechanism::MultiPool => {
            let ids: Vec<_> = market.unresolved_answers().map(|a| a.id.clone()).collect();
            if ids.is_empty() {
                return Err(Error::Conflict("every answer is resolved".into()));
            }
            let share = amount / ids.len() as f64;
            let mut result = Deposit::default();
            for id in ids {
                let answer = market
                    .answer_mut(&id)
                    .ok_or_else(|| DomainError::UnknownAnswer(id.to_string()))?;
                let prob = answer.prob;
                let change = cpmm::add_liquidity(&answer.state(), share)?;
                answer.set_pool(change.state.pool);
                answer.total_liquidity += share;
                result.liquidity += change.liquidity;
                if change.surplus > EPSILON {
                    result.surplus_bets.push(Bet::redemption(
                        market.id.clone(),
                        Some(id.clone()),
                        user_id.clone(),
                        change.surplus_outcome,
                        change.surplus,
                        prob,
                        now,
                    ));
                }
            }
            Ok(result)
        }
        Mechanism::MultiPoolSumToOne => {
            let answers: Vec<(AnswerId, Pool)> = market
                .unresolved_answers()
                .map(|a| (a.id.clone(), a.pool))
                .collect();
            if answers.is_empty() {
                return Err(Error::Conflict("every answer is resolved".into()));
            }
            let pools: Vec<Pool> = answers.iter().map(|(_, pool)| *pool).collect();
            let before: f64 = pools.iter().map(|p| cpmm::liquidity(*p, 0.5)).sum();
            let (next, leftover) = cpmm::add_liquidity_sum_to_one(&pools, amount);
            let after: f64 = next.iter().map(|p| cpmm::liquidity(*p, 0.5)).sum();
            for ((id, old), pool) in answers.iter().zip(next) {
                let answer = market
                    .answer_mut(id)
                    .ok_or_else(|| DomainError::UnknownAnswer(id.to_string()))?;
                answer.total_liquidity += cpmm::liquidity(pool, 0.5) - cpmm::liquidity(*old, 0.5);
                answer.set_pool(pool);
            }
            Ok(Deposit {
                liquidity: after - before,
                surplus_bets: Vec::new(),
                subsidy: leftover,
            })
        }
    }
}

impl<S: LedgerStore> Exchange<S> {
    /// Deposit `amount` into the market's pools.
    ///
    /// Probabilities are unchanged. Binary and independent pools credit the
    /// provider with the minted shares that did not fit the pool.
    pub async fn add_liquidity(
        &self,
        contract_id: &ContractId,
        user_id: &UserId,
        amount: f64,
    ) -> Result<Committed<LiquidityProvision>> {
        ensure_positive(amount)?;
        let keys = vec![contract_key(contract_id), user_key(user_id)];
        let provision = self
            .mutate("add_liquidity", keys, Priority::Normal, || {
                self.try_add_liquidity(contract_id, user_id, amount)
            })
            .await?;
        let event = Event::LiquidityChanged {
            contract_id: provision.contract_id.clone(),
            answer_id: provision.answer_id.clone(),
            user_id: provision.user_id.clone(),
            amount: provision.amount,
        };
        Ok(self.committed(provision, vec![event]))
    }

    /// Withdraw up to the caller's net contribution from a binary pool.
    pub async fn remove_liquidity(
        &self,
        contract_id: &ContractId,
        user_id: &UserId,
        amount: f64,
    ) -> Result<Committed<LiquidityProvision>> {
        ensure_positive(amount)?;
        let keys = vec![contract_key(contract_id), user_key(user_id)];
        let provision = self
            .mutate("remove_liquidity", keys, Priority::Normal, || {
                self.try_remove_liquidity(contract_id, user_id, amount)
            })
            .await?;
        let event = Event::LiquidityChanged {
            contract_id: provision.contract_id.clone(),
            answer_id: None,
            user_id: provision.user_id.clone(),
            amount: provision.amount,
        };
        Ok(self.committed(provision, vec![event]))
    }

    async fn try_add_liquidity(
        &self,
        contract_id: &ContractId,
        user_id: &UserId,
        amount: f64,
    ) -> Result<LiquidityProvision> {
        let now = Utc::now();
        let contract = self.load_contract(contract_id).await?;
        let user = self.load_user(user_id).await?;
        if contract.value.is_resolved() {
            return Err(Error::Conflict(format!("market {contract_id} is resolved")));
        }

        let mut market = contract.value.clone();
        let deposit = deposit(&mut market, user_id, amount)?;
        market.check_invariants()?;

        let provision = LiquidityProvision {
            id: LiquidityId::generate(),
            contract_id: contract_id.clone(),
            answer_id: None,
            user_id: user_id.clone(),
            amount,
            liquidity: deposit.liquidity,
            created_time: now,
        };

        let mut postings = Postings::new(now);
        postings.track(&user);
        post(
            &mut postings,
            Account::user(user_id),
            Account::contract(contract_id),
            amount,
            market.token,
            TxnCategory::AddLiquidity,
            TxnData::for_contract(contract_id),
        )?;

        let mut batch = WriteBatch::new();
        batch.expect(RowKey::Contract(contract_id.clone()), Some(contract.version));
        batch.contract_updates.push((
            contract_id.clone(),
            Update::Increment {
                field: ContractField::TotalLiquidity,
                by: amount - deposit.subsidy,
            },
        ));
        if deposit.subsidy > EPSILON {
            batch.contract_updates.push((
                contract_id.clone(),
                Update::Increment {
                    field: ContractField::SubsidyPool,
                    by: deposit.subsidy,
                },
            ));
        }
        if !deposit.surplus_bets.is_empty() {
            let stored = self.store.bets(contract_id).await?;
            let merged = merged_bets(&stored, &deposit.surplus_bets);
            batch.metrics = metrics_for(&market, &merged, &[user_id]);
            for bet in deposit.surplus_bets {
                batch.expect(RowKey::Bet(bet.id.clone()), None);
                batch.put_bet(bet);
            }
        }
        batch.liquidity.push(provision.clone());
        batch.put_contract(market);

        let expectation = postings.write_into(&mut batch);
        let receipt = self.store.commit(batch).await?;
        ledger::reconcile(&expectation, &receipt);

        info!(
            contract_id = %contract_id,
            user_id = %user_id,
            amount,
            liquidity = provision.liquidity,
            subsidy = deposit.subsidy,
            "liquidity added"
        );
        Ok(provision)
    }

    async fn try_remove_liquidity(
        &self,
        contract_id: &ContractId,
        user_id: &UserId,
        amount: f64,
    ) -> Result<LiquidityProvision> {
        let now = Utc::now();
        let contract = self.load_contract(contract_id).await?;
        let user = self.load_user(user_id).await?;
        let mut market = contract.value.clone();
        if market.mechanism != Mechanism::SinglePool {
            return Err(DomainError::UnsupportedMechanism {
                operation: "liquidity withdrawal",
                mechanism: market.mechanism.as_str(),
            }
            .into());
        }
        if market.is_resolved() {
            return Err(Error::Conflict(format!("market {contract_id} is resolved")));
        }

        let provisions = self.store.liquidity(contract_id).await?;
        let net = net_contribution(&provisions, user_id);
        if amount > net + EPSILON {
            return Err(Error::Validation(format!(
                "cannot withdraw {amount}, net contribution is {net}"
            )));
        }

        let state = market
            .state(None)
            .ok_or_else(|| Error::Invariant("binary market without a pool".into()))?;
        let change = cpmm::remove_liquidity(&state, amount, self.settings.markets.min_pool_reserve)?;
        market.set_state(None, change.state)?;
        market.check_invariants()?;

        let provision = LiquidityProvision {
            id: LiquidityId::generate(),
            contract_id: contract_id.clone(),
            answer_id: None,
            user_id: user_id.clone(),
            amount: -amount,
            liquidity: change.liquidity,
            created_time: now,
        };

        let mut postings = Postings::new(now);
        postings.track(&user);
        post(
            &mut postings,
            Account::contract(contract_id),
            Account::user(user_id),
            amount,
            market.token,
            TxnCategory::RemoveLiquidity,
            TxnData::for_contract(contract_id),
        )?;

        let mut batch = WriteBatch::new();
        batch.expect(RowKey::Contract(contract_id.clone()), Some(contract.version));
        batch.contract_updates.push((
            contract_id.clone(),
            Update::Increment {
                field: ContractField::TotalLiquidity,
                by: -amount,
            },
        ));
        batch.liquidity.push(provision.clone());
        batch.put_contract(market);

        let expectation = postings.write_into(&mut batch);
        let receipt = self.store.commit(batch).await?;
        ledger::reconcile(&expectation, &receipt);

        info!(
            contract_id = %contract_id,
            user_id = %user_id,
            amount,
            p = change.state.p,
            "liquidity removed"
        );
        Ok(provision)
    }
}
