//! Settling markets and undoing settlements.
//!
//! Resolution values every position and liquidity provision against the
//! resolved pools and pays the difference out of the contract account in one
//! commit. Unresolution appends the inverse of every row the latest
//! resolution wrote; nothing is ever deleted from the ledger.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::continuation::Committed;
use crate::application::exchange::command::{ResolveMarket, Settlement};
use crate::application::exchange::service::{contract_key, valuation, Exchange};
use crate::application::ledger::{self, Postings};
use crate::application::queue::Priority;
use crate::domain::bet::Bet;
use crate::domain::contract::Contract;
use crate::domain::id::{AnswerId, ContractId, TxnId, UserId};
use crate::domain::metric::{compute_metrics, Valuation};
use crate::domain::money::{to_f64, to_money, Money, EPSILON};
use crate::domain::patch::{ContractField, Patchable, Update};
use crate::domain::payout::{plan_payouts, resolution_targets, PoolTarget};
use crate::domain::resolution::{Resolution, ResolutionOutcome, Resolved};
use crate::domain::txn::{Account, Txn, TxnCategory, TxnData};
use crate::domain::user::User;
use crate::error::{Error, Result};
use crate::port::outbound::notifier::{Event, ResolutionEvent};
use crate::port::outbound::store::{LedgerStore, RowKey, TxnFilter, Versioned, WriteBatch};

/// Record each target's resolution on `market`. Returns whether the whole
/// market is now resolved.
fn record_resolution(
    market: &mut Contract,
    targets: &[PoolTarget],
    outcome: &ResolutionOutcome,
    record: &Resolution,
) -> Result<bool> {
    let pool_record = |target: &PoolTarget| Resolution {
        outcome: match target.valuation {
            Valuation::Cancel => Resolved::Cancel,
            Valuation::Probability(q) => Resolved::from_probability(q),
        },
        probability: target.probability,
        ..record.clone()
    };

    if !market.is_multi() {
        if let Some(target) = targets.first() {
            market.resolution = Some(pool_record(target));
        }
        return Ok(true);
    }

    for target in targets {
        let Some(answer_id) = &target.answer_id else {
            continue;
        };
        let resolution = pool_record(target);
        market
            .answer_mut(answer_id)
            .ok_or_else(|| Error::not_found("answer", answer_id))?
            .resolution = Some(resolution);
    }

    let whole = outcome.is_cancel() || market.answers.iter().all(|a| a.is_resolved());
    if whole {
        let probability = targets
            .iter()
            .map(|t| t.probability)
            .sum::<f64>()
            .clamp(0.0, 1.0);
        market.resolution = Some(Resolution {
            outcome: if outcome.is_cancel() {
                Resolved::Cancel
            } else {
                Resolved::Mkt
            },
            probability,
            ..record.clone()
        });
    }
    Ok(whole)
}

/// Net amount each user received from `txns`.
fn net_by_user(txns: &[Txn]) -> BTreeMap<UserId, Money> {
    let mut net: BTreeMap<UserId, Money> = BTreeMap::new();
    for txn in txns {
        if let Some(user) = txn.to.user_id() {
            *net.entry(user).or_default() += txn.amount;
        }
        if let Some(user) = txn.from.user_id() {
            *net.entry(user).or_default() -= txn.amount;
        }
    }
    net
}

fn fee_total(txns: &[Txn], category: TxnCategory) -> Money {
    txns.iter()
        .filter(|t| t.category == category)
        .map(|t| t.amount)
        .sum()
}

impl<S: LedgerStore> Exchange<S> {
    /// Resolve a market or one answer of an independent multi-answer market.
    ///
    /// Runs ahead of queued trades on the same market.
    pub async fn resolve_market(&self, request: ResolveMarket) -> Result<Committed<Settlement>> {
        request.outcome.validate()?;
        let keys = vec![contract_key(&request.contract_id)];
        let settlement = self
            .mutate("resolve_market", keys, Priority::First, || {
                self.try_resolve(&request)
            })
            .await?;

        let event = Event::MarketResolved(ResolutionEvent {
            contract_id: settlement.contract_id.clone(),
            answer_id: settlement.answer_id.clone(),
            outcome: settlement.outcome.clone(),
            paid_users: settlement.payouts.len(),
            total_payout: to_f64(settlement.payouts.values().copied().sum()),
        });
        Ok(self.committed(settlement, vec![event]))
    }

    /// Undo the latest resolution of a market or answer.
    ///
    /// Allowed for elevated users at any time and for the creator within the
    /// configured window.
    pub async fn unresolve_market(
        &self,
        contract_id: &ContractId,
        user_id: &UserId,
        answer_id: Option<&AnswerId>,
    ) -> Result<Committed<Settlement>> {
        let keys = vec![contract_key(contract_id)];
        let settlement = self
            .mutate("unresolve_market", keys, Priority::First, || {
                self.try_unresolve(contract_id, user_id, answer_id)
            })
            .await?;
        let event = Event::MarketUnresolved {
            contract_id: settlement.contract_id.clone(),
            answer_id: settlement.answer_id.clone(),
            reverted_txns: settlement.txn_count,
        };
        Ok(self.committed(settlement, vec![event]))
    }

    /// Load and track every user in `ids`.
    async fn track_users<'a>(
        &self,
        postings: &mut Postings,
        ids: impl IntoIterator<Item = &'a UserId>,
    ) -> Result<()> {
        for id in ids {
            let user: Versioned<User> = self.load_user(id).await?;
            postings.track(&user);
        }
        Ok(())
    }

    async fn try_resolve(&self, request: &ResolveMarket) -> Result<Settlement> {
        let now = Utc::now();
        let contract = self.load_contract(&request.contract_id).await?;
        let resolver = self.load_user(&request.user_id).await?;
        let market = &contract.value;
        let answer_id = request.answer_id.as_ref();

        if market.is_resolved() {
            return Err(Error::Conflict(format!(
                "market {} is already resolved",
                market.id
            )));
        }
        if let Some(answer) = answer_id.and_then(|id| market.answer(id)) {
            if answer.is_resolved() {
                return Err(Error::Conflict(format!(
                    "answer {} is already resolved",
                    answer.id
                )));
            }
        }
        let elevated = resolver.value.role.is_elevated();
        if market.creator_id != request.user_id && !elevated {
            return Err(Error::Permission(format!(
                "only the creator may resolve market {}",
                market.id
            )));
        }

        let targets = resolution_targets(market, answer_id, &request.outcome)?;
        let mut resolved = market.clone();
        let resolution_id = Uuid::new_v4().to_string();
        let record = Resolution {
            id: resolution_id.clone(),
            outcome: Resolved::Mkt,
            probability: 0.0,
            resolver_id: request.user_id.clone(),
            resolved_time: now,
        };
        let whole_market = record_resolution(&mut resolved, &targets, &request.outcome, &record)?;

        let stored = self.store.bets(&market.id).await?;
        let bets: Vec<Bet> = stored.into_iter().map(|b| b.value).collect();
        let provisions = self.store.liquidity(&market.id).await?;
        let mut plan = plan_payouts(market, &targets, &bets, &provisions, whole_market);

        if request.outcome.is_cancel() && !elevated {
            let traders = market.unique_bettor_ids.len();
            if let Some((user, payout)) = self
                .settings
                .resolution
                .negative_payouts
                .violation(&plan, traders)
            {
                return Err(Error::Conflict(format!(
                    "cancelling would take {:.2} from user {user}; ask a moderator",
                    -payout
                )));
            }
        }
        if market.token.is_fee_bearing() {
            plan.apply_profit_fee(self.settings.resolution.profit_fee);
        }

        let mut postings = Postings::new(now);
        self.track_users(&mut postings, plan.users.keys()).await?;
        let pool = Account::contract(&market.id);
        let data = TxnData::for_contract(&market.id)
            .answer(answer_id)
            .resolution(&resolution_id);
        for (user_id, payout) in &plan.users {
            postings.transfer(
                pool.clone(),
                Account::user(user_id),
                payout.total(),
                market.token,
                TxnCategory::ResolutionPayout,
                data.clone(),
            )?;
            if payout.fee > EPSILON {
                postings.transfer(
                    Account::user(user_id),
                    self.bank(),
                    payout.fee,
                    market.token,
                    TxnCategory::ResolutionFee,
                    data.clone(),
                )?;
            }
        }

        let mut batch = WriteBatch::new();
        batch.expect(RowKey::Contract(market.id.clone()), Some(contract.version));
        if whole_market && market.subsidy_pool > EPSILON {
            let subsidy = to_money(market.subsidy_pool)?;
            if !subsidy.is_zero() {
                postings.transfer_money(
                    pool.clone(),
                    Account::user(&market.creator_id),
                    subsidy,
                    market.token,
                    TxnCategory::SubsidyReturn,
                    data.clone(),
                )?;
            }
            resolved.subsidy_pool = 0.0;
        }

        batch.metrics = compute_metrics(&market.id, &bets, |id| valuation(&resolved, id));
        batch.put_contract(resolved);

        let settlement = Settlement {
            contract_id: market.id.clone(),
            answer_id: request.answer_id.clone(),
            resolution_id: resolution_id.clone(),
            outcome: request.outcome.to_string(),
            payouts: net_by_user(postings.txns()),
            fees: fee_total(postings.txns(), TxnCategory::ResolutionFee),
            txn_count: postings.txns().len(),
        };

        let expectation = postings.write_into(&mut batch);
        let receipt = self.store.commit(batch).await?;
        let mismatches = ledger::reconcile(&expectation, &receipt);

        info!(
            contract_id = %settlement.contract_id,
            resolution_id = %resolution_id,
            outcome = %settlement.outcome,
            whole_market,
            paid_users = settlement.payouts.len(),
            txns = settlement.txn_count,
            mismatches,
            "market resolved"
        );
        Ok(settlement)
    }

    async fn try_unresolve(
        &self,
        contract_id: &ContractId,
        user_id: &UserId,
        answer_id: Option<&AnswerId>,
    ) -> Result<Settlement> {
        let now = Utc::now();
        let contract = self.load_contract(contract_id).await?;
        let caller = self.load_user(user_id).await?;
        let market = &contract.value;

        let record = match answer_id {
            Some(_) if market.is_sum_to_one() => {
                return Err(Error::Validation(
                    "sum-to-one markets unresolve as a whole".into(),
                ))
            }
            Some(id) => {
                let answer = market
                    .answer(id)
                    .ok_or_else(|| Error::not_found("answer", id))?;
                answer.resolution.clone()
            }
            None => market.resolution.clone(),
        }
        .ok_or_else(|| Error::Conflict("nothing to unresolve".into()))?;

        if let (Some(_), Some(parent)) = (answer_id, &market.resolution) {
            if parent.id != record.id {
                return Err(Error::Conflict(
                    "unresolve the market before its answers".into(),
                ));
            }
        }

        let window = self.settings.resolution.unresolve_window;
        let in_window = now - record.resolved_time <= window;
        let allowed = caller.value.role.is_elevated()
            || (&market.creator_id == user_id && in_window);
        if !allowed {
            return Err(Error::Permission(format!(
                "resolution of market {contract_id} can no longer be undone by this user"
            )));
        }

        let filter = TxnFilter {
            contract_id: Some(contract_id.clone()),
            resolution_id: Some(record.id.clone()),
            ..TxnFilter::default()
        };
        let written = self.store.txns(&filter).await?;
        let reverted: HashSet<&TxnId> = written
            .iter()
            .filter_map(|t| t.data.reverts_txn_id.as_ref())
            .collect();
        let originals: Vec<&Txn> = written
            .iter()
            .filter(|t| t.category.is_resolution() && !reverted.contains(&t.id))
            .collect();

        let mut postings = Postings::new(now);
        let touched: HashSet<UserId> = originals
            .iter()
            .flat_map(|t| [t.from.user_id(), t.to.user_id()])
            .flatten()
            .collect();
        self.track_users(&mut postings, &touched).await?;

        let mut subsidy = Decimal::ZERO;
        for txn in &originals {
            let Some(undo) = txn.category.undo() else {
                continue;
            };
            if txn.category == TxnCategory::SubsidyReturn {
                subsidy += txn.amount;
            }
            postings.append(txn.reversal(undo, now))?;
        }

        let mut updates = Vec::new();
        if market.resolution.as_ref().is_some_and(|r| r.id == record.id) {
            updates.push(Update::Delete {
                field: ContractField::Resolution,
            });
        }
        for answer in &market.answers {
            if answer.resolution.as_ref().is_some_and(|r| r.id == record.id) {
                updates.push(Update::Delete {
                    field: ContractField::AnswerResolution(answer.id.clone()),
                });
            }
        }
        if !subsidy.is_zero() {
            updates.push(Update::Increment {
                field: ContractField::SubsidyPool,
                by: to_f64(subsidy),
            });
        }

        let mut reopened = market.clone();
        for update in &updates {
            reopened.apply(update)?;
        }
        let stored = self.store.bets(contract_id).await?;
        let bets: Vec<Bet> = stored.into_iter().map(|b| b.value).collect();

        let mut batch = WriteBatch::new();
        batch.expect(RowKey::Contract(contract_id.clone()), Some(contract.version));
        batch.metrics = compute_metrics(contract_id, &bets, |id| valuation(&reopened, id));
        batch.contract_updates = updates
            .into_iter()
            .map(|u| (contract_id.clone(), u))
            .collect();

        let settlement = Settlement {
            contract_id: contract_id.clone(),
            answer_id: answer_id.cloned(),
            resolution_id: record.id.clone(),
            outcome: "UNRESOLVED".to_string(),
            payouts: net_by_user(postings.txns()),
            fees: fee_total(postings.txns(), TxnCategory::UndoResolutionFee),
            txn_count: postings.txns().len(),
        };

        let expectation = postings.write_into(&mut batch);
        let receipt = self.store.commit(batch).await?;
        for (account, token, balance) in &receipt.balances {
            if account.user_id().is_some() && *balance < Decimal::ZERO {
                warn!(account = %account, token = %token, balance = %balance, "unresolve left a negative balance");
            }
        }
        ledger::reconcile(&expectation, &receipt);

        info!(
            contract_id = %contract_id,
            resolution_id = %record.id,
            reverted = settlement.txn_count,
            "market unresolved"
        );
        Ok(settlement)
    }
}
