//! The exchange service: entry points of the trading and settlement engine.
//!
//! Every mutation runs through the same pipeline: validate, enter the
//! [`MutationQueue`] under its resource keys, read a snapshot, compute, commit
//! one [`WriteBatch`](crate::port::outbound::store::WriteBatch), retry on
//! version conflicts, then hand back a [`Committed`] value whose continuation
//! carries the notifications.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::application::continuation::{Committed, Continuation};
use crate::application::ledger::Postings;
use crate::application::queue::{MutationQueue, Priority};
use crate::application::retry;
use crate::domain::bet::Bet;
use crate::domain::contract::Contract;
use crate::domain::fees::Fees;
use crate::domain::id::{AnswerId, BetId, ContractId, UserId};
use crate::domain::metric::{compute_metrics, ContractMetric, Valuation};
use crate::domain::money::{to_money, Token};
use crate::domain::resolution::Resolved;
use crate::domain::txn::{Account, TxnCategory, TxnData};
use crate::domain::user::User;
use crate::error::{Error, Result};
use crate::port::outbound::notifier::{Event, NotifierRegistry};
use crate::port::outbound::store::{LedgerStore, RowKey, Versioned, WriteBatch};

use super::settings::ExchangeSettings;

/// Queue key of a contract.
pub(crate) fn contract_key(id: &ContractId) -> String {
    format!("contract:{id}")
}

/// Queue key of a user.
pub(crate) fn user_key(id: &UserId) -> String {
    format!("user:{id}")
}

/// Trading and settlement engine over a [`LedgerStore`].
pub struct Exchange<S> {
    pub(crate) store: S,
    pub(crate) settings: ExchangeSettings,
    queue: MutationQueue,
    notifiers: Arc<NotifierRegistry>,
}

impl<S: LedgerStore> Exchange<S> {
    #[must_use]
    pub fn new(store: S, settings: ExchangeSettings) -> Self {
        Self {
            store,
            settings,
            queue: MutationQueue::new(),
            notifiers: Arc::new(NotifierRegistry::new()),
        }
    }

    /// Replace the notifier registry.
    #[must_use]
    pub fn with_notifiers(mut self, notifiers: NotifierRegistry) -> Self {
        self.notifiers = Arc::new(notifiers);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &ExchangeSettings {
        &self.settings
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Run `attempt` under `keys` with conflict retries.
    pub(crate) async fn mutate<T, F, Fut>(
        &self,
        operation: &'static str,
        keys: Vec<String>,
        priority: Priority,
        attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = self
            .queue
            .run(keys, priority, || {
                retry::run(&self.settings.retry, operation, attempt)
            })
            .await;
        if let Err(Error::Invariant(reason)) = &result {
            error!(operation, reason = %reason, "invariant breach, commit aborted");
        }
        result
    }

    pub(crate) async fn load_contract(&self, id: &ContractId) -> Result<Versioned<Contract>> {
        self.store
            .contract(id)
            .await?
            .ok_or_else(|| Error::not_found("contract", id))
    }

    pub(crate) async fn load_user(&self, id: &UserId) -> Result<Versioned<User>> {
        self.store
            .user(id)
            .await?
            .ok_or_else(|| Error::not_found("user", id))
    }

    pub(crate) fn bank(&self) -> Account {
        Account::bank(self.settings.markets.bank_id.clone())
    }

    /// Pay the creator and platform shares of a trading fee out of the pool.
    pub(crate) fn post_fees(
        &self,
        postings: &mut Postings,
        contract: &Contract,
        fees: &Fees,
        data: &TxnData,
    ) -> Result<()> {
        let pool = Account::contract(&contract.id);
        post(
            postings,
            pool.clone(),
            Account::user(&contract.creator_id),
            fees.creator_fee,
            contract.token,
            TxnCategory::CreatorFee,
            data.clone(),
        )?;
        post(
            postings,
            pool,
            self.bank(),
            fees.platform_fee,
            contract.token,
            TxnCategory::PlatformFee,
            data.clone(),
        )
    }

    /// A committed value whose continuation notifies `events`.
    pub(crate) fn committed<T>(&self, value: T, events: Vec<Event>) -> Committed<T> {
        let mut continuation = Continuation::new();
        if !self.notifiers.is_empty() {
            for event in events {
                let notifiers = Arc::clone(&self.notifiers);
                continuation.push("notify", async move { notifiers.notify_all(&event).await });
            }
        }
        Committed::new(value, continuation)
    }
}

/// Book `amount` unless it rounds to nothing.
pub(crate) fn post(
    postings: &mut Postings,
    from: Account,
    to: Account,
    amount: f64,
    token: Token,
    category: TxnCategory,
    data: TxnData,
) -> Result<()> {
    let amount = to_money(amount)?;
    if amount.is_zero() {
        return Ok(());
    }
    postings
        .transfer_money(from, to, amount, token, category, data)
        .map(|_| ())
}

/// Reject malformed answer ids, and trades on resolved or closed pools as conflicts.
pub(crate) fn ensure_tradable(
    contract: &Contract,
    answer_id: Option<&AnswerId>,
    now: DateTime<Utc>,
) -> Result<()> {
    if contract.is_resolved() {
        return Err(Error::Conflict(format!("market {} is resolved", contract.id)));
    }
    if contract.is_closed(now) {
        return Err(Error::Conflict(format!("market {} is closed", contract.id)));
    }
    match (contract.is_multi(), answer_id) {
        (false, Some(_)) => Err(Error::Validation(
            "binary markets take no answer id".into(),
        )),
        (true, None) => Err(Error::Validation(
            "multi-answer markets need an answer id".into(),
        )),
        (true, Some(id)) => {
            let answer = contract
                .answer(id)
                .ok_or_else(|| Error::not_found("answer", id))?;
            if answer.is_resolved() {
                return Err(Error::Conflict(format!("answer {id} is resolved")));
            }
            Ok(())
        }
        (false, None) => Ok(()),
    }
}

/// How positions in one pool are currently valued.
pub(crate) fn valuation(contract: &Contract, answer_id: Option<&AnswerId>) -> Valuation {
    let resolution = match answer_id {
        Some(id) => contract.answer(id).and_then(|a| a.resolution.as_ref()),
        None => contract.resolution.as_ref(),
    };
    match resolution {
        Some(r) if r.outcome == Resolved::Cancel => Valuation::Cancel,
        Some(r) => Valuation::Probability(r.probability),
        None => Valuation::Probability(contract.probability(answer_id).unwrap_or(0.5)),
    }
}

/// Metrics of `users` recomputed from every bet of the contract.
pub(crate) fn metrics_for(
    contract: &Contract,
    bets: &[Bet],
    users: &[&UserId],
) -> Vec<ContractMetric> {
    let relevant: Vec<Bet> = bets
        .iter()
        .filter(|b| users.contains(&&b.user_id))
        .cloned()
        .collect();
    compute_metrics(&contract.id, &relevant, |answer_id| {
        valuation(contract, answer_id)
    })
}

/// The written copy of a stored bet, registering its version on first use.
pub(crate) fn touch<'a>(
    written: &'a mut Vec<Bet>,
    stored: &[Versioned<Bet>],
    id: &BetId,
    batch: &mut WriteBatch,
) -> Result<&'a mut Bet> {
    let index = match written.iter().position(|b| &b.id == id) {
        Some(index) => index,
        None => {
            let row = stored
                .iter()
                .find(|b| &b.value.id == id)
                .ok_or_else(|| Error::Invariant(format!("bet {id} missing from snapshot")))?;
            batch.expect(RowKey::Bet(id.clone()), Some(row.version));
            written.push(row.value.clone());
            written.len() - 1
        }
    };
    Ok(&mut written[index])
}

/// Latest copy of every bet: stored rows overridden by rows being written.
pub(crate) fn merged_bets(stored: &[Versioned<Bet>], written: &[Bet]) -> Vec<Bet> {
    let mut bets: Vec<Bet> = stored
        .iter()
        .map(|b| {
            written
                .iter()
                .find(|w| w.id == b.value.id)
                .cloned()
                .unwrap_or_else(|| b.value.clone())
        })
        .collect();
    bets.extend(
        written
            .iter()
            .filter(|w| !stored.iter().any(|b| b.value.id == w.id))
            .cloned(),
    );
    bets
}
