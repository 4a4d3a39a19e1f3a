//! Notifier port for post-commit events.
//!
//! Notifications run after the commit as part of the continuation. They are
//! fire-and-forget from the caller's point of view: a failing notifier is
//! logged and never rolls anything back.

use async_trait::async_trait;
use tracing::info;

use crate::domain::id::{AnswerId, BetId, ContractId, UserId};
use crate::domain::outcome::Outcome;
use crate::error::Result;

/// Events emitted by committed mutations.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MarketCreated {
        contract_id: ContractId,
        creator_id: UserId,
    },
    BetPlaced(BetEvent),
    BetCancelled {
        contract_id: ContractId,
        bet_id: BetId,
        user_id: UserId,
    },
    LiquidityChanged {
        contract_id: ContractId,
        answer_id: Option<AnswerId>,
        user_id: UserId,
        amount: f64,
    },
    AnswerCreated {
        contract_id: ContractId,
        answer_id: AnswerId,
        user_id: UserId,
    },
    MarketResolved(ResolutionEvent),
    MarketUnresolved {
        contract_id: ContractId,
        answer_id: Option<AnswerId>,
        reverted_txns: usize,
    },
}

/// A trade that was committed.
#[derive(Debug, Clone, PartialEq)]
pub struct BetEvent {
    pub contract_id: ContractId,
    pub answer_id: Option<AnswerId>,
    pub bet_id: BetId,
    pub user_id: UserId,
    pub outcome: Outcome,
    pub amount: f64,
    pub shares: f64,
    pub prob_after: f64,
    /// Makers whose resting orders were filled.
    pub makers: Vec<UserId>,
}

/// A resolution that was committed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionEvent {
    pub contract_id: ContractId,
    pub answer_id: Option<AnswerId>,
    pub outcome: String,
    pub paid_users: usize,
    pub total_payout: f64,
}

/// Receives events after commit.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &Event) -> Result<()>;
}

/// Registry of notifiers (composite pattern).
///
/// Every notifier sees every event even when an earlier one fails.
#[derive(Default)]
pub struct NotifierRegistry {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { notifiers: vec![] }
    }

    pub fn register(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    /// Notify all registered notifiers. Returns the first failure.
    pub async fn notify_all(&self, event: &Event) -> Result<()> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

/// A no-op notifier for tests or when notifications are disabled.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _event: &Event) -> Result<()> {
        Ok(())
    }
}

/// Logs events via tracing.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &Event) -> Result<()> {
        match event {
            Event::MarketCreated {
                contract_id,
                creator_id,
            } => {
                info!(contract_id = %contract_id, creator_id = %creator_id, "Market created");
            }
            Event::BetPlaced(e) => {
                info!(
                    contract_id = %e.contract_id,
                    bet_id = %e.bet_id,
                    user_id = %e.user_id,
                    outcome = %e.outcome,
                    amount = e.amount,
                    shares = e.shares,
                    prob_after = e.prob_after,
                    makers = e.makers.len(),
                    "Bet placed"
                );
            }
            Event::BetCancelled {
                contract_id,
                bet_id,
                user_id,
            } => {
                info!(contract_id = %contract_id, bet_id = %bet_id, user_id = %user_id, "Bet cancelled");
            }
            Event::LiquidityChanged {
                contract_id,
                user_id,
                amount,
                ..
            } => {
                info!(contract_id = %contract_id, user_id = %user_id, amount, "Liquidity changed");
            }
            Event::AnswerCreated {
                contract_id,
                answer_id,
                user_id,
            } => {
                info!(contract_id = %contract_id, answer_id = %answer_id, user_id = %user_id, "Answer created");
            }
            Event::MarketResolved(e) => {
                info!(
                    contract_id = %e.contract_id,
                    outcome = %e.outcome,
                    paid_users = e.paid_users,
                    total_payout = e.total_payout,
                    "Market resolved"
                );
            }
            Event::MarketUnresolved {
                contract_id,
                reverted_txns,
                ..
            } => {
                info!(contract_id = %contract_id, reverted_txns, "Market unresolved");
            }
        }
        Ok(())
    }
}
