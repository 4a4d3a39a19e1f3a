//! An exchange over the memory store, plus funded users and opened markets.

use crate::adapter::outbound::memory::MemoryLedgerStore;
use crate::application::exchange::command::CreateMarket;
use crate::application::exchange::service::Exchange;
use crate::application::exchange::settings::ExchangeSettings;
use crate::domain::contract::{AddAnswersMode, Contract, Mechanism};
use crate::domain::fees::FeeSchedule;
use crate::domain::id::UserId;
use crate::domain::money::Token;
use crate::domain::user::Role;
use crate::error::Result;
use crate::port::outbound::store::LedgerStore;

/// Default settings with trading fees switched off.
pub fn fee_free_settings() -> ExchangeSettings {
    ExchangeSettings {
        fees: FeeSchedule::FREE,
        ..ExchangeSettings::default()
    }
}

/// Exchange without trading fees, so expected amounts stay round.
pub fn fee_free() -> Exchange<MemoryLedgerStore> {
    Exchange::new(MemoryLedgerStore::new(), fee_free_settings())
}

/// Exchange with the default fee schedule.
pub fn with_fees() -> Exchange<MemoryLedgerStore> {
    Exchange::new(MemoryLedgerStore::new(), ExchangeSettings::default())
}

/// Create `id` and grant it `mana`.
pub async fn funded_user<S: LedgerStore>(
    exchange: &Exchange<S>,
    id: &str,
    mana: f64,
) -> Result<UserId> {
    funded_user_with_role(exchange, id, mana, Role::User).await
}

pub async fn funded_user_with_role<S: LedgerStore>(
    exchange: &Exchange<S>,
    id: &str,
    mana: f64,
    role: Role,
) -> Result<UserId> {
    let user_id = UserId::from(id);
    exchange.create_user(user_id.clone(), id, role).await?;
    if mana > 0.0 {
        exchange.grant(&user_id, mana, Token::Mana).await?;
    }
    Ok(user_id)
}

/// Request for a market of `mechanism` with the given answers.
pub fn market_request(
    creator: &UserId,
    mechanism: Mechanism,
    ante: f64,
    answers: &[&str],
) -> CreateMarket {
    CreateMarket {
        creator_id: creator.clone(),
        question: "Will it happen?".into(),
        mechanism,
        token: Token::Mana,
        ante,
        answers: answers.iter().map(|a| (*a).to_string()).collect(),
        close_time: None,
        add_answers_mode: AddAnswersMode::Anyone,
        other_bucket: false,
    }
}

/// Open a market and return it as committed.
pub async fn open_market<S: LedgerStore>(
    exchange: &Exchange<S>,
    request: CreateMarket,
) -> Result<Contract> {
    Ok(exchange.create_market(request).await?.finish().await)
}

/// Open a binary market funded with `ante`.
pub async fn binary_market<S: LedgerStore>(
    exchange: &Exchange<S>,
    creator: &UserId,
    ante: f64,
) -> Result<Contract> {
    open_market(
        exchange,
        market_request(creator, Mechanism::SinglePool, ante, &[]),
    )
    .await
}
