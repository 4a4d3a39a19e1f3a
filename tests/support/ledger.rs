//! Balance lookups shared by the flow tests.

use oddsmith::application::exchange::service::Exchange;
use oddsmith::domain::contract::Contract;
use oddsmith::domain::id::{ContractId, UserId};
use oddsmith::domain::money::Token;
use oddsmith::domain::txn::Account;
use oddsmith::port::outbound::store::LedgerStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Rounding tolerance of one settlement spread over a handful of users.
pub const SETTLEMENT_TOLERANCE: Decimal = dec!(0.000001);

pub async fn mana<S: LedgerStore>(exchange: &Exchange<S>, user: &UserId) -> Decimal {
    exchange
        .store()
        .balance(&Account::user(user), Token::Mana)
        .await
        .expect("read user balance")
}

pub async fn pool_mana<S: LedgerStore>(exchange: &Exchange<S>, contract: &ContractId) -> Decimal {
    exchange
        .store()
        .balance(&Account::contract(contract), Token::Mana)
        .await
        .expect("read contract balance")
}

pub async fn total_mana<S: LedgerStore>(exchange: &Exchange<S>, users: &[&UserId]) -> Decimal {
    let mut total = Decimal::ZERO;
    for user in users {
        total += mana(exchange, user).await;
    }
    total
}

pub async fn reload<S: LedgerStore>(exchange: &Exchange<S>, contract: &ContractId) -> Contract {
    exchange
        .store()
        .contract(contract)
        .await
        .expect("read contract")
        .expect("contract exists")
        .value
}
