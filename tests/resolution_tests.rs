//! Settlement flows: resolve, cancel, profit fees and unresolve.

mod support;

use oddsmith::adapter::outbound::memory::MemoryLedgerStore;
use oddsmith::application::exchange::command::{PlaceBet, ResolveMarket};
use oddsmith::application::exchange::service::Exchange;
use oddsmith::domain::contract::{Contract, Mechanism};
use oddsmith::domain::id::UserId;
use oddsmith::domain::money::Token;
use oddsmith::domain::outcome::Outcome;
use oddsmith::domain::resolution::ResolutionOutcome;
use oddsmith::domain::txn::{Account, TxnCategory};
use oddsmith::domain::user::Role;
use oddsmith::error::Error;
use oddsmith::port::outbound::store::{LedgerStore, TxnFilter};
use oddsmith::testkit::exchange::{
    binary_market, fee_free, funded_user, funded_user_with_role, market_request, open_market,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use support::assertions::assert_decimal_near;
use support::ledger::{mana, pool_mana, reload, total_mana, SETTLEMENT_TOLERANCE};

struct Traded {
    exchange: Exchange<MemoryLedgerStore>,
    creator: UserId,
    yes: UserId,
    no: UserId,
    market: Contract,
}

/// A binary market with one YES and one NO trader.
async fn traded_market() -> Traded {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let yes = funded_user(&exchange, "yes", 1000.0).await.unwrap();
    let no = funded_user(&exchange, "no", 1000.0).await.unwrap();
    let market = binary_market(&exchange, &creator, 100.0).await.unwrap();
    for (user, outcome, amount) in [(&yes, Outcome::Yes, 50.0), (&no, Outcome::No, 30.0)] {
        exchange
            .place_bet(PlaceBet {
                contract_id: market.id.clone(),
                user_id: user.clone(),
                amount,
                outcome,
                answer_id: None,
                limit_prob: None,
                expires_at: None,
            })
            .await
            .unwrap()
            .finish()
            .await;
    }
    Traded {
        exchange,
        creator,
        yes,
        no,
        market,
    }
}

fn resolve(t: &Traded, user: &UserId, outcome: ResolutionOutcome) -> ResolveMarket {
    ResolveMarket {
        contract_id: t.market.id.clone(),
        user_id: user.clone(),
        outcome,
        answer_id: None,
    }
}

#[tokio::test]
async fn yes_resolution_pays_winners_and_empties_the_pool() {
    let t = traded_market().await;
    let users = [&t.creator, &t.yes, &t.no];
    let before = total_mana(&t.exchange, &users).await;
    let yes_before = mana(&t.exchange, &t.yes).await;

    let settlement = t
        .exchange
        .resolve_market(resolve(&t, &t.creator, ResolutionOutcome::Yes))
        .await
        .unwrap()
        .finish()
        .await;

    assert_eq!(settlement.outcome, "YES");
    assert!(mana(&t.exchange, &t.yes).await > yes_before + dec!(50));
    assert_eq!(mana(&t.exchange, &t.no).await, dec!(970));
    assert_decimal_near(pool_mana(&t.exchange, &t.market.id).await, Decimal::ZERO, SETTLEMENT_TOLERANCE);
    assert_decimal_near(
        total_mana(&t.exchange, &users).await,
        before + dec!(180),
        SETTLEMENT_TOLERANCE,
    );

    let stored = reload(&t.exchange, &t.market.id).await;
    assert!(stored.is_resolved());
    let metrics = t.exchange.store().metrics(&t.market.id).await.unwrap();
    assert!(metrics.iter().any(|m| m.user_id == t.yes && m.profit > 0.0));
}

#[tokio::test]
async fn cancel_refunds_every_bet_and_the_ante() {
    let t = traded_market().await;

    t.exchange
        .resolve_market(resolve(&t, &t.creator, ResolutionOutcome::Cancel))
        .await
        .unwrap()
        .finish()
        .await;

    for user in [&t.creator, &t.yes, &t.no] {
        assert_decimal_near(mana(&t.exchange, user).await, dec!(1000), SETTLEMENT_TOLERANCE);
    }
    assert_decimal_near(pool_mana(&t.exchange, &t.market.id).await, Decimal::ZERO, SETTLEMENT_TOLERANCE);
}

#[tokio::test]
async fn only_the_creator_or_a_moderator_resolves() {
    let t = traded_market().await;

    let result = t
        .exchange
        .resolve_market(resolve(&t, &t.yes, ResolutionOutcome::Yes))
        .await;
    assert!(matches!(result, Err(Error::Permission(_))));

    let moderator = funded_user_with_role(&t.exchange, "mod", 0.0, Role::Mod)
        .await
        .unwrap();
    assert!(t
        .exchange
        .resolve_market(resolve(&t, &moderator, ResolutionOutcome::No))
        .await
        .is_ok());
}

#[tokio::test]
async fn a_market_resolves_once() {
    let t = traded_market().await;
    t.exchange
        .resolve_market(resolve(&t, &t.creator, ResolutionOutcome::No))
        .await
        .unwrap()
        .detach();
    let users = [&t.creator, &t.yes, &t.no];
    let txns_before = t.exchange.store().txn_count();
    let mut balances_before = Vec::new();
    for user in users {
        balances_before.push(mana(&t.exchange, user).await);
    }

    let result = t
        .exchange
        .resolve_market(resolve(&t, &t.creator, ResolutionOutcome::Yes))
        .await;

    assert!(matches!(result, Err(Error::Conflict(_))));
    assert_eq!(t.exchange.store().txn_count(), txns_before);
    for (user, before) in users.iter().zip(&balances_before) {
        assert_eq!(mana(&t.exchange, user).await, *before);
    }
}

#[tokio::test]
async fn percent_resolution_pays_both_sides() {
    let t = traded_market().await;
    let yes_before = mana(&t.exchange, &t.yes).await;
    let no_before = mana(&t.exchange, &t.no).await;

    t.exchange
        .resolve_market(resolve(
            &t,
            &t.creator,
            ResolutionOutcome::Mkt { probability: 50.0 },
        ))
        .await
        .unwrap()
        .detach();

    assert!(mana(&t.exchange, &t.yes).await > yes_before);
    assert!(mana(&t.exchange, &t.no).await > no_before);
    assert_decimal_near(pool_mana(&t.exchange, &t.market.id).await, Decimal::ZERO, SETTLEMENT_TOLERANCE);
}

#[tokio::test]
async fn unresolve_restores_balances_and_allows_a_new_outcome() {
    let t = traded_market().await;
    let users = [&t.creator, &t.yes, &t.no];
    let mut before = Vec::new();
    for user in users {
        before.push(mana(&t.exchange, user).await);
    }
    let first = t
        .exchange
        .resolve_market(resolve(&t, &t.creator, ResolutionOutcome::Yes))
        .await
        .unwrap()
        .detach();

    let undo = t
        .exchange
        .unresolve_market(&t.market.id, &t.creator, None)
        .await
        .unwrap()
        .detach();

    assert_eq!(undo.outcome, "UNRESOLVED");
    assert_eq!(undo.resolution_id, first.resolution_id);
    for (user, expected) in users.iter().zip(&before) {
        assert_decimal_near(mana(&t.exchange, user).await, *expected, SETTLEMENT_TOLERANCE);
    }
    assert!(!reload(&t.exchange, &t.market.id).await.is_resolved());

    let reversals = t
        .exchange
        .store()
        .txns(&TxnFilter {
            contract_id: Some(t.market.id.clone()),
            category: Some(TxnCategory::ResolutionPayout.undo().unwrap()),
            ..TxnFilter::default()
        })
        .await
        .unwrap();
    assert!(!reversals.is_empty());

    t.exchange
        .resolve_market(resolve(&t, &t.creator, ResolutionOutcome::No))
        .await
        .unwrap()
        .detach();
    assert!(mana(&t.exchange, &t.no).await > before[2]);
}

#[tokio::test]
async fn unresolve_needs_a_resolution_and_permission() {
    let t = traded_market().await;

    let nothing = t
        .exchange
        .unresolve_market(&t.market.id, &t.creator, None)
        .await;
    assert!(matches!(nothing, Err(Error::Conflict(_))));

    t.exchange
        .resolve_market(resolve(&t, &t.creator, ResolutionOutcome::Yes))
        .await
        .unwrap()
        .detach();
    let stranger = t
        .exchange
        .unresolve_market(&t.market.id, &t.no, None)
        .await;
    assert!(matches!(stranger, Err(Error::Permission(_))));
}

#[tokio::test]
async fn cash_markets_charge_a_profit_fee() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 0.0).await.unwrap();
    let trader = funded_user(&exchange, "trader", 0.0).await.unwrap();
    for user in [&creator, &trader] {
        exchange.grant(user, 1000.0, Token::Cash).await.unwrap();
    }
    let mut request = market_request(&creator, Mechanism::SinglePool, 100.0, &[]);
    request.token = Token::Cash;
    let market = open_market(&exchange, request).await.unwrap();
    let placed = exchange
        .place_bet(PlaceBet {
            contract_id: market.id.clone(),
            user_id: trader.clone(),
            amount: 50.0,
            outcome: Outcome::Yes,
            answer_id: None,
            limit_prob: None,
            expires_at: None,
        })
        .await
        .unwrap()
        .detach();

    let settlement = exchange
        .resolve_market(ResolveMarket {
            contract_id: market.id.clone(),
            user_id: creator.clone(),
            outcome: ResolutionOutcome::Yes,
            answer_id: None,
        })
        .await
        .unwrap()
        .detach();

    assert!(settlement.fees > Decimal::ZERO);
    let profit = placed.bet.shares - 50.0;
    let expected = 950.0 + placed.bet.shares - 0.1 * profit;
    let cash = exchange
        .store()
        .balance(&Account::user(&trader), Token::Cash)
        .await
        .unwrap();
    assert_decimal_near(
        cash,
        Decimal::from_f64_retain(expected).unwrap().round_dp(8),
        SETTLEMENT_TOLERANCE,
    );
    assert_eq!(mana(&exchange, &trader).await, Decimal::ZERO);
}
