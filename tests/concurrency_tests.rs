//! Concurrent mutations serialize per market and per user.

mod support;

use futures_util::future::join_all;
use oddsmith::application::exchange::command::PlaceBet;
use oddsmith::domain::id::{ContractId, UserId};
use oddsmith::domain::outcome::Outcome;
use oddsmith::port::outbound::store::LedgerStore;
use oddsmith::testkit::exchange::{binary_market, fee_free, funded_user};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use support::assertions::assert_near;
use support::ledger::{mana, pool_mana, reload};

const TRADERS: usize = 16;

#[tokio::test]
async fn parallel_bets_on_one_market_all_land() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let market = binary_market(&exchange, &creator, 100.0).await.unwrap();
    let mut traders = Vec::new();
    for i in 0..TRADERS {
        traders.push(
            funded_user(&exchange, &format!("trader-{i}"), 100.0)
                .await
                .unwrap(),
        );
    }

    let results = join_all(traders.iter().enumerate().map(|(i, user)| {
        let outcome = if i % 2 == 0 { Outcome::Yes } else { Outcome::No };
        exchange.place_bet(PlaceBet {
            contract_id: market.id.clone(),
            user_id: user.clone(),
            amount: 10.0,
            outcome,
            answer_id: None,
            limit_prob: None,
            expires_at: None,
        })
    }))
    .await;

    let errors: Vec<String> = results
        .iter()
        .filter_map(|r| r.as_ref().err().map(ToString::to_string))
        .collect();
    assert!(errors.is_empty(), "failed bets: {errors:?}");
    let stored = reload(&exchange, &market.id).await;
    assert_near(stored.volume, 10.0 * TRADERS as f64, 1e-9);
    assert_eq!(stored.unique_bettor_ids.len(), TRADERS);
    assert_eq!(
        pool_mana(&exchange, &market.id).await,
        dec!(100) + Decimal::from(10 * TRADERS)
    );
    for trader in &traders {
        assert_eq!(mana(&exchange, trader).await, dec!(90));
    }
}

#[tokio::test]
async fn parallel_bets_match_their_commit_order_replayed_sequentially() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let market = binary_market(&exchange, &creator, 100.0).await.unwrap();
    let mut traders = Vec::new();
    for i in 0..TRADERS {
        traders.push(
            funded_user(&exchange, &format!("trader-{i}"), 100.0)
                .await
                .unwrap(),
        );
    }
    let bet = |i: usize, contract_id: &ContractId, user: &UserId| PlaceBet {
        contract_id: contract_id.clone(),
        user_id: user.clone(),
        amount: 5.0 + i as f64,
        outcome: if i % 3 == 0 { Outcome::No } else { Outcome::Yes },
        answer_id: None,
        limit_prob: None,
        expires_at: None,
    };
    let results = join_all(
        traders
            .iter()
            .enumerate()
            .map(|(i, user)| exchange.place_bet(bet(i, &market.id, user))),
    )
    .await;
    assert!(results.iter().all(Result::is_ok));
    let committed = exchange.store().bets(&market.id).await.unwrap();
    assert_eq!(committed.len(), TRADERS);

    let sequential = fee_free();
    let replay_creator = funded_user(&sequential, "creator", 1000.0).await.unwrap();
    let replay_market = binary_market(&sequential, &replay_creator, 100.0)
        .await
        .unwrap();
    for user in &traders {
        funded_user(&sequential, user.as_str(), 100.0).await.unwrap();
    }
    for row in &committed {
        let original = &row.value;
        let placed = sequential
            .place_bet(PlaceBet {
                contract_id: replay_market.id.clone(),
                user_id: original.user_id.clone(),
                amount: original.amount,
                outcome: original.outcome,
                answer_id: None,
                limit_prob: None,
                expires_at: None,
            })
            .await
            .unwrap()
            .detach();
        assert_near(placed.bet.shares, original.shares, 1e-9);
    }

    let concurrent_pool = reload(&exchange, &market.id).await.pool;
    let sequential_pool = reload(&sequential, &replay_market.id).await.pool;
    assert_near(concurrent_pool.yes, sequential_pool.yes, 1e-9);
    assert_near(concurrent_pool.no, sequential_pool.no, 1e-9);
    for user in &traders {
        assert_eq!(mana(&exchange, user).await, mana(&sequential, user).await);
    }
    assert_eq!(
        pool_mana(&exchange, &market.id).await,
        pool_mana(&sequential, &replay_market.id).await
    );
}

#[tokio::test]
async fn one_user_cannot_overspend_with_parallel_bets() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let first = binary_market(&exchange, &creator, 100.0).await.unwrap();
    let second = binary_market(&exchange, &creator, 100.0).await.unwrap();
    let trader: UserId = funded_user(&exchange, "trader", 50.0).await.unwrap();

    let bet = |contract_id| PlaceBet {
        contract_id,
        user_id: trader.clone(),
        amount: 30.0,
        outcome: Outcome::Yes,
        answer_id: None,
        limit_prob: None,
        expires_at: None,
    };
    let results = join_all([
        exchange.place_bet(bet(first.id.clone())),
        exchange.place_bet(bet(second.id.clone())),
    ])
    .await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(mana(&exchange, &trader).await, dec!(20));
}
