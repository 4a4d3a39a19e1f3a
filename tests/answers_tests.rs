//! Multi-answer markets: sum-to-one trading, new answers and settlement.

mod support;

use oddsmith::application::exchange::command::{PlaceBet, ResolveMarket, SellShares};
use oddsmith::domain::contract::{AddAnswersMode, Mechanism};
use oddsmith::domain::id::{AnswerId, ContractId, UserId};
use oddsmith::domain::outcome::Outcome;
use oddsmith::domain::resolution::{AnswerPercent, ResolutionOutcome};
use oddsmith::error::Error;
use oddsmith::testkit::exchange::{fee_free, funded_user, market_request, open_market};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use support::assertions::{assert_decimal_near, assert_near};
use support::ledger::{mana, pool_mana, reload, SETTLEMENT_TOLERANCE};

const SUM_TOLERANCE: f64 = 1e-6;

fn answer_bet(
    contract: &ContractId,
    user: &UserId,
    answer: &AnswerId,
    outcome: Outcome,
    amount: f64,
) -> PlaceBet {
    PlaceBet {
        contract_id: contract.clone(),
        user_id: user.clone(),
        amount,
        outcome,
        answer_id: Some(answer.clone()),
        limit_prob: None,
        expires_at: None,
    }
}

#[tokio::test]
async fn sum_to_one_markets_open_uniform() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();

    let market = open_market(
        &exchange,
        market_request(&creator, Mechanism::MultiPoolSumToOne, 300.0, &["a", "b", "c"]),
    )
    .await
    .unwrap();

    for answer in &market.answers {
        assert_near(answer.prob, 1.0 / 3.0, SUM_TOLERANCE);
    }
    assert_eq!(mana(&exchange, &creator).await, dec!(700));
}

#[tokio::test]
async fn buying_one_answer_keeps_the_sum_at_one() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let trader = funded_user(&exchange, "trader", 1000.0).await.unwrap();
    let market = open_market(
        &exchange,
        market_request(&creator, Mechanism::MultiPoolSumToOne, 300.0, &["a", "b", "c"]),
    )
    .await
    .unwrap();
    let a = market.answers[0].id.clone();

    let placed = exchange
        .place_bet(answer_bet(&market.id, &trader, &a, Outcome::Yes, 60.0))
        .await
        .unwrap()
        .finish()
        .await;

    let stored = reload(&exchange, &market.id).await;
    assert_near(stored.probability_sum(), 1.0, SUM_TOLERANCE);
    assert!(stored.answer(&a).unwrap().prob > 1.0 / 3.0);
    assert_near(placed.prob_after, stored.answer(&a).unwrap().prob, SUM_TOLERANCE);
    assert_decimal_near(mana(&exchange, &trader).await, dec!(940), SETTLEMENT_TOLERANCE);
}

#[tokio::test]
async fn buying_no_lowers_only_that_answer() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let trader = funded_user(&exchange, "trader", 1000.0).await.unwrap();
    let market = open_market(
        &exchange,
        market_request(&creator, Mechanism::MultiPoolSumToOne, 300.0, &["a", "b", "c"]),
    )
    .await
    .unwrap();
    let b = market.answers[1].id.clone();

    exchange
        .place_bet(answer_bet(&market.id, &trader, &b, Outcome::No, 30.0))
        .await
        .unwrap()
        .detach();

    let stored = reload(&exchange, &market.id).await;
    assert_near(stored.probability_sum(), 1.0, SUM_TOLERANCE);
    assert!(stored.answer(&b).unwrap().prob < 1.0 / 3.0);
}

#[tokio::test]
async fn sum_to_one_sales_keep_the_sum_at_one() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let trader = funded_user(&exchange, "trader", 1000.0).await.unwrap();
    let market = open_market(
        &exchange,
        market_request(&creator, Mechanism::MultiPoolSumToOne, 300.0, &["a", "b", "c"]),
    )
    .await
    .unwrap();
    let c = market.answers[2].id.clone();
    exchange
        .place_bet(answer_bet(&market.id, &trader, &c, Outcome::Yes, 40.0))
        .await
        .unwrap()
        .detach();

    let sold = exchange
        .sell_shares(SellShares {
            contract_id: market.id.clone(),
            user_id: trader.clone(),
            outcome: Outcome::Yes,
            shares: None,
            answer_id: Some(c.clone()),
        })
        .await
        .unwrap()
        .detach();

    assert!(sold.bet.is_sale);
    assert!(-sold.bet.amount > 0.0);
    let stored = reload(&exchange, &market.id).await;
    assert_near(stored.probability_sum(), 1.0, SUM_TOLERANCE);
}

#[tokio::test]
async fn new_answers_are_paid_for_and_rebalanced() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let proposer = funded_user(&exchange, "proposer", 100.0).await.unwrap();
    let market = open_market(
        &exchange,
        market_request(&creator, Mechanism::MultiPoolSumToOne, 200.0, &["a", "b"]),
    )
    .await
    .unwrap();

    let answer = exchange
        .create_answer(&market.id, &proposer, "c")
        .await
        .unwrap()
        .finish()
        .await;

    assert_eq!(answer.index, 2);
    assert_eq!(mana(&exchange, &proposer).await, dec!(75));
    let stored = reload(&exchange, &market.id).await;
    assert_eq!(stored.answers.len(), 3);
    assert_near(stored.probability_sum(), 1.0, SUM_TOLERANCE);
}

#[tokio::test]
async fn new_answers_are_carved_out_of_other() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let proposer = funded_user(&exchange, "proposer", 100.0).await.unwrap();
    let mut request = market_request(&creator, Mechanism::MultiPoolSumToOne, 300.0, &["a", "b"]);
    request.other_bucket = true;
    let market = open_market(&exchange, request).await.unwrap();
    let other_before = market.answers[2].clone();
    assert!(other_before.is_other);

    let added = exchange
        .create_answer(&market.id, &proposer, "c")
        .await
        .unwrap()
        .finish()
        .await;

    let stored = reload(&exchange, &market.id).await;
    assert_eq!(stored.answers.len(), 4);
    assert!((stored.probability_sum() - 1.0).abs() < 1e-9);
    assert_eq!(added.index, 2);
    assert_eq!(stored.answers[2].id, added.id);
    let other = &stored.answers[3];
    assert!(other.is_other);
    assert_eq!(other.id, other_before.id);
    assert_ne!(other.pool, other_before.pool);
    assert!(other.prob < other_before.prob);
    assert!(stored.answer(&added.id).unwrap().prob > 0.0);
    assert_eq!(mana(&exchange, &proposer).await, dec!(75));
}

#[tokio::test]
async fn duplicate_and_disallowed_answers_are_rejected() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let other = funded_user(&exchange, "other", 100.0).await.unwrap();
    let mut request = market_request(&creator, Mechanism::MultiPool, 100.0, &["a", "b"]);
    request.add_answers_mode = AddAnswersMode::OnlyCreator;
    let market = open_market(&exchange, request).await.unwrap();

    let duplicate = exchange.create_answer(&market.id, &creator, "A").await;
    assert!(matches!(duplicate, Err(Error::Validation(_))));

    let outsider = exchange.create_answer(&market.id, &other, "z").await;
    assert!(matches!(outsider, Err(Error::Permission(_))));
    assert_eq!(mana(&exchange, &other).await, dec!(100));
}

#[tokio::test]
async fn choice_resolution_pays_the_winning_answer() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let winner = funded_user(&exchange, "winner", 1000.0).await.unwrap();
    let loser = funded_user(&exchange, "loser", 1000.0).await.unwrap();
    let market = open_market(
        &exchange,
        market_request(&creator, Mechanism::MultiPoolSumToOne, 300.0, &["a", "b", "c"]),
    )
    .await
    .unwrap();
    let a = market.answers[0].id.clone();
    let b = market.answers[1].id.clone();
    let bought = exchange
        .place_bet(answer_bet(&market.id, &winner, &a, Outcome::Yes, 50.0))
        .await
        .unwrap()
        .detach();
    exchange
        .place_bet(answer_bet(&market.id, &loser, &b, Outcome::Yes, 50.0))
        .await
        .unwrap()
        .detach();

    let settlement = exchange
        .resolve_market(ResolveMarket {
            contract_id: market.id.clone(),
            user_id: creator.clone(),
            outcome: ResolutionOutcome::Choice { answer_id: a.clone() },
            answer_id: None,
        })
        .await
        .unwrap()
        .finish()
        .await;

    assert!(settlement.payouts.contains_key(&winner));
    assert!(mana(&exchange, &winner).await > dec!(950));
    let stored = reload(&exchange, &market.id).await;
    assert!(stored.is_resolved());
    assert!(stored.answers.iter().all(|answer| answer.is_resolved()));
    assert!(bought.bet.shares > 50.0);
}

#[tokio::test]
async fn percentages_must_sum_to_one_hundred() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let market = open_market(
        &exchange,
        market_request(&creator, Mechanism::MultiPoolSumToOne, 200.0, &["a", "b"]),
    )
    .await
    .unwrap();
    let split = |first: f64, second: f64| ResolutionOutcome::Percentages {
        resolutions: vec![
            AnswerPercent {
                answer_id: market.answers[0].id.clone(),
                percent: first,
            },
            AnswerPercent {
                answer_id: market.answers[1].id.clone(),
                percent: second,
            },
        ],
    };

    let bad = exchange
        .resolve_market(ResolveMarket {
            contract_id: market.id.clone(),
            user_id: creator.clone(),
            outcome: split(70.0, 20.0),
            answer_id: None,
        })
        .await;
    assert!(matches!(bad, Err(Error::Validation(_))));

    exchange
        .resolve_market(ResolveMarket {
            contract_id: market.id.clone(),
            user_id: creator.clone(),
            outcome: split(70.0, 30.0),
            answer_id: None,
        })
        .await
        .unwrap()
        .detach();
    assert_decimal_near(pool_mana(&exchange, &market.id).await, Decimal::ZERO, SETTLEMENT_TOLERANCE);
    assert_decimal_near(mana(&exchange, &creator).await, dec!(1000), SETTLEMENT_TOLERANCE);
}

#[tokio::test]
async fn independent_answers_close_the_market_with_the_last_one() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let market = open_market(
        &exchange,
        market_request(&creator, Mechanism::MultiPool, 100.0, &["a", "b"]),
    )
    .await
    .unwrap();
    let resolve = |answer: &AnswerId, outcome: ResolutionOutcome| ResolveMarket {
        contract_id: market.id.clone(),
        user_id: creator.clone(),
        outcome,
        answer_id: Some(answer.clone()),
    };

    exchange
        .resolve_market(resolve(&market.answers[0].id, ResolutionOutcome::Yes))
        .await
        .unwrap()
        .detach();
    let partial = reload(&exchange, &market.id).await;
    assert!(!partial.is_resolved());
    assert!(partial.answers[0].is_resolved());

    exchange
        .resolve_market(resolve(&market.answers[1].id, ResolutionOutcome::No))
        .await
        .unwrap()
        .detach();
    assert!(reload(&exchange, &market.id).await.is_resolved());
}

#[tokio::test]
async fn sum_to_one_answers_do_not_unresolve_alone() {
    let exchange = fee_free();
    let creator = funded_user(&exchange, "creator", 1000.0).await.unwrap();
    let market = open_market(
        &exchange,
        market_request(&creator, Mechanism::MultiPoolSumToOne, 200.0, &["a", "b"]),
    )
    .await
    .unwrap();
    exchange
        .resolve_market(ResolveMarket {
            contract_id: market.id.clone(),
            user_id: creator.clone(),
            outcome: ResolutionOutcome::Choice {
                answer_id: market.answers[1].id.clone(),
            },
            answer_id: None,
        })
        .await
        .unwrap()
        .detach();

    let result = exchange
        .unresolve_market(&market.id, &creator, Some(&market.answers[1].id))
        .await;

    assert!(matches!(result, Err(Error::Validation(_))));
}
