//! Buying, selling and cancelling orders.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::application::continuation::Committed;
use crate::application::ledger::{self, Postings};
use crate::application::queue::Priority;
use crate::domain::arbitrage;
use crate::domain::bet::{Bet, Fill};
use crate::domain::contract::{Answer, Contract};
use crate::domain::cpmm;
use crate::domain::error::{ensure_positive, DomainError};
use crate::domain::fees::{FeeSchedule, Fees};
use crate::domain::id::{AnswerId, BetId, ContractId, UserId};
use crate::domain::matching::{self, FillResult, MakerFill, TakerOrder};
use crate::domain::money::{to_f64, to_money, Token, EPSILON};
use crate::domain::outcome::Outcome;
use crate::domain::patch::{ContractField, Update};
use crate::domain::txn::{Account, TxnCategory, TxnData};
use crate::error::{Error, Result};
use crate::port::outbound::notifier::{BetEvent, Event};
use crate::port::outbound::store::{LedgerStore, RowKey, Versioned, WriteBatch};

use super::command::{BetPlaced, PlaceBet, SellShares};
use super::service::{
    contract_key, ensure_tradable, merged_bets, metrics_for, post, touch, user_key, Exchange,
};

/// An order after pricing, before booking.
#[derive(Debug)]
struct Priced {
    fills: Vec<Fill>,
    makers: Vec<MakerFill>,
    orders_to_cancel: Vec<BetId>,
    fees: Fees,
    prob_before: f64,
    prob_after: f64,
}

impl From<FillResult> for Priced {
    fn from(result: FillResult) -> Self {
        Self {
            fills: result.fills,
            makers: result.makers,
            orders_to_cancel: result.orders_to_cancel,
            fees: result.fees,
            prob_before: result.prob_before,
            prob_after: result.prob_after,
        }
    }
}

/// Everything a trade attempt read.
struct Snapshot {
    contract: Versioned<Contract>,
    bets: Vec<Versioned<Bet>>,
    postings: Postings,
}

fn resting_in_pool(bets: &[Versioned<Bet>], answer_id: Option<&AnswerId>, now: DateTime<Utc>) -> Vec<Bet> {
    bets.iter()
        .map(|b| &b.value)
        .filter(|b| b.answer_id.as_ref() == answer_id && b.is_resting(now))
        .cloned()
        .collect()
}

fn set_pools(market: &mut Contract, pools: Vec<(AnswerId, cpmm::Pool)>) -> Result<()> {
    for (id, pool) in pools {
        market
            .answer_mut(&id)
            .ok_or_else(|| DomainError::UnknownAnswer(id.to_string()))?
            .set_pool(pool);
    }
    Ok(())
}

fn unresolved(market: &Contract) -> Vec<Answer> {
    market.unresolved_answers().cloned().collect()
}

/// Price a purchase and move the market to its post-trade state.
fn price_order(
    market: &mut Contract,
    answer_id: Option<&AnswerId>,
    order: &TakerOrder<'_>,
    resting: &[Bet],
    balances: &HashMap<UserId, f64>,
    schedule: &FeeSchedule,
    now: DateTime<Utc>,
) -> Result<Priced> {
    if let (true, Some(answer_id)) = (market.is_sum_to_one(), answer_id) {
        let prob_before = market.probability(Some(answer_id)).unwrap_or(0.5);
        let trade = arbitrage::buy_sum_to_one(
            &unresolved(market),
            answer_id,
            order,
            resting,
            balances,
            schedule,
            now,
        )?;
        set_pools(market, trade.pools())?;
        return Ok(Priced {
            fills: trade.taker_fills(now),
            fees: trade.fees(),
            prob_before,
            prob_after: trade.main.prob_after,
            makers: trade.main.makers,
            orders_to_cancel: trade.main.orders_to_cancel,
        });
    }

    let state = market
        .state(answer_id)
        .ok_or_else(|| Error::Validation("no pool to trade against".into()))?;
    let result = matching::compute_fills(&state, order, resting, balances, schedule, now)?;
    market.set_state(answer_id, result.state)?;
    Ok(result.into())
}

/// Price a sale of `shares` and return it with its value.
#[allow(clippy::too_many_arguments)]
fn price_sale(
    market: &mut Contract,
    answer_id: Option<&AnswerId>,
    seller: &UserId,
    outcome: Outcome,
    shares: f64,
    resting: &[Bet],
    balances: &HashMap<UserId, f64>,
    schedule: &FeeSchedule,
    now: DateTime<Utc>,
) -> Result<(Priced, f64)> {
    let sale_fill = |sale_value: f64| Fill {
        matched_bet_id: None,
        amount: -sale_value,
        shares: -shares,
        timestamp: now,
        is_sale: true,
    };

    if let (true, Some(answer_id)) = (market.is_sum_to_one(), answer_id) {
        let prob_before = market.probability(Some(answer_id)).unwrap_or(0.5);
        let sale = arbitrage::sell_sum_to_one(
            &unresolved(market),
            answer_id,
            seller,
            outcome,
            shares,
            resting,
            balances,
            schedule,
            now,
        )?;
        set_pools(market, sale.trade.pools())?;
        let priced = Priced {
            fills: vec![sale_fill(sale.sale_value)],
            fees: sale.trade.fees(),
            prob_before,
            prob_after: sale.trade.main.prob_after,
            makers: sale.trade.main.makers,
            orders_to_cancel: sale.trade.main.orders_to_cancel,
        };
        return Ok((priced, sale.sale_value));
    }

    let state = market
        .state(answer_id)
        .ok_or_else(|| Error::Validation("no pool to trade against".into()))?;
    let sale = cpmm::sell(&state, shares, outcome, schedule)?;
    market.set_state(answer_id, sale.state)?;
    let priced = Priced {
        fills: vec![sale_fill(sale.sale_value)],
        makers: Vec::new(),
        orders_to_cancel: Vec::new(),
        fees: sale.fees,
        prob_before: state.probability(),
        prob_after: sale.state.probability(),
    };
    Ok((priced, sale.sale_value))
}

impl<S: LedgerStore> Exchange<S> {
    /// Buy shares, filling resting limit orders before the pool.
    ///
    /// With a `limit_prob` the unfilled remainder rests in the book. The full
    /// order amount must be available, but only filled amounts are debited.
    pub async fn place_bet(&self, request: PlaceBet) -> Result<Committed<BetPlaced>> {
        ensure_positive(request.amount)?;
        matching::check_limit_prob(request.limit_prob)?;
        if request.expires_at.is_some() && request.limit_prob.is_none() {
            return Err(Error::Validation("only limit orders can expire".into()));
        }
        let keys = vec![contract_key(&request.contract_id), user_key(&request.user_id)];
        let (placed, event) = self
            .mutate("place_bet", keys, Priority::Normal, || {
                self.try_place_bet(&request)
            })
            .await?;
        Ok(self.committed(placed, vec![event]))
    }

    /// Sell held shares back to the market.
    pub async fn sell_shares(&self, request: SellShares) -> Result<Committed<BetPlaced>> {
        if let Some(shares) = request.shares {
            ensure_positive(shares)?;
        }
        let keys = vec![contract_key(&request.contract_id), user_key(&request.user_id)];
        let (placed, event) = self
            .mutate("sell_shares", keys, Priority::Normal, || {
                self.try_sell_shares(&request)
            })
            .await?;
        Ok(self.committed(placed, vec![event]))
    }

    /// Cancel a resting limit order. No balance changes.
    pub async fn cancel_bet(&self, bet_id: &BetId, user_id: &UserId) -> Result<Committed<Bet>> {
        let bet = self
            .store
            .bet(bet_id)
            .await?
            .ok_or_else(|| Error::not_found("bet", bet_id))?;
        let keys = vec![contract_key(&bet.value.contract_id)];
        let cancelled = self
            .mutate("cancel_bet", keys, Priority::Normal, || {
                self.try_cancel_bet(bet_id, user_id)
            })
            .await?;
        let event = Event::BetCancelled {
            contract_id: cancelled.contract_id.clone(),
            bet_id: cancelled.id.clone(),
            user_id: cancelled.user_id.clone(),
        };
        Ok(self.committed(cancelled, vec![event]))
    }

    async fn snapshot(
        &self,
        contract_id: &ContractId,
        user_id: &UserId,
        answer_id: Option<&AnswerId>,
        now: DateTime<Utc>,
    ) -> Result<Snapshot> {
        let contract = self.load_contract(contract_id).await?;
        let user = self.load_user(user_id).await?;
        ensure_tradable(&contract.value, answer_id, now)?;
        let bets = self.store.bets(contract_id).await?;
        let mut postings = Postings::new(now);
        postings.track(&user);
        Ok(Snapshot {
            contract,
            bets,
            postings,
        })
    }

    /// Track every maker in `resting` and return their available balances.
    async fn track_makers(
        &self,
        postings: &mut Postings,
        resting: &[Bet],
        taker: &UserId,
        token: Token,
    ) -> Result<HashMap<UserId, f64>> {
        let mut balances = HashMap::new();
        for bet in resting {
            if &bet.user_id == taker || balances.contains_key(&bet.user_id) {
                continue;
            }
            let balance = match self.store.user(&bet.user_id).await? {
                Some(maker) => {
                    postings.track(&maker);
                    to_f64(maker.value.balance_of(token))
                }
                None => 0.0,
            };
            balances.insert(bet.user_id.clone(), balance);
        }
        Ok(balances)
    }

    async fn try_place_bet(&self, request: &PlaceBet) -> Result<(BetPlaced, Event)> {
        let now = Utc::now();
        if request.expires_at.is_some_and(|expiry| expiry <= now) {
            return Err(Error::Validation("order expiry is in the past".into()));
        }
        let answer_id = request.answer_id.as_ref();
        let Snapshot {
            contract,
            bets,
            mut postings,
        } = self
            .snapshot(&request.contract_id, &request.user_id, answer_id, now)
            .await?;

        let token = contract.value.token;
        let needed = to_money(request.amount)?;
        let available = postings
            .balance(&request.user_id, token)
            .unwrap_or_default();
        if available < needed {
            return Err(Error::InsufficientBalance {
                user_id: request.user_id.to_string(),
                token: token.to_string(),
                needed,
                available,
            });
        }

        let resting = resting_in_pool(&bets, answer_id, now);
        let balances = self
            .track_makers(&mut postings, &resting, &request.user_id, token)
            .await?;
        let order = TakerOrder {
            user_id: &request.user_id,
            outcome: request.outcome,
            amount: request.amount,
            limit_prob: request.limit_prob,
        };
        let mut market = contract.value.clone();
        let priced = price_order(
            &mut market,
            answer_id,
            &order,
            &resting,
            &balances,
            &self.settings.fees,
            now,
        )?;

        let amount: f64 = priced.fills.iter().map(|f| f.amount).sum();
        let shares: f64 = priced.fills.iter().map(|f| f.shares).sum();
        let bet = Bet {
            id: BetId::generate(),
            contract_id: market.id.clone(),
            answer_id: request.answer_id.clone(),
            user_id: request.user_id.clone(),
            created_time: now,
            outcome: request.outcome,
            amount,
            shares,
            order_amount: request.limit_prob.map(|_| request.amount),
            limit_prob: request.limit_prob,
            expires_at: request.expires_at,
            prob_before: priced.prob_before,
            prob_after: priced.prob_after,
            fills: priced.fills.clone(),
            fees: priced.fees,
            is_filled: request.limit_prob.is_none() || request.amount - amount <= EPSILON,
            is_cancelled: false,
            is_redemption: false,
            is_sale: false,
        };
        self.commit_trade(contract.version, market, bet, priced, postings, &bets)
            .await
    }

    async fn try_sell_shares(&self, request: &SellShares) -> Result<(BetPlaced, Event)> {
        let now = Utc::now();
        let answer_id = request.answer_id.as_ref();
        let Snapshot {
            contract,
            bets,
            mut postings,
        } = self
            .snapshot(&request.contract_id, &request.user_id, answer_id, now)
            .await?;

        let held: f64 = bets
            .iter()
            .map(|b| &b.value)
            .filter(|b| {
                b.user_id == request.user_id
                    && b.answer_id.as_ref() == answer_id
                    && b.outcome == request.outcome
            })
            .map(|b| b.shares)
            .sum();
        if held <= EPSILON {
            return Err(Error::Validation(format!(
                "no {} shares to sell",
                request.outcome
            )));
        }
        let shares = request.shares.unwrap_or(held);
        if shares > held + EPSILON {
            return Err(Error::Validation(format!(
                "cannot sell {shares} {} shares, holding {held}",
                request.outcome
            )));
        }
        let shares = shares.min(held);

        let token = contract.value.token;
        let resting = resting_in_pool(&bets, answer_id, now);
        let balances = self
            .track_makers(&mut postings, &resting, &request.user_id, token)
            .await?;
        let mut market = contract.value.clone();
        let (priced, sale_value) = price_sale(
            &mut market,
            answer_id,
            &request.user_id,
            request.outcome,
            shares,
            &resting,
            &balances,
            &self.settings.fees,
            now,
        )?;
        if sale_value <= EPSILON {
            return Err(Error::Validation("shares are worth nothing at this price".into()));
        }

        let bet = Bet {
            id: BetId::generate(),
            contract_id: market.id.clone(),
            answer_id: request.answer_id.clone(),
            user_id: request.user_id.clone(),
            created_time: now,
            outcome: request.outcome,
            amount: -sale_value,
            shares: -shares,
            order_amount: None,
            limit_prob: None,
            expires_at: None,
            prob_before: priced.prob_before,
            prob_after: priced.prob_after,
            fills: priced.fills.clone(),
            fees: priced.fees,
            is_filled: true,
            is_cancelled: false,
            is_redemption: false,
            is_sale: true,
        };
        self.commit_trade(contract.version, market, bet, priced, postings, &bets)
            .await
    }

    /// Book a priced trade and commit it with every row it touched.
    async fn commit_trade(
        &self,
        version: u64,
        mut market: Contract,
        bet: Bet,
        priced: Priced,
        mut postings: Postings,
        stored: &[Versioned<Bet>],
    ) -> Result<(BetPlaced, Event)> {
        let token = market.token;
        let pool = Account::contract(&market.id);
        let data = TxnData::for_contract(&market.id)
            .answer(bet.answer_id.as_ref())
            .bet(&bet.id);

        let mut batch = WriteBatch::new();
        batch.expect(RowKey::Contract(market.id.clone()), Some(version));
        batch.expect(RowKey::Bet(bet.id.clone()), None);

        if bet.is_sale {
            post(
                &mut postings,
                pool.clone(),
                Account::user(&bet.user_id),
                -bet.amount,
                token,
                TxnCategory::BetSale,
                data.clone(),
            )?;
        } else {
            post(
                &mut postings,
                Account::user(&bet.user_id),
                pool.clone(),
                bet.amount,
                token,
                TxnCategory::Bet,
                data.clone(),
            )?;
        }
        self.post_fees(&mut postings, &market, &priced.fees, &data)?;

        let mut written: Vec<Bet> = Vec::new();
        for fill in &priced.makers {
            let maker = touch(&mut written, stored, &fill.bet_id, &mut batch)?;
            maker.record_maker_fill(Fill {
                matched_bet_id: Some(bet.id.clone()),
                amount: fill.amount,
                shares: fill.shares,
                timestamp: fill.timestamp,
                is_sale: false,
            });
            post(
                &mut postings,
                Account::user(&fill.user_id),
                pool.clone(),
                fill.amount,
                token,
                TxnCategory::LimitOrderFill,
                TxnData::for_contract(&market.id)
                    .answer(bet.answer_id.as_ref())
                    .bet(&fill.bet_id),
            )?;
        }
        for id in &priced.orders_to_cancel {
            touch(&mut written, stored, id, &mut batch)?.is_cancelled = true;
        }

        let mut traders: Vec<&UserId> = vec![&bet.user_id];
        for fill in &priced.makers {
            if !traders.contains(&&fill.user_id) {
                traders.push(&fill.user_id);
            }
        }
        let volume = bet.amount.abs() + priced.makers.iter().map(|m| m.amount).sum::<f64>();
        batch.contract_updates.push((
            market.id.clone(),
            Update::Increment {
                field: ContractField::Volume,
                by: volume,
            },
        ));
        if let Some(answer_id) = &bet.answer_id {
            batch.contract_updates.push((
                market.id.clone(),
                Update::Increment {
                    field: ContractField::AnswerVolume(answer_id.clone()),
                    by: volume,
                },
            ));
        }
        for trader in &traders {
            if !market.unique_bettor_ids.contains(trader) {
                batch.contract_updates.push((
                    market.id.clone(),
                    Update::ArrayAdd {
                        field: ContractField::UniqueBettorIds,
                        value: trader.to_string(),
                    },
                ));
            }
        }

        market.collected_fees = market.collected_fees + priced.fees;
        market.check_invariants()?;

        let mut changed = written.clone();
        changed.push(bet.clone());
        batch.metrics = metrics_for(&market, &merged_bets(stored, &changed), &traders);
        for row in written {
            batch.put_bet(row);
        }
        batch.put_bet(bet.clone());
        batch.put_contract(market.clone());

        let expectation = postings.write_into(&mut batch);
        let receipt = self.store.commit(batch).await?;
        ledger::reconcile(&expectation, &receipt);

        info!(
            contract_id = %market.id,
            bet_id = %bet.id,
            user_id = %bet.user_id,
            outcome = %bet.outcome,
            amount = bet.amount,
            shares = bet.shares,
            prob_after = priced.prob_after,
            makers = priced.makers.len(),
            sale = bet.is_sale,
            "bet committed"
        );

        let event = Event::BetPlaced(BetEvent {
            contract_id: market.id.clone(),
            answer_id: bet.answer_id.clone(),
            bet_id: bet.id.clone(),
            user_id: bet.user_id.clone(),
            outcome: bet.outcome,
            amount: bet.amount,
            shares: bet.shares,
            prob_after: priced.prob_after,
            makers: priced.makers.iter().map(|m| m.user_id.clone()).collect(),
        });
        Ok((
            BetPlaced {
                bet,
                makers: priced.makers,
                cancelled_orders: priced.orders_to_cancel,
                prob_after: priced.prob_after,
            },
            event,
        ))
    }

    async fn try_cancel_bet(&self, bet_id: &BetId, user_id: &UserId) -> Result<Bet> {
        let row = self
            .store
            .bet(bet_id)
            .await?
            .ok_or_else(|| Error::not_found("bet", bet_id))?;
        let mut bet = row.value;
        if &bet.user_id != user_id {
            return Err(Error::Permission(format!(
                "bet {bet_id} belongs to another user"
            )));
        }
        if !bet.is_limit_order() {
            return Err(Error::Validation(format!("bet {bet_id} is not a limit order")));
        }
        if bet.is_filled || bet.is_cancelled {
            return Err(Error::Conflict(format!(
                "limit order {bet_id} is already {}",
                if bet.is_cancelled { "cancelled" } else { "filled" }
            )));
        }
        bet.is_cancelled = true;

        let mut batch = WriteBatch::new();
        batch.expect(RowKey::Bet(bet.id.clone()), Some(row.version));
        batch.put_bet(bet.clone());
        self.store.commit(batch).await?;

        info!(
            contract_id = %bet.contract_id,
            bet_id = %bet.id,
            user_id = %bet.user_id,
            remaining = bet.remaining_amount(),
            "limit order cancelled"
        );
        Ok(bet)
    }
}
