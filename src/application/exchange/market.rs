//! Users, funding, markets and answers.

use chrono::Utc;
use tracing::info;

use crate::application::continuation::Committed;
use crate::application::ledger::{self, Postings};
use crate::application::queue::Priority;
use crate::domain::bet::Bet;
use crate::domain::contract::{AddAnswersMode, Answer, Contract, Mechanism};
use crate::domain::cpmm::{self, Pool};
use crate::domain::error::ensure_positive;
use crate::domain::fees::Fees;
use crate::domain::id::{AnswerId, ContractId, LiquidityId, UserId};
use crate::domain::liquidity::LiquidityProvision;
use crate::domain::money::{Token, EPSILON};
use crate::domain::patch::{ContractField, Update, UserField};
use crate::domain::rebalance::{self, NewAnswer};
use crate::domain::txn::{Account, Txn, TxnCategory, TxnData};
use crate::domain::user::{Role, User};
use crate::error::{Error, Result};
use crate::port::outbound::notifier::Event;
use crate::port::outbound::store::{LedgerStore, RowKey, WriteBatch};

use super::command::CreateMarket;
use super::service::{contract_key, merged_bets, metrics_for, post, touch, user_key, Exchange};

const OTHER_TEXT: &str = "Other";

/// Initial pools for a new market funded with `ante`.
///
/// Sum-to-one answers start at `1/n` each; every pool pays out the ante in
/// the worst case.
fn initial_pools(mechanism: Mechanism, answers: usize, ante: f64) -> Vec<Pool> {
    match mechanism {
        Mechanism::SinglePool => vec![Pool::new(ante, ante)],
        Mechanism::MultiPool => {
            let each = ante / answers as f64;
            vec![Pool::new(each, each); answers]
        }
        Mechanism::MultiPoolSumToOne => {
            let no = ante / (2.0 * (answers as f64 - 1.0));
            vec![Pool::new(ante / 2.0, no); answers]
        }
    }
}

fn validate_market(request: &CreateMarket, max_answers: usize) -> Result<()> {
    ensure_positive(request.ante)?;
    if request.question.trim().is_empty() {
        return Err(Error::Validation("question must not be empty".into()));
    }
    if request.answers.iter().any(|a| a.trim().is_empty()) {
        return Err(Error::Validation("answers must not be empty".into()));
    }
    let listed = request.answers.len();
    let total = listed + usize::from(request.other_bucket);
    match request.mechanism {
        Mechanism::SinglePool if listed > 0 || request.other_bucket => Err(Error::Validation(
            "binary markets take no answers".into(),
        )),
        Mechanism::MultiPool if request.other_bucket => Err(Error::Validation(
            "only sum-to-one markets have an Other bucket".into(),
        )),
        Mechanism::MultiPool if listed == 0 => Err(Error::Validation(
            "multi-answer markets need at least one answer".into(),
        )),
        Mechanism::MultiPoolSumToOne if total < 2 => Err(Error::Validation(
            "sum-to-one markets need at least two answers".into(),
        )),
        _ if total > max_answers => Err(Error::Validation(format!(
            "at most {max_answers} answers are allowed"
        ))),
        _ => Ok(()),
    }
}

impl<S: LedgerStore> Exchange<S> {
    /// Register a user with empty balances.
    pub async fn create_user(&self, id: UserId, name: &str, role: Role) -> Result<User> {
        let keys = vec![user_key(&id)];
        self.mutate("create_user", keys, Priority::Normal, || {
            self.try_create_user(&id, name, role)
        })
        .await
    }

    /// Fund a user from the bank.
    pub async fn grant(&self, user_id: &UserId, amount: f64, token: Token) -> Result<Txn> {
        ensure_positive(amount)?;
        let keys = vec![user_key(user_id)];
        self.mutate("grant", keys, Priority::Normal, || {
            self.try_grant(user_id, amount, token)
        })
        .await
    }

    async fn try_create_user(&self, id: &UserId, name: &str, role: Role) -> Result<User> {
        if self.store.user(id).await?.is_some() {
            return Err(Error::Conflict(format!("user {id} already exists")));
        }
        let user = User::new(id.clone(), name, Utc::now()).with_role(role);
        let mut batch = WriteBatch::new();
        batch.expect(RowKey::User(id.clone()), None);
        batch.users.push(user.clone());
        self.store.commit(batch).await?;
        info!(user_id = %user.id, role = ?user.role, "user created");
        Ok(user)
    }

    async fn try_grant(&self, user_id: &UserId, amount: f64, token: Token) -> Result<Txn> {
        let now = Utc::now();
        let user = self.load_user(user_id).await?;
        let mut postings = Postings::new(now);
        postings.track(&user);
        postings.transfer(
            self.bank(),
            Account::user(user_id),
            amount,
            token,
            TxnCategory::ManaGrant,
            TxnData::default(),
        )?;
        let txn = postings
            .txns()
            .first()
            .cloned()
            .ok_or_else(|| Error::Invariant("grant booked no transaction".into()))?;

        let mut batch = WriteBatch::new();
        batch.user_updates.push((
            user_id.clone(),
            Update::Increment {
                field: UserField::TotalDeposits,
                by: amount,
            },
        ));
        let expectation = postings.write_into(&mut batch);
        let receipt = self.store.commit(batch).await?;
        ledger::reconcile(&expectation, &receipt);

        info!(user_id = %user_id, amount, token = %token, txn_id = %txn.id, "grant committed");
        Ok(txn)
    }

    /// Open a market funded by the creator's ante.
    ///
    /// The ante becomes the initial pools and the first liquidity provision.
    pub async fn create_market(&self, request: CreateMarket) -> Result<Committed<Contract>> {
        validate_market(&request, self.settings.markets.max_answers)?;
        let keys = vec![user_key(&request.creator_id)];
        let contract = self
            .mutate("create_market", keys, Priority::Normal, || {
                self.try_create_market(&request)
            })
            .await?;
        let event = Event::MarketCreated {
            contract_id: contract.id.clone(),
            creator_id: contract.creator_id.clone(),
        };
        Ok(self.committed(contract, vec![event]))
    }

    async fn try_create_market(&self, request: &CreateMarket) -> Result<Contract> {
        let now = Utc::now();
        let creator = self.load_user(&request.creator_id).await?;
        let id = ContractId::generate();

        let mut texts: Vec<&str> = request.answers.iter().map(|a| a.trim()).collect();
        if request.other_bucket {
            texts.push(OTHER_TEXT);
        }
        let pools = initial_pools(request.mechanism, texts.len(), request.ante);

        let answers: Vec<Answer> = if request.mechanism == Mechanism::SinglePool {
            Vec::new()
        } else {
            texts
                .iter()
                .zip(&pools)
                .enumerate()
                .map(|(index, (text, pool))| {
                    let mut answer = Answer::new(
                        AnswerId::generate(),
                        index,
                        *text,
                        request.creator_id.clone(),
                        *pool,
                        now,
                    );
                    answer.is_other = request.other_bucket && index == texts.len() - 1;
                    answer
                })
                .collect()
        };
        let (pool, liquidity) = match request.mechanism {
            Mechanism::SinglePool => {
                let pool = pools.first().copied().unwrap_or_default();
                (pool, cpmm::liquidity(pool, 0.5))
            }
            _ => (
                Pool::default(),
                answers.iter().map(|a| a.total_liquidity).sum(),
            ),
        };

        let contract = Contract {
            id: id.clone(),
            creator_id: request.creator_id.clone(),
            question: request.question.trim().to_string(),
            mechanism: request.mechanism,
            token: request.token,
            pool,
            p: 0.5,
            total_liquidity: request.ante,
            subsidy_pool: 0.0,
            collected_fees: Fees::ZERO,
            volume: 0.0,
            unique_bettor_ids: Vec::new(),
            close_time: request.close_time,
            created_time: now,
            resolution: None,
            add_answers_mode: request.add_answers_mode,
            sum_to_one_with_other_bucket: request.other_bucket,
            answers,
        };
        contract.check_invariants()?;

        let provision = LiquidityProvision {
            id: LiquidityId::generate(),
            contract_id: id.clone(),
            answer_id: None,
            user_id: request.creator_id.clone(),
            amount: request.ante,
            liquidity,
            created_time: now,
        };

        let mut postings = Postings::new(now);
        postings.track(&creator);
        post(
            &mut postings,
            Account::user(&request.creator_id),
            Account::contract(&id),
            request.ante,
            request.token,
            TxnCategory::AddLiquidity,
            TxnData::for_contract(&id),
        )?;

        let mut batch = WriteBatch::new();
        batch.expect(RowKey::Contract(id.clone()), None);
        batch.put_contract(contract.clone());
        batch.liquidity.push(provision);
        let expectation = postings.write_into(&mut batch);
        let receipt = self.store.commit(batch).await?;
        ledger::reconcile(&expectation, &receipt);

        info!(
            contract_id = %id,
            creator_id = %contract.creator_id,
            mechanism = %contract.mechanism,
            answers = contract.answers.len(),
            ante = request.ante,
            "market created"
        );
        Ok(contract)
    }

    /// Add an answer to a multi-answer market, paid by the caller.
    pub async fn create_answer(
        &self,
        contract_id: &ContractId,
        user_id: &UserId,
        text: &str,
    ) -> Result<Committed<Answer>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Validation("answer text must not be empty".into()));
        }
        let keys = vec![contract_key(contract_id), user_key(user_id)];
        let answer = self
            .mutate("create_answer", keys, Priority::Normal, || {
                self.try_create_answer(contract_id, user_id, text)
            })
            .await?;
        let event = Event::AnswerCreated {
            contract_id: contract_id.clone(),
            answer_id: answer.id.clone(),
            user_id: user_id.clone(),
        };
        Ok(self.committed(answer, vec![event]))
    }

    async fn try_create_answer(
        &self,
        contract_id: &ContractId,
        user_id: &UserId,
        text: &str,
    ) -> Result<Answer> {
        let now = Utc::now();
        let contract = self.load_contract(contract_id).await?;
        let user = self.load_user(user_id).await?;
        let market = &contract.value;

        if market.is_resolved() {
            return Err(Error::Conflict(format!("market {contract_id} is resolved")));
        }
        match market.add_answers_mode {
            AddAnswersMode::Disabled => {
                return Err(Error::Permission(format!(
                    "market {contract_id} does not accept new answers"
                )))
            }
            AddAnswersMode::OnlyCreator
                if &market.creator_id != user_id && !user.value.role.is_elevated() =>
            {
                return Err(Error::Permission(format!(
                    "only the creator may add answers to market {contract_id}"
                )))
            }
            _ => {}
        }
        if market.unresolved_answers().count() >= self.settings.markets.max_answers {
            return Err(Error::Validation(format!(
                "market {contract_id} already has {} answers",
                self.settings.markets.max_answers
            )));
        }
        if market
            .answers
            .iter()
            .any(|a| a.text.eq_ignore_ascii_case(text))
        {
            return Err(Error::Validation(format!("answer '{text}' already exists")));
        }

        let cost = self.settings.markets.answer_cost;
        let stored = self.store.bets(contract_id).await?;
        let bets: Vec<Bet> = stored.iter().map(|b| b.value.clone()).collect();
        let new = NewAnswer {
            id: AnswerId::generate(),
            text,
            user_id,
            cost,
        };
        let plan = rebalance::add_answer(market, &new, &bets, now)?;

        let mut next = market.clone();
        next.answers = plan.answers;
        next.check_invariants()?;
        let answer = next
            .answer(&plan.answer_id)
            .cloned()
            .ok_or_else(|| Error::Invariant("new answer missing after rebalance".into()))?;

        let mut postings = Postings::new(now);
        postings.track(&user);
        post(
            &mut postings,
            Account::user(user_id),
            Account::contract(contract_id),
            cost,
            next.token,
            TxnCategory::AddAnswer,
            TxnData::for_contract(contract_id).answer(Some(&answer.id)),
        )?;

        let mut batch = WriteBatch::new();
        batch.expect(RowKey::Contract(contract_id.clone()), Some(contract.version));
        batch.contract_updates.push((
            contract_id.clone(),
            Update::Increment {
                field: ContractField::TotalLiquidity,
                by: cost - plan.subsidy,
            },
        ));
        if plan.subsidy > EPSILON {
            batch.contract_updates.push((
                contract_id.clone(),
                Update::Increment {
                    field: ContractField::SubsidyPool,
                    by: plan.subsidy,
                },
            ));
        }

        let mut written: Vec<Bet> = Vec::new();
        for id in &plan.orders_to_cancel {
            touch(&mut written, &stored, id, &mut batch)?.is_cancelled = true;
        }
        let mut converted: Vec<&UserId> = Vec::new();
        for bet in &plan.conversions {
            if !converted.contains(&&bet.user_id) {
                converted.push(&bet.user_id);
            }
            batch.expect(RowKey::Bet(bet.id.clone()), None);
        }
        written.extend(plan.conversions.iter().cloned());
        if !converted.is_empty() {
            batch.metrics = metrics_for(&next, &merged_bets(&stored, &written), &converted);
        }
        for bet in written {
            batch.put_bet(bet);
        }

        batch.liquidity.push(LiquidityProvision {
            id: LiquidityId::generate(),
            contract_id: contract_id.clone(),
            answer_id: Some(answer.id.clone()),
            user_id: user_id.clone(),
            amount: cost,
            liquidity: cpmm::liquidity(answer.pool, 0.5),
            created_time: now,
        });
        batch.put_contract(next);

        let expectation = postings.write_into(&mut batch);
        let receipt = self.store.commit(batch).await?;
        ledger::reconcile(&expectation, &receipt);

        info!(
            contract_id = %contract_id,
            answer_id = %answer.id,
            user_id = %user_id,
            conversions = plan.conversions.len(),
            cancelled_orders = plan.orders_to_cancel.len(),
            de_arbitrage_shares = plan.de_arbitrage_shares,
            "answer created"
        );
        Ok(answer)
    }
}
