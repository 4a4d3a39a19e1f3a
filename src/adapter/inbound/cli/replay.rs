//! `oddsmith replay`: drive the exchange from a JSONL script.
//!
//! Each non-blank line that does not start with `#` is one [`Step`]. Markets
//! and bets get generated ids, so scripts refer to them by the alias given in
//! `create_market.name` and `bet.name`. Answers are referred to by their
//! index in the market.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::application::exchange::command::{CreateMarket, PlaceBet, ResolveMarket, SellShares};
use crate::application::exchange::service::Exchange;
use crate::domain::contract::{AddAnswersMode, Contract, Mechanism};
use crate::domain::id::{AnswerId, BetId, ContractId, UserId};
use crate::domain::money::Token;
use crate::domain::outcome::Outcome;
use crate::domain::resolution::{AnswerPercent, ResolutionOutcome};
use crate::domain::user::Role;
use crate::error::{Error, Result};
use crate::infrastructure::bootstrap::build_exchange;
use crate::infrastructure::config::settings::Config;
use crate::port::outbound::store::{LedgerStore, TxnFilter};

/// One scripted operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    CreateUser {
        id: String,
        #[serde(default)]
        role: Role,
    },
    Grant {
        user: String,
        amount: f64,
        #[serde(default)]
        token: Token,
    },
    CreateMarket {
        name: String,
        creator: String,
        mechanism: Mechanism,
        ante: f64,
        #[serde(default)]
        token: Token,
        #[serde(default)]
        answers: Vec<String>,
        #[serde(default)]
        other_bucket: bool,
        #[serde(default)]
        add_answers_mode: AddAnswersMode,
    },
    Bet {
        #[serde(default)]
        name: Option<String>,
        market: String,
        user: String,
        outcome: Outcome,
        amount: f64,
        #[serde(default)]
        answer: Option<usize>,
        #[serde(default)]
        limit_prob: Option<f64>,
    },
    Sell {
        market: String,
        user: String,
        outcome: Outcome,
        #[serde(default)]
        shares: Option<f64>,
        #[serde(default)]
        answer: Option<usize>,
    },
    Cancel {
        bet: String,
        user: String,
    },
    AddLiquidity {
        market: String,
        user: String,
        amount: f64,
    },
    RemoveLiquidity {
        market: String,
        user: String,
        amount: f64,
    },
    AddAnswer {
        market: String,
        user: String,
        text: String,
    },
    /// `CHOICE` and `PERCENTAGES` outcomes name answers by index.
    Resolve {
        market: String,
        user: String,
        outcome: ResolutionOutcome,
        #[serde(default)]
        answer: Option<usize>,
    },
    Unresolve {
        market: String,
        user: String,
        #[serde(default)]
        answer: Option<usize>,
    },
}

impl Step {
    /// Name of the operation as written in scripts.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::CreateUser { .. } => "create_user",
            Self::Grant { .. } => "grant",
            Self::CreateMarket { .. } => "create_market",
            Self::Bet { .. } => "bet",
            Self::Sell { .. } => "sell",
            Self::Cancel { .. } => "cancel",
            Self::AddLiquidity { .. } => "add_liquidity",
            Self::RemoveLiquidity { .. } => "remove_liquidity",
            Self::AddAnswer { .. } => "add_answer",
            Self::Resolve { .. } => "resolve",
            Self::Unresolve { .. } => "unresolve",
        }
    }
}

/// Parse a script into `(line number, step)` pairs.
///
/// # Errors
/// Returns [`Error::Parse`] naming the first malformed line.
pub fn parse_script(content: &str) -> Result<Vec<(usize, Step)>> {
    content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| {
            serde_json::from_str(line)
                .map(|step| (number, step))
                .map_err(|e| Error::Parse(format!("line {number}: {e}")))
        })
        .collect()
}

/// Totals printed after the last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub steps: usize,
    pub failures: usize,
    pub txns: usize,
}

/// Applies steps to an exchange, tracking script aliases.
pub struct Replay<'a, S> {
    exchange: &'a Exchange<S>,
    markets: HashMap<String, ContractId>,
    bets: HashMap<String, BetId>,
}

impl<'a, S: LedgerStore> Replay<'a, S> {
    pub fn new(exchange: &'a Exchange<S>) -> Self {
        Self {
            exchange,
            markets: HashMap::new(),
            bets: HashMap::new(),
        }
    }

    /// Apply one step and describe what it committed.
    ///
    /// # Errors
    /// Returns the exchange error, or [`Error::NotFound`] for an unknown alias
    /// or answer index.
    pub async fn apply(&mut self, step: Step) -> Result<Value> {
        match step {
            Step::CreateUser { id, role } => {
                let user = self
                    .exchange
                    .create_user(UserId::new(id.clone()), &id, role)
                    .await?;
                Ok(json!({ "user_id": user.id }))
            }
            Step::Grant {
                user,
                amount,
                token,
            } => {
                let txn = self
                    .exchange
                    .grant(&UserId::new(user), amount, token)
                    .await?;
                Ok(json!({ "txn_id": txn.id, "amount": txn.amount, "token": txn.token }))
            }
            Step::CreateMarket {
                name,
                creator,
                mechanism,
                ante,
                token,
                answers,
                other_bucket,
                add_answers_mode,
            } => {
                let request = CreateMarket {
                    creator_id: UserId::new(creator),
                    question: name.clone(),
                    mechanism,
                    token,
                    ante,
                    answers,
                    close_time: None,
                    add_answers_mode,
                    other_bucket,
                };
                let contract = self.exchange.create_market(request).await?.finish().await;
                let answers: Vec<&AnswerId> = contract.answers.iter().map(|a| &a.id).collect();
                let result = json!({ "contract_id": contract.id, "answers": answers });
                self.markets.insert(name, contract.id);
                Ok(result)
            }
            Step::Bet {
                name,
                market,
                user,
                outcome,
                amount,
                answer,
                limit_prob,
            } => {
                let contract_id = self.market(&market)?;
                let answer_id = self.answer_id(&contract_id, answer).await?;
                let request = PlaceBet {
                    contract_id,
                    user_id: UserId::new(user),
                    amount,
                    outcome,
                    answer_id,
                    limit_prob,
                    expires_at: None,
                };
                let placed = self.exchange.place_bet(request).await?.finish().await;
                if let Some(name) = name {
                    self.bets.insert(name, placed.bet.id.clone());
                }
                Ok(json!({
                    "bet_id": placed.bet.id,
                    "amount": placed.bet.amount,
                    "shares": placed.bet.shares,
                    "prob_after": placed.prob_after,
                    "filled": placed.bet.is_filled,
                    "makers": placed.makers.len(),
                }))
            }
            Step::Sell {
                market,
                user,
                outcome,
                shares,
                answer,
            } => {
                let contract_id = self.market(&market)?;
                let answer_id = self.answer_id(&contract_id, answer).await?;
                let request = SellShares {
                    contract_id,
                    user_id: UserId::new(user),
                    outcome,
                    shares,
                    answer_id,
                };
                let sold = self.exchange.sell_shares(request).await?.finish().await;
                Ok(json!({
                    "bet_id": sold.bet.id,
                    "proceeds": -sold.bet.amount,
                    "shares": sold.bet.shares,
                    "prob_after": sold.prob_after,
                }))
            }
            Step::Cancel { bet, user } => {
                let bet_id = self
                    .bets
                    .get(&bet)
                    .cloned()
                    .ok_or_else(|| Error::not_found("bet alias", &bet))?;
                let bet = self
                    .exchange
                    .cancel_bet(&bet_id, &UserId::new(user))
                    .await?
                    .finish()
                    .await;
                Ok(json!({ "bet_id": bet.id, "cancelled": bet.is_cancelled }))
            }
            Step::AddLiquidity {
                market,
                user,
                amount,
            } => {
                let contract_id = self.market(&market)?;
                let provision = self
                    .exchange
                    .add_liquidity(&contract_id, &UserId::new(user), amount)
                    .await?
                    .finish()
                    .await;
                Ok(json!({ "liquidity_id": provision.id, "amount": provision.amount }))
            }
            Step::RemoveLiquidity {
                market,
                user,
                amount,
            } => {
                let contract_id = self.market(&market)?;
                let provision = self
                    .exchange
                    .remove_liquidity(&contract_id, &UserId::new(user), amount)
                    .await?
                    .finish()
                    .await;
                Ok(json!({ "liquidity_id": provision.id, "amount": provision.amount }))
            }
            Step::AddAnswer { market, user, text } => {
                let contract_id = self.market(&market)?;
                let answer = self
                    .exchange
                    .create_answer(&contract_id, &UserId::new(user), &text)
                    .await?
                    .finish()
                    .await;
                Ok(json!({ "answer_id": answer.id, "index": answer.index, "prob": answer.prob }))
            }
            Step::Resolve {
                market,
                user,
                outcome,
                answer,
            } => {
                let contract_id = self.market(&market)?;
                let contract = self.contract(&contract_id).await?;
                let outcome = outcome_by_index(outcome, &contract)?;
                let answer_id = index_to_answer(&contract, answer)?;
                let request = ResolveMarket {
                    contract_id,
                    user_id: UserId::new(user),
                    outcome,
                    answer_id,
                };
                let settlement = self.exchange.resolve_market(request).await?.finish().await;
                Ok(serde_json::to_value(settlement)?)
            }
            Step::Unresolve {
                market,
                user,
                answer,
            } => {
                let contract_id = self.market(&market)?;
                let answer_id = self.answer_id(&contract_id, answer).await?;
                let settlement = self
                    .exchange
                    .unresolve_market(&contract_id, &UserId::new(user), answer_id.as_ref())
                    .await?
                    .finish()
                    .await;
                Ok(serde_json::to_value(settlement)?)
            }
        }
    }

    fn market(&self, alias: &str) -> Result<ContractId> {
        self.markets
            .get(alias)
            .cloned()
            .ok_or_else(|| Error::not_found("market alias", alias))
    }

    async fn contract(&self, id: &ContractId) -> Result<Contract> {
        self.exchange
            .store()
            .contract(id)
            .await?
            .map(|row| row.value)
            .ok_or_else(|| Error::not_found("contract", id))
    }

    async fn answer_id(&self, id: &ContractId, index: Option<usize>) -> Result<Option<AnswerId>> {
        match index {
            None => Ok(None),
            Some(_) => index_to_answer(&self.contract(id).await?, index),
        }
    }
}

fn index_to_answer(contract: &Contract, index: Option<usize>) -> Result<Option<AnswerId>> {
    index
        .map(|i| {
            contract
                .answers
                .iter()
                .find(|a| a.index == i)
                .map(|a| a.id.clone())
                .ok_or_else(|| Error::not_found("answer index", i))
        })
        .transpose()
}

/// Rewrite answer references that are numeric indices into real ids.
fn outcome_by_index(outcome: ResolutionOutcome, contract: &Contract) -> Result<ResolutionOutcome> {
    let lookup = |id: AnswerId| -> Result<AnswerId> {
        match id.as_str().parse::<usize>() {
            Ok(index) => index_to_answer(contract, Some(index)).map(|a| a.unwrap_or(id)),
            Err(_) => Ok(id),
        }
    };
    Ok(match outcome {
        ResolutionOutcome::Choice { answer_id } => ResolutionOutcome::Choice {
            answer_id: lookup(answer_id)?,
        },
        ResolutionOutcome::Percentages { resolutions } => ResolutionOutcome::Percentages {
            resolutions: resolutions
                .into_iter()
                .map(|r| {
                    Ok(AnswerPercent {
                        answer_id: lookup(r.answer_id)?,
                        percent: r.percent,
                    })
                })
                .collect::<Result<_>>()?,
        },
        other => other,
    })
}

/// Run `steps` against `exchange`, writing one JSON line per step to `out`.
///
/// Stops at the first failure unless `keep_going` is set.
///
/// # Errors
/// Returns an error only if `out` cannot be written or the final ledger
/// count cannot be read. Step failures are reported in the output.
pub async fn run_steps<S: LedgerStore, W: Write>(
    exchange: &Exchange<S>,
    steps: Vec<(usize, Step)>,
    keep_going: bool,
    out: &mut W,
) -> Result<ReplayReport> {
    let mut replay = Replay::new(exchange);
    let mut report = ReplayReport {
        steps: 0,
        failures: 0,
        txns: 0,
    };

    for (line, step) in steps {
        let op = step.op();
        report.steps += 1;
        let record = match replay.apply(step).await {
            Ok(result) => json!({ "line": line, "op": op, "ok": true, "result": result }),
            Err(e) => {
                report.failures += 1;
                warn!(line, op, error = %e, "Replay step failed");
                json!({ "line": line, "op": op, "ok": false, "error": e.to_string() })
            }
        };
        writeln!(out, "{record}")?;
        if report.failures > 0 && !keep_going {
            break;
        }
    }

    report.txns = exchange.store().txns(&TxnFilter::default()).await?.len();
    writeln!(
        out,
        "{}",
        json!({ "summary": { "steps": report.steps, "failures": report.failures, "txns": report.txns } })
    )?;
    info!(
        steps = report.steps,
        failures = report.failures,
        txns = report.txns,
        "Replay finished"
    );
    Ok(report)
}

/// Load the config and script, then replay the script.
///
/// # Errors
/// Returns an error if the config, store or script cannot be loaded.
pub async fn execute<W: Write>(
    config_path: &Path,
    script_path: &Path,
    keep_going: bool,
    out: &mut W,
) -> Result<ReplayReport> {
    let config = Config::load(config_path)?;
    config.init_logging();
    let exchange = build_exchange(&config)?;
    let content = std::fs::read_to_string(script_path)?;
    let steps = parse_script(&content)?;
    info!(steps = steps.len(), script = %script_path.display(), "Replaying script");
    run_steps(&exchange, steps, keep_going, out).await
}
