//! SQLite ledger store implementation.
//!
//! Every commit runs inside one `BEGIN IMMEDIATE` transaction: expectations
//! are checked against the stored versions, the batch is staged in memory and
//! the staged rows are written before the transaction commits.

use std::str::FromStr;

use diesel::prelude::*;
use diesel::SqliteConnection;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::adapter::outbound::sqlite::database::connection::{
    checkout, create_pool, run_migrations, DbConnection, DbPool,
};
use crate::adapter::outbound::sqlite::database::model::{
    BetRow, ContractRow, LiquidityRow, MetricRow, SystemBalanceRow, TxnRow, UserRow,
};
use crate::adapter::outbound::sqlite::database::schema::{
    bets, contracts, liquidity, metrics, system_balances, txns, users,
};
use crate::adapter::outbound::staging::{stage, RowSource};
use crate::domain::bet::Bet;
use crate::domain::contract::Contract;
use crate::domain::id::{BetId, ContractId, UserId};
use crate::domain::liquidity::LiquidityProvision;
use crate::domain::metric::ContractMetric;
use crate::domain::money::{Money, Token};
use crate::domain::txn::{Account, Txn};
use crate::domain::user::User;
use crate::error::{Error, Result};
use crate::port::outbound::store::{
    CommitReceipt, LedgerStore, RowKey, TxnFilter, Versioned, WriteBatch,
};

/// SQLite-backed ledger store.
pub struct SqliteLedgerStore {
    /// Database connection pool.
    pool: DbPool,
}

impl SqliteLedgerStore {
    /// Create a store over an already migrated pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open `database_url`, creating and migrating it when needed.
    ///
    /// # Errors
    /// Returns an error if the pool cannot be built or migrations fail.
    pub fn open(database_url: &str, pool_size: u32) -> Result<Self> {
        let pool = create_pool(database_url, pool_size)?;
        run_migrations(&pool)?;
        Ok(Self::new(pool))
    }

    fn conn(&self) -> Result<DbConnection> {
        checkout(&self.pool)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    Ok(serde_json::from_str(body)?)
}

/// The serde name of a unit variant, e.g. `LIMIT_ORDER_FILL`.
fn label<T: Serialize>(value: &T) -> Result<String> {
    Ok(match serde_json::to_value(value)? {
        serde_json::Value::String(name) => name,
        other => other.to_string(),
    })
}

fn from_stored(version: i64) -> u64 {
    u64::try_from(version).unwrap_or_default()
}

fn to_stored(version: u64) -> Result<i64> {
    i64::try_from(version).map_err(|_| Error::Invariant(format!("version {version} overflows")))
}

fn load_user(conn: &mut SqliteConnection, id: &UserId) -> Result<Option<Versioned<User>>> {
    users::table
        .find(id.as_str())
        .select(UserRow::as_select())
        .first(conn)
        .optional()?
        .map(|row| Ok(Versioned::new(decode(&row.body)?, from_stored(row.version))))
        .transpose()
}

fn load_contract(
    conn: &mut SqliteConnection,
    id: &ContractId,
) -> Result<Option<Versioned<Contract>>> {
    contracts::table
        .find(id.as_str())
        .select(ContractRow::as_select())
        .first(conn)
        .optional()?
        .map(|row| Ok(Versioned::new(decode(&row.body)?, from_stored(row.version))))
        .transpose()
}

fn load_system_balance(
    conn: &mut SqliteConnection,
    account: &Account,
    token: Token,
) -> Result<Money> {
    let stored: Option<String> = system_balances::table
        .find((account.to_string(), token.as_str()))
        .select(system_balances::amount)
        .first(conn)
        .optional()?;
    stored.map_or(Ok(Decimal::ZERO), |amount| {
        Decimal::from_str(&amount).map_err(|e| Error::Parse(e.to_string()))
    })
}

struct Source<'a> {
    conn: &'a mut SqliteConnection,
}

impl RowSource for Source<'_> {
    fn version(&mut self, key: &RowKey) -> Result<Option<u64>> {
        let version: Option<i64> = match key {
            RowKey::User(id) => users::table
                .find(id.as_str())
                .select(users::version)
                .first(self.conn)
                .optional()?,
            RowKey::Contract(id) => contracts::table
                .find(id.as_str())
                .select(contracts::version)
                .first(self.conn)
                .optional()?,
            RowKey::Bet(id) => bets::table
                .filter(bets::id.eq(id.as_str()))
                .select(bets::version)
                .first(self.conn)
                .optional()?,
        };
        Ok(version.map(from_stored))
    }

    fn user(&mut self, id: &UserId) -> Result<Option<Versioned<User>>> {
        load_user(self.conn, id)
    }

    fn contract(&mut self, id: &ContractId) -> Result<Option<Versioned<Contract>>> {
        load_contract(self.conn, id)
    }

    fn system_balance(&mut self, account: &Account, token: Token) -> Result<Money> {
        load_system_balance(self.conn, account, token)
    }
}

fn txn_row(txn: &Txn) -> Result<TxnRow> {
    Ok(TxnRow {
        id: txn.id.to_string(),
        contract_id: txn.data.contract_id.as_ref().map(ToString::to_string),
        resolution_id: txn.data.resolution_id.clone(),
        category: label(&txn.category)?,
        from_account: txn.from.to_string(),
        to_account: txn.to.to_string(),
        token: txn.token.as_str().to_string(),
        amount: txn.amount.to_string(),
        created_time: txn.created_time.to_rfc3339(),
        body: encode(txn)?,
    })
}

fn write_batch(conn: &mut SqliteConnection, batch: &WriteBatch) -> Result<CommitReceipt> {
    let staged = stage(batch, &mut Source { conn: &mut *conn })?;

    for row in staged.users.values() {
        diesel::replace_into(users::table)
            .values(UserRow {
                id: row.value.id.to_string(),
                version: to_stored(row.version)?,
                name: row.value.name.clone(),
                body: encode(&row.value)?,
            })
            .execute(conn)?;
    }
    for row in staged.contracts.values() {
        diesel::replace_into(contracts::table)
            .values(ContractRow {
                id: row.value.id.to_string(),
                version: to_stored(row.version)?,
                creator_id: row.value.creator_id.to_string(),
                body: encode(&row.value)?,
            })
            .execute(conn)?;
    }
    for row in &staged.bets {
        let bet = BetRow {
            id: row.value.id.to_string(),
            contract_id: row.value.contract_id.to_string(),
            user_id: row.value.user_id.to_string(),
            version: to_stored(row.version)?,
            body: encode(&row.value)?,
        };
        if row.version == 1 {
            diesel::insert_into(bets::table).values(&bet).execute(conn)?;
        } else {
            diesel::update(bets::table.filter(bets::id.eq(&bet.id)))
                .set((bets::version.eq(bet.version), bets::body.eq(&bet.body)))
                .execute(conn)?;
        }
    }
    for ((account, token), amount) in &staged.system_balances {
        diesel::replace_into(system_balances::table)
            .values(SystemBalanceRow {
                account: account.to_string(),
                token: token.as_str().to_string(),
                amount: amount.to_string(),
            })
            .execute(conn)?;
    }
    for provision in &batch.liquidity {
        diesel::insert_into(liquidity::table)
            .values(LiquidityRow {
                id: provision.id.to_string(),
                contract_id: provision.contract_id.to_string(),
                user_id: provision.user_id.to_string(),
                body: encode(provision)?,
            })
            .execute(conn)?;
    }
    for txn in &batch.txns {
        diesel::insert_into(txns::table)
            .values(txn_row(txn)?)
            .execute(conn)?;
    }
    for metric in &batch.metrics {
        diesel::replace_into(metrics::table)
            .values(MetricRow {
                user_id: metric.user_id.to_string(),
                contract_id: metric.contract_id.to_string(),
                answer_id: metric
                    .answer_id
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string),
                body: encode(metric)?,
            })
            .execute(conn)?;
    }
    Ok(staged.receipt)
}

impl LedgerStore for SqliteLedgerStore {
    async fn user(&self, id: &UserId) -> Result<Option<Versioned<User>>> {
        let mut conn = self.conn()?;
        load_user(&mut conn, id)
    }

    async fn contract(&self, id: &ContractId) -> Result<Option<Versioned<Contract>>> {
        let mut conn = self.conn()?;
        load_contract(&mut conn, id)
    }

    async fn bet(&self, id: &BetId) -> Result<Option<Versioned<Bet>>> {
        let mut conn = self.conn()?;
        bets::table
            .filter(bets::id.eq(id.as_str()))
            .select(BetRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(|row| Ok(Versioned::new(decode(&row.body)?, from_stored(row.version))))
            .transpose()
    }

    async fn bets(&self, contract_id: &ContractId) -> Result<Vec<Versioned<Bet>>> {
        let mut conn = self.conn()?;
        let rows: Vec<BetRow> = bets::table
            .filter(bets::contract_id.eq(contract_id.as_str()))
            .order(bets::seq.asc())
            .select(BetRow::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|row| Ok(Versioned::new(decode(&row.body)?, from_stored(row.version))))
            .collect()
    }

    async fn liquidity(&self, contract_id: &ContractId) -> Result<Vec<LiquidityProvision>> {
        let mut conn = self.conn()?;
        let bodies: Vec<String> = liquidity::table
            .filter(liquidity::contract_id.eq(contract_id.as_str()))
            .order(liquidity::seq.asc())
            .select(liquidity::body)
            .load(&mut conn)?;
        bodies.iter().map(|body| decode(body)).collect()
    }

    async fn metrics(&self, contract_id: &ContractId) -> Result<Vec<ContractMetric>> {
        let mut conn = self.conn()?;
        let bodies: Vec<String> = metrics::table
            .filter(metrics::contract_id.eq(contract_id.as_str()))
            .order((metrics::user_id.asc(), metrics::answer_id.asc()))
            .select(metrics::body)
            .load(&mut conn)?;
        bodies.iter().map(|body| decode(body)).collect()
    }

    async fn txns(&self, filter: &TxnFilter) -> Result<Vec<Txn>> {
        let mut conn = self.conn()?;
        let mut query = txns::table.select(txns::body).order(txns::seq.asc()).into_boxed();
        if let Some(id) = &filter.contract_id {
            query = query.filter(txns::contract_id.eq(id.as_str()));
        }
        if let Some(id) = &filter.resolution_id {
            query = query.filter(txns::resolution_id.eq(id.as_str()));
        }
        let bodies: Vec<String> = query.load(&mut conn)?;

        let mut rows = Vec::with_capacity(bodies.len());
        for body in &bodies {
            let txn: Txn = decode(body)?;
            if filter.matches(&txn) {
                rows.push(txn);
            }
        }
        Ok(rows)
    }

    async fn balance(&self, account: &Account, token: Token) -> Result<Money> {
        let mut conn = self.conn()?;
        match account.user_id() {
            Some(id) => Ok(load_user(&mut conn, &id)?
                .map_or(Decimal::ZERO, |u| u.value.balance_of(token))),
            None => load_system_balance(&mut conn, account, token),
        }
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let mut conn = self.conn()?;
        conn.immediate_transaction(|conn| write_batch(conn, &batch))
    }
}
