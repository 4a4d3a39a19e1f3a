//! Database model types for Diesel ORM.
//!
//! Rows keep the serialized aggregate in `body`; the other columns exist for
//! lookups and ordering.

use diesel::prelude::*;

use super::schema::{bets, contracts, liquidity, metrics, system_balances, txns, users};

/// Database row for a user.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserRow {
    pub id: String,
    pub version: i64,
    pub name: String,
    pub body: String,
}

/// Database row for a contract.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = contracts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ContractRow {
    pub id: String,
    pub version: i64,
    pub creator_id: String,
    pub body: String,
}

/// Database row for a bet. `seq` is assigned on insert and orders bets.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = bets)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BetRow {
    pub id: String,
    pub contract_id: String,
    pub user_id: String,
    pub version: i64,
    pub body: String,
}

/// Database row for a liquidity provision.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = liquidity)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LiquidityRow {
    pub id: String,
    pub contract_id: String,
    pub user_id: String,
    pub body: String,
}

/// Database row for a ledger transaction.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = txns)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TxnRow {
    pub id: String,
    pub contract_id: Option<String>,
    pub resolution_id: Option<String>,
    pub category: String,
    pub from_account: String,
    pub to_account: String,
    pub token: String,
    pub amount: String,
    pub created_time: String,
    pub body: String,
}

/// Database row for a user's metric in one pool. Contract-level metrics use
/// an empty `answer_id`.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = metrics)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MetricRow {
    pub user_id: String,
    pub contract_id: String,
    pub answer_id: String,
    pub body: String,
}

/// Database row for a non-user account balance.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = system_balances)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SystemBalanceRow {
    pub account: String,
    pub token: String,
    pub amount: String,
}
