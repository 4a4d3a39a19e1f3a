//! Database connection management using Diesel ORM.
//!
//! Provides connection pooling, migration support, and connection
//! configuration for SQLite databases.

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{Error, Result};

/// Embedded database migrations compiled from the migrations/ directory.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Type alias for a SQLite connection pool.
pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// A connection checked out of [`DbPool`].
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Create a connection pool for the given database URL.
///
/// # Errors
/// Returns an error if the pool cannot be created.
pub fn create_pool(database_url: &str, max_size: u32) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size.max(1))
        .build(manager)
        .map_err(|e| Error::Connection(e.to_string()))
}

/// Run all pending database migrations.
///
/// # Errors
/// Returns an error if migrations fail.
pub fn run_migrations(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get().map_err(|e| Error::Connection(e.to_string()))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::Connection(e.to_string()))?;
    Ok(())
}

/// Check out a connection with the pragmas every ledger access relies on.
///
/// # Errors
/// Returns an error if the pool is exhausted or a pragma fails.
pub fn checkout(pool: &DbPool) -> Result<DbConnection> {
    let mut conn = pool.get().map_err(|e| Error::Connection(e.to_string()))?;
    configure_sqlite_connection(&mut conn)?;
    Ok(conn)
}

/// Configure SQLite connection pragmas used for ledger writes.
///
/// # Errors
/// Returns an error if a pragma fails to apply.
pub fn configure_sqlite_connection(conn: &mut SqliteConnection) -> Result<()> {
    diesel::sql_query("PRAGMA busy_timeout=5000")
        .execute(conn)
        .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

/// Switch the database file to write-ahead logging.
///
/// # Errors
/// Returns an error if the pragma fails.
pub fn enable_wal(pool: &DbPool) -> Result<()> {
    let mut conn = checkout(pool)?;
    diesel::sql_query("PRAGMA journal_mode=WAL")
        .execute(&mut conn)
        .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(diesel::QueryableByName)]
    struct TableName {
        #[diesel(sql_type = diesel::sql_types::Text)]
        name: String,
    }

    fn temp_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let pool = create_pool(path.to_str().unwrap(), 4).unwrap();
        (dir, pool)
    }

    #[test]
    fn create_pool_with_memory_db() {
        assert!(create_pool(":memory:", 1).is_ok());
    }

    #[test]
    fn run_migrations_creates_ledger_tables() {
        let (_dir, pool) = temp_pool();
        run_migrations(&pool).unwrap();

        let mut conn = checkout(&pool).unwrap();
        let tables: Vec<String> = diesel::sql_query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '__diesel_schema_migrations' ORDER BY name",
        )
        .load::<TableName>(&mut conn)
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();

        assert_eq!(
            tables,
            vec![
                "bets",
                "contracts",
                "liquidity",
                "metrics",
                "system_balances",
                "txns",
                "users"
            ]
        );
    }

    #[test]
    fn run_migrations_is_idempotent() {
        let (_dir, pool) = temp_pool();
        run_migrations(&pool).unwrap();
        run_migrations(&pool).unwrap();
    }

    #[test]
    fn wal_can_be_enabled_on_file_databases() {
        let (_dir, pool) = temp_pool();
        assert!(enable_wal(&pool).is_ok());
    }

    #[test]
    fn zero_pool_size_is_raised_to_one() {
        let pool = create_pool(":memory:", 0).unwrap();
        assert_eq!(pool.max_size(), 1);
    }
}
