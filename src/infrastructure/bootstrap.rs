//! Infrastructure bootstrap helpers for runtime wiring.

use tracing::info;

use crate::adapter::outbound::memory::MemoryLedgerStore;
#[cfg(feature = "sqlite")]
use crate::adapter::outbound::sqlite::store::SqliteLedgerStore;
use crate::application::exchange::service::Exchange;
use crate::domain::bet::Bet;
use crate::domain::contract::Contract;
use crate::domain::id::{BetId, ContractId, UserId};
use crate::domain::liquidity::LiquidityProvision;
use crate::domain::metric::ContractMetric;
use crate::domain::money::{Money, Token};
use crate::domain::txn::{Account, Txn};
use crate::domain::user::User;
use crate::error::Result;
use crate::infrastructure::config::settings::{Backend, Config, DatabaseConfig};
use crate::port::outbound::notifier::{LogNotifier, NotifierRegistry};
use crate::port::outbound::store::{CommitReceipt, LedgerStore, TxnFilter, Versioned, WriteBatch};

/// The store selected by `[database] backend`.
pub enum LedgerBackend {
    Memory(MemoryLedgerStore),
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteLedgerStore),
}

impl LedgerBackend {
    /// Open the configured store.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated, or when
    /// SQLite support was compiled out.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        match config.backend {
            Backend::Memory => Ok(Self::Memory(MemoryLedgerStore::new())),
            #[cfg(feature = "sqlite")]
            Backend::Sqlite => Ok(Self::Sqlite(SqliteLedgerStore::open(
                &config.url,
                config.pool_size,
            )?)),
            #[cfg(not(feature = "sqlite"))]
            Backend::Sqlite => Err(crate::error::ConfigError::InvalidValue {
                field: "database.backend",
                reason: "sqlite support requires the sqlite feature".to_string(),
            }
            .into()),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => "sqlite",
        }
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            LedgerBackend::Memory($store) => $call.await,
            #[cfg(feature = "sqlite")]
            LedgerBackend::Sqlite($store) => $call.await,
        }
    };
}

impl LedgerStore for LedgerBackend {
    async fn user(&self, id: &UserId) -> Result<Option<Versioned<User>>> {
        delegate!(self, store => store.user(id))
    }

    async fn contract(&self, id: &ContractId) -> Result<Option<Versioned<Contract>>> {
        delegate!(self, store => store.contract(id))
    }

    async fn bet(&self, id: &BetId) -> Result<Option<Versioned<Bet>>> {
        delegate!(self, store => store.bet(id))
    }

    async fn bets(&self, contract_id: &ContractId) -> Result<Vec<Versioned<Bet>>> {
        delegate!(self, store => store.bets(contract_id))
    }

    async fn liquidity(&self, contract_id: &ContractId) -> Result<Vec<LiquidityProvision>> {
        delegate!(self, store => store.liquidity(contract_id))
    }

    async fn metrics(&self, contract_id: &ContractId) -> Result<Vec<ContractMetric>> {
        delegate!(self, store => store.metrics(contract_id))
    }

    async fn txns(&self, filter: &TxnFilter) -> Result<Vec<Txn>> {
        delegate!(self, store => store.txns(filter))
    }

    async fn balance(&self, account: &Account, token: Token) -> Result<Money> {
        delegate!(self, store => store.balance(account, token))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        delegate!(self, store => store.commit(batch))
    }
}

/// Build notifier registry from configuration.
#[must_use]
pub fn build_notifier_registry() -> NotifierRegistry {
    let mut registry = NotifierRegistry::new();
    registry.register(Box::new(LogNotifier));
    registry
}

/// Wire the configured store, settings and notifiers into an exchange.
///
/// # Errors
/// Returns an error if the store cannot be opened.
pub fn build_exchange(config: &Config) -> Result<Exchange<LedgerBackend>> {
    let store = LedgerBackend::open(&config.database)?;
    info!(backend = store.name(), "ledger store opened");
    Ok(Exchange::new(store, config.exchange_settings()).with_notifiers(build_notifier_registry()))
}
