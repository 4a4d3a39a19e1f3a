//! `oddsmith check`: validate configuration and open the store.

use std::path::Path;

use crate::error::Result;
use crate::infrastructure::bootstrap::LedgerBackend;
use crate::infrastructure::config::settings::Config;

/// Load `path`, open its store and describe the result.
///
/// # Errors
/// Returns an error if the configuration is invalid or the store cannot be
/// opened.
pub fn execute(path: &Path) -> Result<String> {
    let config = Config::load(path)?;
    let backend = LedgerBackend::open(&config.database)?;
    let settings = config.exchange_settings();
    Ok(format!(
        "config ok: backend={} taker_fee={} answer_cost={} retry_attempts={}",
        backend.name(),
        settings.fees.taker_fee,
        settings.markets.answer_cost,
        settings.retry.attempts
    ))
}
