//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all settings. Every
//! section is optional; missing values fall back to the engine defaults.
//! `ODDSMITH_DATABASE_URL` overrides `[database] url`.
//!
//! # Example
//!
//! ```no_run
//! use oddsmith::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use super::logging::LoggingConfig;
use crate::application::exchange::settings::{ExchangeSettings, MarketRules, ResolutionRules};
use crate::application::retry::RetryPolicy;
use crate::domain::fees::FeeSchedule;
use crate::domain::payout::NegativePayoutPolicy;
use crate::error::{ConfigError, Result};

/// Environment variable overriding the database URL.
pub const DATABASE_URL_ENV: &str = "ODDSMITH_DATABASE_URL";

/// Storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process memory; state is lost on exit.
    #[default]
    Memory,
    /// SQLite file at `url`.
    Sqlite,
}

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: Backend,
    pub url: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            url: "oddsmith.db".into(),
            pool_size: 5,
        }
    }
}

/// `[fees]` section. Shares are relative weights of the collected fee.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeesConfig {
    pub taker_fee: f64,
    pub creator_share: f64,
    pub platform_share: f64,
    pub liquidity_share: f64,
}

impl Default for FeesConfig {
    fn default() -> Self {
        let schedule = FeeSchedule::default();
        Self {
            taker_fee: schedule.taker_fee,
            creator_share: schedule.creator_share,
            platform_share: schedule.platform_share,
            liquidity_share: schedule.liquidity_share,
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

/// `[markets]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MarketsConfig {
    pub answer_cost: f64,
    pub max_answers: usize,
    pub min_pool_reserve: f64,
    pub bank_id: String,
}

impl Default for MarketsConfig {
    fn default() -> Self {
        let rules = MarketRules::default();
        Self {
            answer_cost: rules.answer_cost,
            max_answers: rules.max_answers,
            min_pool_reserve: rules.min_pool_reserve,
            bank_id: rules.bank_id,
        }
    }
}

/// `[resolution]` section.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Most negative payout a non-moderator cancel may cause.
    pub negative_payout_threshold: f64,
    /// Threshold used once a market has `loosen_at_traders` unique traders.
    pub loosened_negative_payout_threshold: f64,
    pub loosen_at_traders: usize,
    pub unresolve_window_minutes: i64,
    /// Fraction of positive trading profit charged on fee-bearing tokens.
    pub profit_fee: f64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        let rules = ResolutionRules::default();
        Self {
            negative_payout_threshold: rules.negative_payouts.threshold,
            loosened_negative_payout_threshold: rules.negative_payouts.loosened_threshold,
            loosen_at_traders: rules.negative_payouts.loosen_at_traders,
            unresolve_window_minutes: rules.unresolve_window.num_minutes(),
            profit_fee: rules.profit_fee,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    /// Logging and tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub fees: FeesConfig,

    /// Conflict retry limits.
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub markets: MarketsConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn ensure(condition: bool, field: &'static str, reason: &str) -> std::result::Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(invalid(field, reason))
    }
}

impl Config {
    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is malformed or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn parse_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.override_database_url(std::env::var(DATABASE_URL_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML content is
    /// malformed or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    fn override_database_url(&mut self, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.database.url = url;
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad field.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        ensure(
            matches!(self.logging.format.as_str(), "pretty" | "json"),
            "logging.format",
            "must be \"pretty\" or \"json\"",
        )?;

        ensure(self.database.pool_size > 0, "database.pool_size", "must be greater than 0")?;
        ensure(
            self.database.backend == Backend::Memory || !self.database.url.trim().is_empty(),
            "database.url",
            "must be set for the sqlite backend",
        )?;

        let fees = &self.fees;
        ensure(
            fees.taker_fee.is_finite() && (0.0..=1.0).contains(&fees.taker_fee),
            "fees.taker_fee",
            "must be between 0 and 1",
        )?;
        for (field, share) in [
            ("fees.creator_share", fees.creator_share),
            ("fees.platform_share", fees.platform_share),
            ("fees.liquidity_share", fees.liquidity_share),
        ] {
            ensure(share.is_finite() && share >= 0.0, field, "must be 0 or greater")?;
        }
        ensure(
            fees.taker_fee == 0.0
                || fees.creator_share + fees.platform_share + fees.liquidity_share > 0.0,
            "fees",
            "a non-zero taker fee needs at least one positive share",
        )?;

        ensure(self.retry.attempts > 0, "retry.attempts", "must be greater than 0")?;
        ensure(
            self.retry.max_delay_ms >= self.retry.base_delay_ms,
            "retry.max_delay_ms",
            "must be >= base_delay_ms",
        )?;

        let markets = &self.markets;
        ensure(
            markets.answer_cost.is_finite() && markets.answer_cost >= 0.0,
            "markets.answer_cost",
            "must be 0 or greater",
        )?;
        ensure(markets.max_answers >= 2, "markets.max_answers", "must be at least 2")?;
        ensure(
            markets.min_pool_reserve.is_finite() && markets.min_pool_reserve > 0.0,
            "markets.min_pool_reserve",
            "must be greater than 0",
        )?;
        ensure(!markets.bank_id.trim().is_empty(), "markets.bank_id", "must not be empty")?;

        let resolution = &self.resolution;
        ensure(
            resolution.negative_payout_threshold <= 0.0,
            "resolution.negative_payout_threshold",
            "must be 0 or less",
        )?;
        ensure(
            resolution.loosened_negative_payout_threshold <= resolution.negative_payout_threshold,
            "resolution.loosened_negative_payout_threshold",
            "must not be above negative_payout_threshold",
        )?;
        ensure(
            resolution.unresolve_window_minutes >= 0,
            "resolution.unresolve_window_minutes",
            "must be 0 or greater",
        )?;
        ensure(
            resolution.profit_fee.is_finite() && (0.0..1.0).contains(&resolution.profit_fee),
            "resolution.profit_fee",
            "must be in [0, 1)",
        )?;
        Ok(())
    }

    /// Engine settings described by this configuration.
    #[must_use]
    pub fn exchange_settings(&self) -> ExchangeSettings {
        ExchangeSettings {
            fees: FeeSchedule {
                taker_fee: self.fees.taker_fee,
                creator_share: self.fees.creator_share,
                platform_share: self.fees.platform_share,
                liquidity_share: self.fees.liquidity_share,
            },
            retry: RetryPolicy {
                attempts: self.retry.attempts,
                base_delay: std::time::Duration::from_millis(self.retry.base_delay_ms),
                max_delay: std::time::Duration::from_millis(self.retry.max_delay_ms),
            },
            markets: MarketRules {
                answer_cost: self.markets.answer_cost,
                max_answers: self.markets.max_answers,
                min_pool_reserve: self.markets.min_pool_reserve,
                bank_id: self.markets.bank_id.clone(),
            },
            resolution: ResolutionRules {
                negative_payouts: NegativePayoutPolicy {
                    threshold: self.resolution.negative_payout_threshold,
                    loosened_threshold: self.resolution.loosened_negative_payout_threshold,
                    loosen_at_traders: self.resolution.loosen_at_traders,
                },
                unresolve_window: chrono::Duration::minutes(
                    self.resolution.unresolve_window_minutes,
                ),
                profit_fee: self.resolution.profit_fee,
            },
        }
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) -> bool {
        self.logging.init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> std::result::Result<Config, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn empty_config_uses_engine_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.exchange_settings(), ExchangeSettings::default());
        assert_eq!(config.database.backend, Backend::Memory);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
            [fees]
            taker_fee = 0.1

            [markets]
            answer_cost = 50.0
            "#,
        )
        .unwrap();
        let settings = config.exchange_settings();
        assert_eq!(settings.fees.taker_fee, 0.1);
        assert_eq!(settings.fees.creator_share, 0.5);
        assert_eq!(settings.markets.answer_cost, 50.0);
        assert_eq!(settings.markets.max_answers, 100);
    }

    #[test]
    fn invalid_values_name_the_field() {
        let err = parse("[resolution]\nprofit_fee = 1.5").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "resolution.profit_fee",
                ..
            }
        ));

        let err = parse("[retry]\nattempts = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "retry.attempts",
                ..
            }
        ));
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        assert!(matches!(
            parse("[database]\nbackend = \"postgres\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn database_url_override_ignores_blank_values() {
        let mut config = Config::default();
        config.override_database_url(Some("  ".into()));
        assert_eq!(config.database.url, "oddsmith.db");
        config.override_database_url(Some("/tmp/ledger.db".into()));
        assert_eq!(config.database.url, "/tmp/ledger.db");
    }

    #[test]
    fn unresolve_window_maps_to_minutes() {
        let config = parse("[resolution]\nunresolve_window_minutes = 30").unwrap();
        assert_eq!(
            config.exchange_settings().resolution.unresolve_window,
            chrono::Duration::minutes(30)
        );
    }
}
