//! Error types surfaced by the engine.

use thiserror::Error;

use crate::domain::error::DomainError;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed request or an input the market does not accept.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("insufficient {token} balance for {user_id}: need {needed}, have {available}")]
    InsufficientBalance {
        user_id: String,
        token: String,
        needed: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    /// The request conflicts with current state and will not succeed on retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A row changed between read and commit. Retried internally.
    #[error("transient conflict on {0}")]
    TransientConflict(String),

    #[error("server busy after {attempts} attempts")]
    ServerBusy { attempts: u32 },

    /// A numeric invariant broke. Never retried.
    #[error("invariant breach: {0}")]
    Invariant(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<DomainError> for Error {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::ProbabilityOutOfRange { .. } | DomainError::SumToOneViolated { .. } => {
                Error::Invariant(err.to_string())
            }
            DomainError::InsufficientLiquidity { .. } => {
                Error::InsufficientLiquidity(err.to_string())
            }
            DomainError::UnknownAnswer(id) => Error::NotFound { kind: "answer", id },
            _ => Error::Validation(err.to_string()),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<diesel::result::Error> for Error {
    fn from(err: diesel::result::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl Error {
    /// Whether the retry loop should try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientConflict(_))
    }

    pub(crate) fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_breaches_become_invariant_errors() {
        let err: Error = DomainError::ProbabilityOutOfRange { prob: 1.0 }.into();
        assert!(matches!(err, Error::Invariant(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn bad_amounts_become_validation_errors() {
        let err: Error = DomainError::NonPositiveAmount { amount: 0.0 }.into();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn unknown_answers_become_not_found() {
        let err: Error = DomainError::UnknownAnswer("a1".into()).into();
        assert!(matches!(err, Error::NotFound { kind: "answer", .. }));
    }

    #[test]
    fn only_transient_conflicts_are_retryable() {
        assert!(Error::TransientConflict("contract c1".into()).is_retryable());
        assert!(!Error::Conflict("already resolved".into()).is_retryable());
        assert!(!Error::ServerBusy { attempts: 5 }.is_retryable());
    }
}
