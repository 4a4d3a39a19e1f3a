//! Domain validation errors for core domain types.
//!
//! These errors are returned by the pure pricing, matching and payout
//! functions when an input is malformed or a numeric invariant would break.
//!
//! # Examples
//!
//! ```
//! use oddsmith::domain::cpmm::{self, Pool};
//! use oddsmith::domain::error::DomainError;
//! use oddsmith::domain::outcome::Outcome;
//!
//! let pool = Pool::new(100.0, 100.0);
//! let result = cpmm::shares_for_amount(pool, 0.5, f64::NAN, Outcome::Yes);
//!
//! assert!(matches!(result, Err(DomainError::NonFiniteAmount { .. })));
//! ```

use thiserror::Error;

/// Errors that occur when domain invariants are violated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Amounts must be finite numbers.
    #[error("amount must be finite, got {amount}")]
    NonFiniteAmount {
        /// The invalid amount that was provided.
        amount: f64,
    },

    /// Amounts must be strictly positive outside administrative flows.
    #[error("amount must be positive, got {amount}")]
    NonPositiveAmount {
        /// The invalid amount that was provided.
        amount: f64,
    },

    /// A caller supplied probability (limit price, MKT resolution) is unusable.
    #[error("probability must be inside (0, 1), got {prob}")]
    InvalidProbability {
        /// The rejected probability.
        prob: f64,
    },

    /// A pool left the open interval (0, 1). This is a fatal breach.
    #[error("pool probability left (0, 1): {prob}")]
    ProbabilityOutOfRange {
        /// The probability computed from the pool.
        prob: f64,
    },

    /// A withdrawal would empty or nearly empty a reserve.
    #[error("insufficient liquidity: reserves would become YES={yes}, NO={no}")]
    InsufficientLiquidity {
        /// Resulting YES reserve.
        yes: f64,
        /// Resulting NO reserve.
        no: f64,
    },

    /// Answer probabilities of a sum-to-one market drifted away from 1.
    #[error("answer probabilities sum to {sum}, expected 1")]
    SumToOneViolated {
        /// The observed sum.
        sum: f64,
    },

    /// A tagged field update does not fit the field it targets.
    #[error("cannot apply {operation} to field {field}")]
    InvalidUpdate {
        /// The update operation name.
        operation: &'static str,
        /// The target field name.
        field: &'static str,
    },

    /// An answer id does not belong to the market.
    #[error("unknown answer {0}")]
    UnknownAnswer(String),

    /// The operation does not apply to this kind of market.
    #[error("{operation} is not supported for {mechanism} markets")]
    UnsupportedMechanism {
        /// The rejected operation.
        operation: &'static str,
        /// The market mechanism.
        mechanism: &'static str,
    },
    /// A resolution request does not fit the market.
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),
}

impl DomainError {
    /// True for errors that indicate corrupted state rather than bad input.
    #[must_use]
    pub fn is_invariant_breach(&self) -> bool {
        matches!(
            self,
            Self::ProbabilityOutOfRange { .. } | Self::SumToOneViolated { .. }
        )
    }
}

/// Reject NaN and infinities.
pub fn ensure_finite(amount: f64) -> Result<f64, DomainError> {
    if amount.is_finite() {
        Ok(amount)
    } else {
        Err(DomainError::NonFiniteAmount { amount })
    }
}

/// Reject non-finite and non-positive amounts.
pub fn ensure_positive(amount: f64) -> Result<f64, DomainError> {
    let amount = ensure_finite(amount)?;
    if amount > 0.0 {
        Ok(amount)
    } else {
        Err(DomainError::NonPositiveAmount { amount })
    }
}
