//! Resolution requests and the record left on a resolved pool.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::id::{AnswerId, UserId};

/// Tolerance on percentage resolutions summing to 100.
const PERCENT_TOLERANCE: f64 = 1e-6;

/// Outcome requested by a resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionOutcome {
    Yes,
    No,
    /// Resolve to a probability given in percent, `[0, 100]`.
    Mkt { probability: f64 },
    /// Winner of a sum-to-one market; every other answer resolves NO.
    Choice { answer_id: AnswerId },
    /// Per-answer percentages of a sum-to-one market summing to 100.
    Percentages { resolutions: Vec<AnswerPercent> },
    Cancel,
}

/// One entry of a percentage resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPercent {
    pub answer_id: AnswerId,
    pub percent: f64,
}

impl ResolutionOutcome {
    /// Check the shape of the request independent of the market.
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Self::Mkt { probability } => {
                if probability.is_finite() && (0.0..=100.0).contains(probability) {
                    Ok(())
                } else {
                    Err(DomainError::InvalidResolution(format!(
                        "MKT probability must be within [0, 100], got {probability}"
                    )))
                }
            }
            Self::Percentages { resolutions } => {
                if resolutions.is_empty() {
                    return Err(DomainError::InvalidResolution(
                        "percentage resolution needs at least one answer".into(),
                    ));
                }
                if let Some(bad) = resolutions
                    .iter()
                    .find(|r| !r.percent.is_finite() || r.percent < 0.0)
                {
                    return Err(DomainError::InvalidResolution(format!(
                        "invalid percentage {} for answer {}",
                        bad.percent, bad.answer_id
                    )));
                }
                let total: f64 = resolutions.iter().map(|r| r.percent).sum();
                if (total - 100.0).abs() > PERCENT_TOLERANCE {
                    return Err(DomainError::InvalidResolution(format!(
                        "percentages sum to {total}, expected 100"
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Resolution probability of a single pool. `prior` is used by CANCEL.
    #[must_use]
    pub fn probability(&self, prior: f64) -> f64 {
        match self {
            Self::Yes => 1.0,
            Self::No => 0.0,
            Self::Mkt { probability } => probability / 100.0,
            Self::Cancel | Self::Choice { .. } | Self::Percentages { .. } => prior,
        }
    }

    #[must_use]
    pub const fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel)
    }

    /// Shapes that only make sense for a whole sum-to-one market.
    #[must_use]
    pub const fn is_multi_answer(&self) -> bool {
        matches!(self, Self::Choice { .. } | Self::Percentages { .. })
    }
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => f.write_str("YES"),
            Self::No => f.write_str("NO"),
            Self::Mkt { probability } => write!(f, "MKT({probability}%)"),
            Self::Choice { answer_id } => write!(f, "CHOICE({answer_id})"),
            Self::Percentages { resolutions } => write!(f, "PERCENTAGES({})", resolutions.len()),
            Self::Cancel => f.write_str("CANCEL"),
        }
    }
}

/// How a single pool ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Resolved {
    Yes,
    No,
    Mkt,
    Cancel,
}

impl Resolved {
    /// Label for a pool resolving to `probability`.
    #[must_use]
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 1.0 {
            Self::Yes
        } else if probability <= 0.0 {
            Self::No
        } else {
            Self::Mkt
        }
    }
}

/// Record written on a contract or answer when it resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Shared by every transaction of the same settlement.
    pub id: String,
    pub outcome: Resolved,
    pub probability: f64,
    pub resolver_id: UserId,
    pub resolved_time: DateTime<Utc>,
}
