//! Binary outcome of a pool.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The side of a binary pool a bet is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// The other side of the pool.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }

    /// Probability of this outcome given the YES probability.
    #[must_use]
    pub fn prob_of(self, yes_prob: f64) -> f64 {
        match self {
            Self::Yes => yes_prob,
            Self::No => 1.0 - yes_prob,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_round_trips() {
        assert_eq!(Outcome::Yes.opposite(), Outcome::No);
        assert_eq!(Outcome::No.opposite().opposite(), Outcome::No);
    }

    #[test]
    fn prob_of_complements_for_no() {
        assert!((Outcome::No.prob_of(0.3) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Outcome::Yes).unwrap(), "\"YES\"");
    }
}
