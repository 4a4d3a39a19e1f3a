//! Tagged field updates applied to stored rows inside a commit.
//!
//! Whole-row writes carry pool state; counters and sets that many operations
//! touch are written as updates so they compose within one commit.

use serde::{Deserialize, Serialize};

use super::contract::Contract;
use super::error::DomainError;
use super::id::{AnswerId, UserId};
use super::money::to_money;
use super::user::User;

/// A single field update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Update<F> {
    Increment { field: F, by: f64 },
    Delete { field: F },
    ArrayAdd { field: F, value: String },
    ArrayRemove { field: F, value: String },
}

impl<F> Update<F> {
    #[must_use]
    pub const fn op_name(&self) -> &'static str {
        match self {
            Self::Increment { .. } => "increment",
            Self::Delete { .. } => "delete",
            Self::ArrayAdd { .. } => "array_add",
            Self::ArrayRemove { .. } => "array_remove",
        }
    }

    #[must_use]
    pub const fn field(&self) -> &F {
        match self {
            Self::Increment { field, .. }
            | Self::Delete { field }
            | Self::ArrayAdd { field, .. }
            | Self::ArrayRemove { field, .. } => field,
        }
    }
}

/// Contract fields addressable by updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "answer_id", rename_all = "snake_case")]
pub enum ContractField {
    Volume,
    TotalLiquidity,
    SubsidyPool,
    UniqueBettorIds,
    Resolution,
    AnswerVolume(AnswerId),
    AnswerResolution(AnswerId),
}

impl ContractField {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::TotalLiquidity => "total_liquidity",
            Self::SubsidyPool => "subsidy_pool",
            Self::UniqueBettorIds => "unique_bettor_ids",
            Self::Resolution => "resolution",
            Self::AnswerVolume(_) => "answer.volume",
            Self::AnswerResolution(_) => "answer.resolution",
        }
    }
}

/// User fields addressable by updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserField {
    TotalDeposits,
}

impl UserField {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TotalDeposits => "total_deposits",
        }
    }
}

/// A row type that accepts tagged updates.
pub trait Patchable {
    type Field;

    /// Apply one update in place.
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidUpdate`] when the operation does not fit
    /// the field.
    fn apply(&mut self, update: &Update<Self::Field>) -> Result<(), DomainError>;
}

fn invalid<F>(update: &Update<F>, field: &'static str) -> DomainError {
    DomainError::InvalidUpdate {
        operation: update.op_name(),
        field,
    }
}

impl Patchable for Contract {
    type Field = ContractField;

    fn apply(&mut self, update: &Update<ContractField>) -> Result<(), DomainError> {
        let name = update.field().name();
        match update {
            Update::Increment { field, by } => {
                let slot = match field {
                    ContractField::Volume => &mut self.volume,
                    ContractField::TotalLiquidity => &mut self.total_liquidity,
                    ContractField::SubsidyPool => &mut self.subsidy_pool,
                    ContractField::AnswerVolume(id) => {
                        &mut self
                            .answer_mut(id)
                            .ok_or_else(|| DomainError::UnknownAnswer(id.to_string()))?
                            .volume
                    }
                    _ => return Err(invalid(update, name)),
                };
                *slot += *by;
                Ok(())
            }
            Update::Delete { field } => match field {
                ContractField::Resolution => {
                    self.resolution = None;
                    Ok(())
                }
                ContractField::AnswerResolution(id) => {
                    self.answer_mut(id)
                        .ok_or_else(|| DomainError::UnknownAnswer(id.to_string()))?
                        .resolution = None;
                    Ok(())
                }
                _ => Err(invalid(update, name)),
            },
            Update::ArrayAdd { field, value } => match field {
                ContractField::UniqueBettorIds => {
                    self.add_bettor(&UserId::from(value.as_str()));
                    Ok(())
                }
                _ => Err(invalid(update, name)),
            },
            Update::ArrayRemove { field, value } => match field {
                ContractField::UniqueBettorIds => {
                    self.unique_bettor_ids.retain(|id| id.as_str() != value);
                    Ok(())
                }
                _ => Err(invalid(update, name)),
            },
        }
    }
}

impl Patchable for User {
    type Field = UserField;

    fn apply(&mut self, update: &Update<UserField>) -> Result<(), DomainError> {
        match update {
            Update::Increment {
                field: UserField::TotalDeposits,
                by,
            } => {
                self.total_deposits += to_money(*by)?;
                Ok(())
            }
            other => Err(invalid(other, other.field().name())),
        }
    }
}
