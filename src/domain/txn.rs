//! Ledger transactions.
//!
//! A [`Txn`] moves an exact amount of one token between two accounts. Rows are
//! append-only; corrections are new rows that point at what they revert.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{AnswerId, BetId, ContractId, TxnId, UserId};
use super::money::{Money, Token};

/// Kind of ledger account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountKind {
    User,
    Contract,
    Bank,
    Charity,
    Ad,
}

impl AccountKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Contract => "CONTRACT",
            Self::Bank => "BANK",
            Self::Charity => "CHARITY",
            Self::Ad => "AD",
        }
    }
}

/// One side of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Account {
    pub kind: AccountKind,
    pub id: String,
}

impl Account {
    #[must_use]
    pub fn user(id: &UserId) -> Self {
        Self {
            kind: AccountKind::User,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn contract(id: &ContractId) -> Self {
        Self {
            kind: AccountKind::Contract,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn bank(id: impl Into<String>) -> Self {
        Self {
            kind: AccountKind::Bank,
            id: id.into(),
        }
    }

    /// The user id, for user accounts.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        (self.kind == AccountKind::User).then(|| UserId::from(self.id.as_str()))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Why money moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxnCategory {
    ManaGrant,
    Bet,
    LimitOrderFill,
    BetSale,
    AddLiquidity,
    RemoveLiquidity,
    AddAnswer,
    CreatorFee,
    PlatformFee,
    ResolutionPayout,
    ResolutionFee,
    SubsidyReturn,
    UndoResolutionPayout,
    UndoResolutionFee,
}

impl TxnCategory {
    /// Categories written by resolution, which unresolve reverts.
    #[must_use]
    pub const fn is_resolution(self) -> bool {
        matches!(
            self,
            Self::ResolutionPayout | Self::ResolutionFee | Self::SubsidyReturn
        )
    }

    /// Category of the row reverting this one.
    #[must_use]
    pub const fn undo(self) -> Option<Self> {
        match self {
            Self::ResolutionPayout | Self::SubsidyReturn => Some(Self::UndoResolutionPayout),
            Self::ResolutionFee => Some(Self::UndoResolutionFee),
            _ => None,
        }
    }

    /// Administrative categories may debit a user below zero.
    #[must_use]
    pub const fn is_administrative(self) -> bool {
        matches!(
            self,
            Self::ResolutionPayout
                | Self::ResolutionFee
                | Self::UndoResolutionPayout
                | Self::UndoResolutionFee
        )
    }
}

/// Structured references carried by a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<ContractId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_id: Option<AnswerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bet_id: Option<BetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverts_txn_id: Option<TxnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_id: Option<String>,
}

impl TxnData {
    #[must_use]
    pub fn for_contract(contract_id: &ContractId) -> Self {
        Self {
            contract_id: Some(contract_id.clone()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn answer(mut self, answer_id: Option<&AnswerId>) -> Self {
        self.answer_id = answer_id.cloned();
        self
    }

    #[must_use]
    pub fn bet(mut self, bet_id: &BetId) -> Self {
        self.bet_id = Some(bet_id.clone());
        self
    }

    #[must_use]
    pub fn resolution(mut self, resolution_id: &str) -> Self {
        self.resolution_id = Some(resolution_id.to_string());
        self
    }
}

/// An append-only ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Txn {
    pub id: TxnId,
    pub from: Account,
    pub to: Account,
    pub amount: Money,
    pub token: Token,
    pub category: TxnCategory,
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub data: TxnData,
}

impl Txn {
    /// The inverse row for an administrative revert.
    #[must_use]
    pub fn reversal(&self, category: TxnCategory, now: DateTime<Utc>) -> Self {
        Self {
            id: TxnId::generate(),
            from: self.to.clone(),
            to: self.from.clone(),
            amount: self.amount,
            token: self.token,
            category,
            created_time: now,
            data: TxnData {
                reverts_txn_id: Some(self.id.clone()),
                ..self.data.clone()
            },
        }
    }
}
