//! Users and their cached balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::UserId;
use super::money::{Money, Token};

/// Privilege level of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    User,
    Mod,
    Admin,
}

impl Role {
    /// Moderators and admins may resolve any market and bypass safety valves.
    #[must_use]
    pub const fn is_elevated(self) -> bool {
        matches!(self, Self::Mod | Self::Admin)
    }
}

/// A trader. Balances are a cache of the ledger and only change in the same
/// commit as the transactions that explain them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub balance: Money,
    #[serde(default)]
    pub cash_balance: Money,
    #[serde(default)]
    pub points_balance: Money,
    #[serde(default)]
    pub total_deposits: Money,
    pub created_time: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(id: UserId, name: impl Into<String>, created_time: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            role: Role::User,
            balance: Money::ZERO,
            cash_balance: Money::ZERO,
            points_balance: Money::ZERO,
            total_deposits: Money::ZERO,
            created_time,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Cached balance in `token`.
    #[must_use]
    pub fn balance_of(&self, token: Token) -> Money {
        match token {
            Token::Mana => self.balance,
            Token::Cash => self.cash_balance,
            Token::Points => self.points_balance,
        }
    }

    pub fn balance_mut(&mut self, token: Token) -> &mut Money {
        match token {
            Token::Mana => &mut self.balance,
            Token::Cash => &mut self.cash_balance,
            Token::Points => &mut self.points_balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn balances_are_per_token() {
        let mut user = User::new(UserId::from("u1"), "Ada", Utc::now());
        *user.balance_mut(Token::Cash) += dec!(5);
        assert_eq!(user.balance_of(Token::Cash), dec!(5));
        assert_eq!(user.balance_of(Token::Mana), Money::ZERO);
    }

    #[test]
    fn only_mods_and_admins_are_elevated() {
        assert!(!Role::User.is_elevated());
        assert!(Role::Mod.is_elevated());
        assert!(Role::Admin.is_elevated());
    }
}
