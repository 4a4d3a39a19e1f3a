//! Domain identifier types with proper encapsulation.
//!
//! Every identifier is a newtype over `String` so that a contract id can never
//! be passed where a user id is expected. Identifiers created by the engine are
//! UUID v4; identifiers supplied by collaborators (user ids from the identity
//! provider, ids read back from storage) go through `From<String>`.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from an existing string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Create a fresh identifier backed by a UUID v4.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a market (binary or multi-answer).
    ContractId
);

string_id!(
    /// Identifier of one answer inside a multi-answer market.
    AnswerId
);

string_id!(
    /// Verified user identifier supplied by the identity provider.
    UserId
);

string_id!(
    /// Identifier of a bet or limit order.
    BetId
);

string_id!(
    /// Identifier of a ledger transaction.
    TxnId
);

string_id!(
    /// Identifier of a liquidity provision.
    LiquidityId
);
