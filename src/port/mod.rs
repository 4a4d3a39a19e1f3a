//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! The application layer drives storage and notification through these
//! traits; adapters implement them.

pub mod outbound;
