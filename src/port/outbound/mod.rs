//! Outbound ports (driven side): storage and notifications.

pub mod notifier;
pub mod store;
