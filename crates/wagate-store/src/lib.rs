//! # wagate-store
//!
//! SQLite-backed persistence for the gateway.

pub mod store;

pub use store::{ChatFlag, MessageQuery, Store, WebhookUpdate};
