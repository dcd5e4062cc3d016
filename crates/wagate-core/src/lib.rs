//! # wagate-core
//!
//! Core types, traits, configuration, and error handling for the wagate gateway.

pub mod config;
pub mod error;
pub mod event;
pub mod jid;
pub mod protocol;
pub mod records;
pub mod traits;

pub use config::shellexpand;
