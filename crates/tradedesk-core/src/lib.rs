//! Core types and traits for the tradedesk bot.
//!
//! This crate provides the foundational building blocks:
//! - Instrument, position, account, and order types normalized across brokers
//! - The `BrokerAdapter` capability contract and `Strategy` trait
//! - The error taxonomy shared by the session manager and bot controller

pub mod error;
pub mod traits;
pub mod types;

pub use error::{BrokerError, ControllerError, SessionError, StrategyError, VaultError};
pub use traits::*;
pub use types::*;
