//! Core traits.

mod broker;
mod strategy;

pub use broker::{BrokerAdapter, Credentials, OAuthToken, UserProfile};
pub use strategy::Strategy;
