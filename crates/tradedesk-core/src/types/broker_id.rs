//! Broker identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The set of supported brokers.
///
/// Adapters are constructed through a factory keyed by this enum; nothing
/// outside the adapter crate branches on broker identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerId {
    /// Zerodha Kite Connect
    Kite,
    /// Alice Blue ANT
    AliceBlue,
    /// Angel One SmartAPI
    AngelOne,
    /// Upstox
    Upstox,
    /// In-memory paper-trading simulator
    Paper,
}

impl BrokerId {
    /// Whether this broker authenticates through an OAuth-style
    /// request-token exchange.
    pub fn supports_oauth(&self) -> bool {
        matches!(self, BrokerId::Kite | BrokerId::Upstox)
    }

    /// All supported brokers.
    pub fn all() -> &'static [BrokerId] {
        &[
            BrokerId::Kite,
            BrokerId::AliceBlue,
            BrokerId::AngelOne,
            BrokerId::Upstox,
            BrokerId::Paper,
        ]
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BrokerId::Kite => "kite",
            BrokerId::AliceBlue => "alice_blue",
            BrokerId::AngelOne => "angel_one",
            BrokerId::Upstox => "upstox",
            BrokerId::Paper => "paper",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for BrokerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kite" | "zerodha" => Ok(BrokerId::Kite),
            "alice_blue" | "aliceblue" => Ok(BrokerId::AliceBlue),
            "angel_one" | "angelone" | "angel" => Ok(BrokerId::AngelOne),
            "upstox" => Ok(BrokerId::Upstox),
            "paper" => Ok(BrokerId::Paper),
            _ => Err(format!("Unknown broker: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_id_parse() {
        assert_eq!(BrokerId::from_str("kite").unwrap(), BrokerId::Kite);
        assert_eq!(BrokerId::from_str("zerodha").unwrap(), BrokerId::Kite);
        assert_eq!(BrokerId::from_str("paper").unwrap(), BrokerId::Paper);
        assert!(BrokerId::from_str("etrade").is_err());
    }

    #[test]
    fn test_oauth_capability() {
        assert!(BrokerId::Kite.supports_oauth());
        assert!(BrokerId::Upstox.supports_oauth());
        assert!(!BrokerId::AngelOne.supports_oauth());
        assert!(!BrokerId::Paper.supports_oauth());
    }

    #[test]
    fn test_display_roundtrip() {
        for id in BrokerId::all() {
            assert_eq!(BrokerId::from_str(&id.to_string()).unwrap(), *id);
        }
    }
}
