//! Trading signals emitted by strategies.

use serde::{Deserialize, Serialize};

/// What the strategy wants done. Strategies return `None` from `on_bar`
/// when there is nothing to do, so there is no explicit Hold variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    EnterLong,
    ExitLong,
    EnterShort,
    ExitShort,
}

impl SignalKind {
    /// Whether this signal opens new exposure.
    pub fn is_entry(&self) -> bool {
        matches!(self, SignalKind::EnterLong | SignalKind::EnterShort)
    }
}

/// A signal fired by a strategy for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub kind: SignalKind,
    /// Close price of the bar that triggered the signal
    pub price: f64,
    /// Bar timestamp in milliseconds
    pub timestamp: i64,
    /// Short reason string for the order log
    pub reason: String,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        kind: SignalKind,
        price: f64,
        timestamp: i64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            price,
            timestamp,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_classification() {
        assert!(SignalKind::EnterLong.is_entry());
        assert!(SignalKind::EnterShort.is_entry());
        assert!(!SignalKind::ExitLong.is_entry());
        assert!(!SignalKind::ExitShort.is_entry());
    }
}
