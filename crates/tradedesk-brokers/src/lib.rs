//! Broker adapter implementations.
//!
//! One module per broker plus the paper simulator; `build_adapter` maps a
//! [`BrokerId`] to a ready (not yet connected) adapter instance.

pub mod aliceblue;
pub mod angelone;
mod http;
pub mod kite;
pub mod paper;
pub mod upstox;

pub use aliceblue::AliceBlueBroker;
pub use angelone::AngelOneBroker;
pub use kite::KiteBroker;
pub use paper::PaperBroker;
pub use upstox::UpstoxBroker;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use tradedesk_core::traits::BrokerAdapter;
use tradedesk_core::types::BrokerId;

/// Construction-time knobs for adapters; everything else arrives via
/// `connect` credentials.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Paper ledger seed balance.
    pub paper_starting_balance: Decimal,
    /// Redirect URI registered with the Upstox app, required for its
    /// OAuth dialog.
    pub upstox_redirect_uri: Option<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            paper_starting_balance: dec!(1000000),
            upstox_redirect_uri: None,
        }
    }
}

/// Build a fresh, disconnected adapter for the given broker.
pub fn build_adapter(broker: BrokerId, config: &AdapterConfig) -> Arc<dyn BrokerAdapter> {
    match broker {
        BrokerId::Paper => Arc::new(PaperBroker::new(config.paper_starting_balance)),
        BrokerId::Kite => Arc::new(KiteBroker::new()),
        BrokerId::AliceBlue => Arc::new(AliceBlueBroker::new()),
        BrokerId::AngelOne => Arc::new(AngelOneBroker::new()),
        BrokerId::Upstox => Arc::new(UpstoxBroker::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_covers_every_broker() {
        let config = AdapterConfig::default();
        for &broker in BrokerId::all() {
            let adapter = build_adapter(broker, &config);
            assert_eq!(adapter.id(), broker);
            assert!(!adapter.is_connected());
        }
    }

    #[test]
    fn test_factory_names_are_distinct() {
        let config = AdapterConfig::default();
        let names: std::collections::HashSet<String> = BrokerId::all()
            .iter()
            .map(|&b| build_adapter(b, &config).name().to_string())
            .collect();
        assert_eq!(names.len(), BrokerId::all().len());
    }
}
