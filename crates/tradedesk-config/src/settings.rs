//! Configuration structures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradedesk_core::types::{BrokerId, RiskParams};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub vault: VaultSettings,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub risk: RiskParams,
}

/// General app settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub name: String,
    pub environment: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "tradedesk".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Where credentials and tokens live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    pub dir: String,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            dir: "~/.tradedesk/vault".to_string(),
        }
    }
}

/// Broker selection and adapter knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Default broker for `run` and `login`
    pub default: BrokerId,
    pub paper_starting_balance: Decimal,
    /// Redirect URI registered with the Upstox app
    pub upstox_redirect_uri: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            default: BrokerId::Paper,
            paper_starting_balance: dec!(1000000),
            upstox_redirect_uri: None,
        }
    }
}

/// Trading-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub poll_interval_ms: u64,
    pub stop_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            stop_timeout_secs: 15,
        }
    }
}
