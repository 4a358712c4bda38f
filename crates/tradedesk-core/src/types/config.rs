//! The immutable configuration a bot run is started with.

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

use super::{BrokerId, Exchange, Timeframe};

/// Selects one instrument for the bot to trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSelector {
    pub symbol: String,
    pub exchange: Exchange,
    /// Broker instrument token, when already known
    pub token: Option<u32>,
}

impl InstrumentSelector {
    pub fn new(symbol: impl Into<String>, exchange: Exchange) -> Self {
        Self {
            symbol: symbol.into(),
            exchange,
            token: None,
        }
    }
}

/// How order quantity is derived from account equity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SizingMode {
    /// Always trade the same quantity
    FixedQuantity { quantity: u32 },
    /// Deploy risk_per_trade% of equity as notional
    PercentEquity,
    /// Risk risk_per_trade% of equity against a stop distance
    RiskBased { stop_loss_pct: Decimal },
}

impl Default for SizingMode {
    fn default() -> Self {
        SizingMode::PercentEquity
    }
}

/// Risk parameters for a bot run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    /// Percent of capital risked (or deployed) per trade, in (0, 100]
    pub risk_per_trade_pct: Decimal,
    pub max_open_positions: usize,
    /// Percent of capital that, once lost in a day, halts the bot
    pub max_daily_loss_pct: Decimal,
    #[serde(default)]
    pub sizing: SizingMode,
}

impl Default for RiskParams {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            risk_per_trade_pct: dec!(1),
            max_open_positions: 5,
            max_daily_loss_pct: dec!(5),
            sizing: SizingMode::default(),
        }
    }
}

/// Exchange session window the bot is allowed to place orders in,
/// expressed as IST wall-clock times.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SessionWindow {
    /// NSE/BSE equity hours.
    pub fn nse() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            end: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        time >= self.start && time < self.end
    }
}

impl Default for SessionWindow {
    fn default() -> Self {
        Self::nse()
    }
}

/// Everything the bot needs for one run. Immutable once accepted by
/// `BotController::start`; the controller stores it behind an Arc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfiguration {
    pub broker: BrokerId,
    pub instruments: Vec<InstrumentSelector>,
    /// Registry id of the strategy to run
    pub strategy: String,
    /// Strategy parameters, deserialized by the registry
    #[serde(default)]
    pub strategy_params: serde_json::Value,
    #[serde(default)]
    pub timeframe: Timeframe,
    #[serde(default)]
    pub risk: RiskParams,
    #[serde(default)]
    pub session: SessionWindow,
    /// Trading-loop poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub paper_trading: bool,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

impl TradingConfiguration {
    /// Check structural invariants. Business-rule validation happens
    /// upstream; this guards only what the controller itself relies on.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.instruments.is_empty() {
            return Err(ControllerError::InvalidConfiguration(
                "at least one instrument is required".into(),
            ));
        }
        if self.risk.risk_per_trade_pct <= Decimal::ZERO
            || self.risk.risk_per_trade_pct > Decimal::from(100)
        {
            return Err(ControllerError::InvalidConfiguration(
                "risk_per_trade_pct must be in (0, 100]".into(),
            ));
        }
        if self.session.start >= self.session.end {
            return Err(ControllerError::InvalidConfiguration(
                "session start must precede session end".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ControllerError::InvalidConfiguration(
                "poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The configured trading symbols.
    pub fn symbols(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.symbol.clone()).collect()
    }
}
