//! Core data types.

mod broker_id;
mod config;
mod instrument;
mod ohlcv;
mod order;
mod position;
mod signal;
mod timeframe;

pub use broker_id::BrokerId;
pub use config::{
    InstrumentSelector, RiskParams, SessionWindow, SizingMode, TradingConfiguration,
};
pub use instrument::{Exchange, Instrument, InstrumentKind};
pub use ohlcv::{Bar, BarSeries};
pub use order::{OrderRequest, OrderType, Product, Side, TradeRecord};
pub use position::{AccountInfo, Position};
pub use signal::{Signal, SignalKind};
pub use timeframe::Timeframe;
