//! Order request types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Exchange;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The offsetting side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buy, -1 for sell, for signed quantity math.
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type, following the shapes Indian brokers accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute at best available price
    Market,
    /// Execute at the given price or better
    Limit,
    /// Stop-loss limit: becomes a limit order past the trigger
    Sl,
    /// Stop-loss market: becomes a market order past the trigger
    SlM,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Sl => write!(f, "SL"),
            OrderType::SlM => write!(f, "SL-M"),
        }
    }
}

/// Product type: intraday vs. delivery vs. carry-forward margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Product {
    /// Margin Intraday Square-off
    #[default]
    Mis,
    /// Cash and Carry (delivery)
    Cnc,
    /// Normal (overnight F&O)
    Nrml,
}

/// A new-order request handed to an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: Exchange,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: u32,
    /// Limit price for LIMIT and SL orders
    pub price: Option<Decimal>,
    /// Trigger price for SL and SL-M orders
    pub trigger_price: Option<Decimal>,
    pub product: Product,
    /// Caller-supplied tag echoed back by the broker
    pub tag: Option<String>,
}

impl OrderRequest {
    /// Create a market order request.
    pub fn market(symbol: impl Into<String>, exchange: Exchange, side: Side, quantity: u32) -> Self {
        Self {
            symbol: symbol.into(),
            exchange,
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            trigger_price: None,
            product: Product::Mis,
            tag: None,
        }
    }

    /// Create a limit order request.
    pub fn limit(
        symbol: impl Into<String>,
        exchange: Exchange,
        side: Side,
        quantity: u32,
        price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange,
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            trigger_price: None,
            product: Product::Mis,
            tag: None,
        }
    }

    /// Set the product type.
    pub fn with_product(mut self, product: Product) -> Self {
        self.product = product;
        self
    }

    /// Attach a caller tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// An executed trade as reported back by the broker (or the paper ledger).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub order_id: String,
    pub symbol: String,
    pub exchange: Exchange,
    pub side: Side,
    pub quantity: u32,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
}
