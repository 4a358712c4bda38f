//! Upstox v2 adapter.
//!
//! Bearer-token auth over api.upstox.com/v2. Endpoints key instruments by
//! `instrument_key` (segment plus ISIN/token), so the adapter keeps a
//! symbol-to-key map alongside the normalized instrument cache.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use tradedesk_core::error::BrokerError;
use tradedesk_core::traits::{BrokerAdapter, Credentials, OAuthToken, UserProfile};
use tradedesk_core::types::{
    AccountInfo, Bar, BrokerId, Exchange, Instrument, InstrumentKind, OrderRequest, OrderType,
    Position, Product, Side, Timeframe, TradeRecord,
};

use crate::http::{extract_message, status_error, transport_error};

const DEFAULT_BASE_URL: &str = "https://api.upstox.com/v2";
// Upstox publishes its BOD master gzipped; deployments point this at an
// uncompressed mirror kept by the instrument service.
const DEFAULT_MASTER_URL: &str =
    "https://assets.upstox.com/market-quote/instruments/exchange/complete.json";

fn ist() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 1800).unwrap()
}

struct InstrumentCache {
    by_symbol: HashMap<String, Instrument>,
    keys: HashMap<String, String>,
}

/// Upstox v2 adapter.
pub struct UpstoxBroker {
    client: Client,
    base_url: String,
    master_url: String,
    access_token: RwLock<Option<String>>,
    cache: tokio::sync::RwLock<Option<Arc<InstrumentCache>>>,
}

impl Default for UpstoxBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstoxBroker {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            master_url: DEFAULT_MASTER_URL.to_string(),
            access_token: RwLock::new(None),
            cache: tokio::sync::RwLock::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_master_url(mut self, master_url: impl Into<String>) -> Self {
        self.master_url = master_url.into();
        self
    }

    /// The authorization dialog the user must visit to obtain a code.
    pub fn authorization_url(api_key: &str, redirect_uri: &str) -> String {
        format!(
            "{}/login/authorization/dialog?response_type=code&client_id={}&redirect_uri={}",
            DEFAULT_BASE_URL, api_key, redirect_uri
        )
    }

    fn bearer(&self) -> Result<String, BrokerError> {
        self.access_token
            .read()
            .unwrap()
            .as_ref()
            .map(|t| format!("Bearer {}", t))
            .ok_or(BrokerError::NotConnected)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, BrokerError> {
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            if body.contains("UDAPI100050") || body.contains("Invalid token") {
                return Err(BrokerError::TokenExpired);
            }
            return Err(status_error(status, &extract_message(&body)));
        }
        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| BrokerError::Api(format!("malformed response: {}", e)))?;
        envelope
            .data
            .ok_or_else(|| BrokerError::Api("empty response".into()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BrokerError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("Accept", "application/json")
            .header("Authorization", self.bearer()?)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(resp).await
    }

    async fn cache(&self) -> Result<Arc<InstrumentCache>, BrokerError> {
        if let Some(cache) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(cache));
        }

        let mut guard = self.cache.write().await;
        if let Some(cache) = guard.as_ref() {
            return Ok(Arc::clone(cache));
        }

        let resp = self
            .client
            .get(&self.master_url)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, "instrument master unavailable"));
        }
        let rows: Vec<MasterRow> = resp.json().await.map_err(transport_error)?;

        let mut by_symbol = HashMap::new();
        let mut keys = HashMap::new();
        for row in rows {
            if let Some((instrument, key)) = normalize_master_row(row) {
                keys.insert(instrument.tradingsymbol.clone(), key);
                by_symbol.insert(instrument.tradingsymbol.clone(), instrument);
            }
        }
        info!(count = by_symbol.len(), "upstox instrument master loaded");
        let cache = Arc::new(InstrumentCache { by_symbol, keys });
        *guard = Some(Arc::clone(&cache));
        Ok(cache)
    }

    async fn instrument_key(&self, symbol: &str) -> Result<String, BrokerError> {
        self.cache()
            .await?
            .keys
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError::SymbolNotFound(symbol.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[allow(dead_code)]
    status: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct MasterRow {
    instrument_key: String,
    exchange_token: Option<String>,
    trading_symbol: String,
    #[serde(default)]
    name: String,
    exchange: String,
    instrument_type: String,
    #[serde(default)]
    lot_size: Option<u32>,
    /// Paise in the master file.
    #[serde(default)]
    tick_size: Option<Decimal>,
    #[serde(default)]
    expiry: Option<String>,
    #[serde(default)]
    strike_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct UpstoxProfile {
    user_id: String,
    user_name: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstoxTokenResponse {
    access_token: String,
    user_id: String,
    user_name: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstoxFunds {
    equity: UpstoxSegmentFunds,
}

#[derive(Debug, Deserialize)]
struct UpstoxSegmentFunds {
    available_margin: Decimal,
    used_margin: Decimal,
}

#[derive(Debug, Deserialize)]
struct UpstoxPositionRow {
    trading_symbol: String,
    exchange: String,
    quantity: i64,
    average_price: Decimal,
    last_price: Decimal,
    #[serde(default)]
    realised: Decimal,
    #[serde(default)]
    unrealised: Decimal,
}

#[derive(Debug, Deserialize)]
struct UpstoxLtp {
    last_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct UpstoxCandles {
    candles: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct UpstoxOrderReceipt {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct UpstoxTradeRow {
    order_id: String,
    trading_symbol: String,
    exchange: String,
    transaction_type: String,
    quantity: u32,
    average_price: Decimal,
    exchange_timestamp: String,
}

fn normalize_master_row(row: MasterRow) -> Option<(Instrument, String)> {
    let exchange = Exchange::from_str(&row.exchange).ok()?;
    let kind = InstrumentKind::from_str(&row.instrument_type).ok()?;
    let exchange_token: u32 = row.exchange_token.as_deref()?.parse().ok()?;
    let expiry = row
        .expiry
        .as_deref()
        .and_then(|e| NaiveDate::parse_from_str(e, "%Y-%m-%d").ok());
    let instrument = Instrument {
        instrument_token: exchange_token,
        exchange_token,
        tradingsymbol: row.trading_symbol,
        name: row.name,
        exchange,
        kind,
        tick_size: row.tick_size.map(|t| t / Decimal::from(100)).unwrap_or_default(),
        lot_size: row.lot_size.unwrap_or(1).max(1),
        expiry,
        strike: row.strike_price.filter(|s| !s.is_zero()),
    };
    Some((instrument, row.instrument_key))
}

/// v2 historical candles support only these resolutions.
fn interval_param(timeframe: Timeframe) -> Result<&'static str, BrokerError> {
    match timeframe {
        Timeframe::Minute => Ok("1minute"),
        Timeframe::Minute30 => Ok("30minute"),
        Timeframe::Day => Ok("day"),
        other => Err(BrokerError::Unsupported(format!(
            "Upstox historical data supports 1minute, 30minute and day; got {}",
            other.api_interval()
        ))),
    }
}

fn parse_candle(value: &serde_json::Value) -> Option<Bar> {
    let row = value.as_array()?;
    let ts = DateTime::parse_from_rfc3339(row.first()?.as_str()?).ok()?;
    let mut bar = Bar::new(
        ts.timestamp_millis(),
        row.get(1)?.as_f64()?,
        row.get(2)?.as_f64()?,
        row.get(3)?.as_f64()?,
        row.get(4)?.as_f64()?,
        row.get(5)?.as_f64()?,
    );
    if let Some(oi) = row.get(6).and_then(|v| v.as_f64()) {
        bar = bar.with_oi(oi);
    }
    Some(bar)
}

fn parse_position(row: UpstoxPositionRow) -> Option<Position> {
    let exchange = Exchange::from_str(&row.exchange).ok()?;
    let mut position = Position::open(row.trading_symbol, exchange, row.quantity, row.average_price);
    position.realized_pnl = row.realised;
    position.update_price(row.last_price);
    position.unrealized_pnl = row.unrealised;
    Some(position)
}

fn parse_trade(row: UpstoxTradeRow) -> Option<TradeRecord> {
    let exchange = Exchange::from_str(&row.exchange).ok()?;
    let side = match row.transaction_type.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        _ => return None,
    };
    let executed_at = DateTime::parse_from_rfc3339(&row.exchange_timestamp)
        .ok()?
        .with_timezone(&Utc);
    Some(TradeRecord {
        order_id: row.order_id,
        symbol: row.trading_symbol,
        exchange,
        side,
        quantity: row.quantity,
        price: row.average_price,
        executed_at,
    })
}

fn order_type_param(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::Sl => "SL",
        OrderType::SlM => "SL-M",
    }
}

fn product_param(product: Product) -> &'static str {
    // v2 products are intraday or delivery
    match product {
        Product::Mis => "I",
        Product::Cnc | Product::Nrml => "D",
    }
}

#[async_trait]
impl BrokerAdapter for UpstoxBroker {
    fn id(&self) -> BrokerId {
        BrokerId::Upstox
    }

    fn name(&self) -> &str {
        "Upstox"
    }

    async fn connect(&self, credentials: &Credentials) -> Result<UserProfile, BrokerError> {
        let Credentials::AccessToken { access_token, .. } = credentials else {
            return Err(BrokerError::Authentication(
                "Upstox requires an access token; complete the OAuth login first".into(),
            ));
        };

        let resp = self
            .client
            .get(format!("{}/user/profile", self.base_url))
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(transport_error)?;
        let profile: UpstoxProfile = Self::decode(resp).await?;

        *self.access_token.write().unwrap() = Some(access_token.clone());
        info!(user_id = %profile.user_id, "upstox session established");

        Ok(UserProfile {
            user_id: profile.user_id,
            user_name: profile.user_name,
            email: profile.email,
        })
    }

    async fn disconnect(&self) {
        *self.access_token.write().unwrap() = None;
        *self.cache.write().await = None;
    }

    fn is_connected(&self) -> bool {
        self.access_token.read().unwrap().is_some()
    }

    async fn exchange_request_token(
        &self,
        api_key: &str,
        api_secret: &str,
        request_token: &str,
    ) -> Result<OAuthToken, BrokerError> {
        // request_token carries "code|redirect_uri" as produced by the
        // authorization dialog callback
        let (code, redirect_uri) = request_token
            .split_once('|')
            .ok_or_else(|| BrokerError::Validation("expected code|redirect_uri".into()))?;

        let resp = self
            .client
            .post(format!("{}/login/authorization/token", self.base_url))
            .header("Accept", "application/json")
            .form(&[
                ("code", code),
                ("client_id", api_key),
                ("client_secret", api_secret),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &extract_message(&body)));
        }
        // token response is flat, not enveloped
        let token: UpstoxTokenResponse = serde_json::from_str(&body)
            .map_err(|e| BrokerError::Api(format!("malformed token response: {}", e)))?;

        Ok(OAuthToken {
            access_token: token.access_token,
            profile: UserProfile {
                user_id: token.user_id,
                user_name: token.user_name,
                email: token.email,
            },
        })
    }

    async fn get_instruments(&self) -> Result<Vec<Instrument>, BrokerError> {
        Ok(self.cache().await?.by_symbol.values().cloned().collect())
    }

    async fn get_instrument_info(&self, symbol: &str) -> Result<Option<Instrument>, BrokerError> {
        Ok(self.cache().await?.by_symbol.get(symbol).cloned())
    }

    async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        let key = self.instrument_key(symbol).await?;
        let interval = interval_param(timeframe)?;

        let span_secs = (timeframe.as_secs() * bars as u64).max(86_400) * 3;
        let to = Utc::now().with_timezone(&ist());
        let from = to - Duration::seconds(span_secs as i64);

        let data: UpstoxCandles = self
            .get_json(
                &format!(
                    "/historical-candle/{}/{}/{}/{}",
                    key,
                    interval,
                    to.format("%Y-%m-%d"),
                    from.format("%Y-%m-%d")
                ),
                &[],
            )
            .await?;

        // served newest-first
        let mut out: Vec<Bar> = data.candles.iter().filter_map(parse_candle).collect();
        out.sort_by_key(|b| b.timestamp);
        if out.len() > bars {
            out.drain(..out.len() - bars);
        }
        Ok(out)
    }

    async fn get_quote(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        let key = self.instrument_key(symbol).await?;
        let data: HashMap<String, UpstoxLtp> = self
            .get_json("/market-quote/ltp", &[("instrument_key", key)])
            .await?;
        // response keys use EXCHANGE_SEGMENT:SYMBOL, not the request key
        data.values()
            .next()
            .map(|q| q.last_price)
            .ok_or_else(|| BrokerError::SymbolNotFound(symbol.to_string()))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError> {
        if request.quantity == 0 {
            return Err(BrokerError::Validation("quantity must be positive".into()));
        }
        let key = self.instrument_key(&request.symbol).await?;

        let payload = serde_json::json!({
            "instrument_token": key,
            "quantity": request.quantity,
            "product": product_param(request.product),
            "validity": "DAY",
            "price": request.price.unwrap_or_default(),
            "order_type": order_type_param(request.order_type),
            "transaction_type": match request.side {
                Side::Buy => "BUY",
                Side::Sell => "SELL",
            },
            "trigger_price": request.trigger_price.unwrap_or_default(),
            "tag": request.tag.clone().unwrap_or_default(),
            "disclosed_quantity": 0,
            "is_amo": false,
        });

        debug!(symbol = %request.symbol, side = %request.side, qty = request.quantity,
               "submitting upstox order");
        let resp = self
            .client
            .post(format!("{}/order/place", self.base_url))
            .header("Accept", "application/json")
            .header("Authorization", self.bearer()?)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.map_err(transport_error)?;
            return Err(BrokerError::OrderRejected(extract_message(&body)));
        }
        let receipt: UpstoxOrderReceipt = Self::decode(resp).await?;
        info!(order_id = %receipt.order_id, symbol = %request.symbol, "upstox order accepted");
        Ok(receipt.order_id)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let rows: Vec<UpstoxPositionRow> =
            self.get_json("/portfolio/short-term-positions", &[]).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.quantity != 0)
            .filter_map(parse_position)
            .collect())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError> {
        let funds: UpstoxFunds = self.get_json("/user/get-funds-and-margin", &[]).await?;
        let available = funds.equity.available_margin;
        let used = funds.equity.used_margin;
        Ok(AccountInfo {
            balance: available,
            equity: available + used,
            margin_available: available,
            margin_used: used,
            realized_pnl_today: Decimal::ZERO,
        })
    }

    async fn get_trades(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, BrokerError> {
        let rows: Vec<UpstoxTradeRow> = self.get_json("/order/trades-get-trades-for-day", &[]).await?;
        Ok(rows
            .into_iter()
            .filter_map(parse_trade)
            .filter(|t| t.executed_at >= from && t.executed_at <= to)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_authorization_url() {
        let url = UpstoxBroker::authorization_url("key1", "https://localhost/cb");
        assert!(url.contains("client_id=key1"));
        assert!(url.contains("redirect_uri=https://localhost/cb"));
        assert!(url.starts_with("https://api.upstox.com/v2/login/authorization/dialog"));
    }

    #[test]
    fn test_interval_param() {
        assert_eq!(interval_param(Timeframe::Minute).unwrap(), "1minute");
        assert_eq!(interval_param(Timeframe::Day).unwrap(), "day");
        assert!(matches!(
            interval_param(Timeframe::Minute5),
            Err(BrokerError::Unsupported(_))
        ));
    }

    #[test]
    fn test_normalize_master_row() {
        let row: MasterRow = serde_json::from_str(
            r#"{
                "instrument_key": "NSE_EQ|INE009A01021",
                "exchange_token": "1594",
                "trading_symbol": "INFY",
                "name": "INFOSYS LIMITED",
                "exchange": "NSE",
                "instrument_type": "EQ",
                "lot_size": 1,
                "tick_size": 5.0
            }"#,
        )
        .unwrap();
        let (instrument, key) = normalize_master_row(row).unwrap();
        assert_eq!(key, "NSE_EQ|INE009A01021");
        assert_eq!(instrument.exchange, Exchange::NSE);
        assert_eq!(instrument.tick_size, dec!(0.05));
        assert_eq!(instrument.exchange_token, 1594);
    }

    #[test]
    fn test_parse_candle_sorts_newest_first_input() {
        let newest = parse_candle(&serde_json::json!([
            "2025-08-29T15:29:00+05:30",
            100.0, 101.0, 99.5, 100.5, 1200.0, 0.0
        ]))
        .unwrap();
        let older = parse_candle(&serde_json::json!([
            "2025-08-29T15:28:00+05:30",
            99.0, 100.0, 98.5, 100.0, 900.0, 0.0
        ]))
        .unwrap();
        assert!(newest.timestamp > older.timestamp);
    }

    #[test]
    fn test_parse_position_row() {
        let row: UpstoxPositionRow = serde_json::from_str(
            r#"{
                "trading_symbol": "SBIN",
                "exchange": "NSE",
                "quantity": 50,
                "average_price": 610.0,
                "last_price": 615.5,
                "realised": 0,
                "unrealised": 275.0
            }"#,
        )
        .unwrap();
        let position = parse_position(row).unwrap();
        assert!(position.is_long());
        assert_eq!(position.unrealized_pnl, dec!(275.0));
    }

    #[tokio::test]
    async fn test_requires_access_token_credentials() {
        let broker = UpstoxBroker::new();
        let err = broker
            .connect(&Credentials::None)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Authentication(_)));
        assert!(!broker.is_connected());
    }
}
