//! Zerodha Kite Connect v3 adapter.
//!
//! Auth is `Authorization: token api_key:access_token`; access tokens come
//! from the OAuth request-token exchange and die at the next 6:00 IST. The
//! instrument dump is served as CSV, everything else as `{status, data}`
//! JSON envelopes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha256};
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

const DEFAULT_BASE_URL: &str = "https://api.kite.trade";
const LOGIN_URL: &str = "https://kite.zerodha.com/connect/login";

/// IST, the only timezone Kite speaks.
fn ist() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 1800).unwrap()
}

#[derive(Clone)]
struct KiteAuth {
    api_key: String,
    access_token: String,
}

impl KiteAuth {
    fn header(&self) -> String {
        format!("token {}:{}", self.api_key, self.access_token)
    }
}

/// Kite Connect adapter.
pub struct KiteBroker {
    client: Client,
    base_url: String,
    auth: RwLock<Option<KiteAuth>>,
    instruments: tokio::sync::RwLock<Option<Arc<HashMap<String, Instrument>>>>,
}

impl Default for KiteBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl KiteBroker {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: RwLock::new(None),
            instruments: tokio::sync::RwLock::new(None),
        }
    }

    /// Point the adapter at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The Kite login page a user must visit to obtain a request token.
    pub fn login_url(api_key: &str) -> String {
        format!("{}?v=3&api_key={}", LOGIN_URL, api_key)
    }

    fn auth_header(&self) -> Result<String, BrokerError> {
        self.auth
            .read()
            .unwrap()
            .as_ref()
            .map(KiteAuth::header)
            .ok_or(BrokerError::NotConnected)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, BrokerError> {
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;

        if !status.is_success() {
            if body.contains("TokenException") {
                return Err(BrokerError::TokenExpired);
            }
            return Err(status_error(status, &extract_message(&body)));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| BrokerError::Api(format!("malformed response: {}", e)))?;
        envelope
            .data
            .ok_or_else(|| BrokerError::Api(envelope.message.unwrap_or_else(|| "empty response".into())))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BrokerError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Kite-Version", "3")
            .header("Authorization", self.auth_header()?)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(resp).await
    }

    async fn instrument_map(&self) -> Result<Arc<HashMap<String, Instrument>>, BrokerError> {
        if let Some(map) = self.instruments.read().await.as_ref() {
            return Ok(Arc::clone(map));
        }

        let mut guard = self.instruments.write().await;
        if let Some(map) = guard.as_ref() {
            return Ok(Arc::clone(map));
        }

        let resp = self
            .client
            .get(format!("{}/instruments", self.base_url))
            .header("X-Kite-Version", "3")
            .header("Authorization", self.auth_header()?)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &extract_message(&body)));
        }

        let map: HashMap<String, Instrument> = parse_instruments_csv(&body)
            .into_iter()
            .map(|i| (i.tradingsymbol.clone(), i))
            .collect();
        info!(count = map.len(), "kite instrument dump loaded");
        let map = Arc::new(map);
        *guard = Some(Arc::clone(&map));
        Ok(map)
    }

    async fn resolve(&self, symbol: &str) -> Result<Instrument, BrokerError> {
        self.instrument_map()
            .await?
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
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KiteProfile {
    user_id: String,
    user_name: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KiteSessionData {
    access_token: String,
    user_id: String,
    user_name: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KiteMargins {
    net: Decimal,
    available: KiteMarginAvailable,
    utilised: KiteMarginUtilised,
}

#[derive(Debug, Deserialize)]
struct KiteMarginAvailable {
    cash: Decimal,
    live_balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct KiteMarginUtilised {
    debits: Decimal,
    #[serde(default)]
    m2m_realised: Decimal,
}

#[derive(Debug, Deserialize)]
struct KitePositions {
    net: Vec<KitePositionRow>,
}

#[derive(Debug, Deserialize)]
struct KitePositionRow {
    tradingsymbol: String,
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
struct KiteOrderReceipt {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct KiteLtp {
    last_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct KiteCandles {
    candles: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct KiteTradeRow {
    order_id: String,
    tradingsymbol: String,
    exchange: String,
    transaction_type: String,
    quantity: u32,
    average_price: Decimal,
    fill_timestamp: String,
}

/// SHA-256 over api_key + request_token + api_secret, hex-encoded; Kite's
/// session-token request requires it.
fn session_checksum(api_key: &str, request_token: &str, api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(request_token.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn parse_instruments_csv(text: &str) -> Vec<Instrument> {
    #[derive(Debug, Deserialize)]
    struct Row {
        instrument_token: u32,
        exchange_token: u32,
        tradingsymbol: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        expiry: String,
        #[serde(default)]
        strike: Option<Decimal>,
        tick_size: Decimal,
        lot_size: u32,
        instrument_type: String,
        exchange: String,
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    reader
        .deserialize::<Row>()
        .filter_map(|row| row.ok())
        .filter_map(|row| {
            let exchange = Exchange::from_str(&row.exchange).ok()?;
            let kind = InstrumentKind::from_str(&row.instrument_type).ok()?;
            let expiry = NaiveDate::parse_from_str(&row.expiry, "%Y-%m-%d").ok();
            Some(Instrument {
                instrument_token: row.instrument_token,
                exchange_token: row.exchange_token,
                tradingsymbol: row.tradingsymbol,
                name: row.name,
                exchange,
                kind,
                tick_size: row.tick_size,
                lot_size: row.lot_size.max(1),
                expiry,
                strike: row.strike.filter(|s| !s.is_zero()),
            })
        })
        .collect()
}

/// Candles arrive as `[timestamp, open, high, low, close, volume, (oi)]`.
fn parse_candle(value: &serde_json::Value) -> Option<Bar> {
    let row = value.as_array()?;
    let ts = DateTime::parse_from_str(row.first()?.as_str()?, "%Y-%m-%dT%H:%M:%S%z").ok()?;
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

fn parse_position(row: KitePositionRow) -> Option<Position> {
    let exchange = Exchange::from_str(&row.exchange).ok()?;
    let mut position = Position::open(row.tradingsymbol, exchange, row.quantity, row.average_price);
    position.realized_pnl = row.realised;
    position.update_price(row.last_price);
    // Kite reports day P&L itself; trust it over our recomputation
    position.unrealized_pnl = row.unrealised;
    Some(position)
}

fn parse_trade(row: KiteTradeRow) -> Option<TradeRecord> {
    let exchange = Exchange::from_str(&row.exchange).ok()?;
    let side = match row.transaction_type.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        _ => return None,
    };
    let naive = NaiveDateTime::parse_from_str(&row.fill_timestamp, "%Y-%m-%d %H:%M:%S").ok()?;
    let executed_at = ist().from_local_datetime(&naive).single()?.with_timezone(&Utc);
    Some(TradeRecord {
        order_id: row.order_id,
        symbol: row.tradingsymbol,
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
    match product {
        Product::Mis => "MIS",
        Product::Cnc => "CNC",
        Product::Nrml => "NRML",
    }
}

#[async_trait]
impl BrokerAdapter for KiteBroker {
    fn id(&self) -> BrokerId {
        BrokerId::Kite
    }

    fn name(&self) -> &str {
        "Zerodha Kite"
    }

    async fn connect(&self, credentials: &Credentials) -> Result<UserProfile, BrokerError> {
        let Credentials::AccessToken {
            api_key,
            access_token,
        } = credentials
        else {
            return Err(BrokerError::Authentication(
                "Kite requires an access token; complete the OAuth login first".into(),
            ));
        };

        let auth = KiteAuth {
            api_key: api_key.clone(),
            access_token: access_token.clone(),
        };

        let resp = self
            .client
            .get(format!("{}/user/profile", self.base_url))
            .header("X-Kite-Version", "3")
            .header("Authorization", auth.header())
            .send()
            .await
            .map_err(transport_error)?;
        let profile: KiteProfile = Self::decode(resp).await?;

        *self.auth.write().unwrap() = Some(auth);
        info!(user_id = %profile.user_id, "kite session established");

        Ok(UserProfile {
            user_id: profile.user_id,
            user_name: profile.user_name,
            email: profile.email,
        })
    }

    async fn disconnect(&self) {
        *self.auth.write().unwrap() = None;
        *self.instruments.write().await = None;
    }

    fn is_connected(&self) -> bool {
        self.auth.read().unwrap().is_some()
    }

    async fn exchange_request_token(
        &self,
        api_key: &str,
        api_secret: &str,
        request_token: &str,
    ) -> Result<OAuthToken, BrokerError> {
        let checksum = session_checksum(api_key, request_token, api_secret);
        let resp = self
            .client
            .post(format!("{}/session/token", self.base_url))
            .header("X-Kite-Version", "3")
            .form(&[
                ("api_key", api_key),
                ("request_token", request_token),
                ("checksum", &checksum),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let session: KiteSessionData = Self::decode(resp).await?;

        Ok(OAuthToken {
            access_token: session.access_token,
            profile: UserProfile {
                user_id: session.user_id,
                user_name: session.user_name,
                email: session.email,
            },
        })
    }

    async fn get_instruments(&self) -> Result<Vec<Instrument>, BrokerError> {
        Ok(self.instrument_map().await?.values().cloned().collect())
    }

    async fn get_instrument_info(&self, symbol: &str) -> Result<Option<Instrument>, BrokerError> {
        Ok(self.instrument_map().await?.get(symbol).cloned())
    }

    async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        let instrument = self.resolve(symbol).await?;

        // Over-fetch by calendar days to survive weekends and holidays.
        let span_secs = (timeframe.as_secs() * bars as u64).max(86_400) * 3;
        let to = Utc::now().with_timezone(&ist());
        let from = to - Duration::seconds(span_secs as i64);
        let fmt = "%Y-%m-%d %H:%M:%S";

        let data: KiteCandles = self
            .get_json(
                &format!(
                    "/instruments/historical/{}/{}",
                    instrument.instrument_token,
                    timeframe.api_interval()
                ),
                &[
                    ("from", from.format(fmt).to_string()),
                    ("to", to.format(fmt).to_string()),
                ],
            )
            .await?;

        let mut out: Vec<Bar> = data.candles.iter().filter_map(parse_candle).collect();
        if out.len() > bars {
            out.drain(..out.len() - bars);
        }
        Ok(out)
    }

    async fn get_quote(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        let instrument = self.resolve(symbol).await?;
        let key = format!("{}:{}", instrument.exchange, instrument.tradingsymbol);
        let data: HashMap<String, KiteLtp> = self
            .get_json("/quote/ltp", &[("i", key.clone())])
            .await?;
        data.get(&key)
            .map(|q| q.last_price)
            .ok_or_else(|| BrokerError::SymbolNotFound(symbol.to_string()))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError> {
        if request.quantity == 0 {
            return Err(BrokerError::Validation("quantity must be positive".into()));
        }

        let mut form: Vec<(&str, String)> = vec![
            ("tradingsymbol", request.symbol.clone()),
            ("exchange", request.exchange.to_string()),
            (
                "transaction_type",
                match request.side {
                    Side::Buy => "BUY".into(),
                    Side::Sell => "SELL".into(),
                },
            ),
            ("order_type", order_type_param(request.order_type).into()),
            ("quantity", request.quantity.to_string()),
            ("product", product_param(request.product).into()),
            ("validity", "DAY".into()),
        ];
        if let Some(price) = request.price {
            form.push(("price", price.to_string()));
        }
        if let Some(trigger) = request.trigger_price {
            form.push(("trigger_price", trigger.to_string()));
        }
        if let Some(tag) = &request.tag {
            form.push(("tag", tag.clone()));
        }

        debug!(symbol = %request.symbol, side = %request.side, qty = request.quantity,
               "submitting kite order");
        let resp = self
            .client
            .post(format!("{}/orders/regular", self.base_url))
            .header("X-Kite-Version", "3")
            .header("Authorization", self.auth_header()?)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.map_err(transport_error)?;
            if body.contains("TokenException") {
                return Err(BrokerError::TokenExpired);
            }
            return Err(BrokerError::OrderRejected(extract_message(&body)));
        }

        let envelope: Envelope<KiteOrderReceipt> = resp.json().await.map_err(transport_error)?;
        let receipt = envelope
            .data
            .ok_or_else(|| BrokerError::Api("order response missing order_id".into()))?;
        info!(order_id = %receipt.order_id, symbol = %request.symbol, "kite order accepted");
        Ok(receipt.order_id)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let data: KitePositions = self.get_json("/portfolio/positions", &[]).await?;
        Ok(data
            .net
            .into_iter()
            .filter(|row| row.quantity != 0)
            .filter_map(parse_position)
            .collect())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError> {
        let data: KiteMargins = self.get_json("/user/margins/equity", &[]).await?;
        Ok(AccountInfo {
            balance: data.available.cash,
            equity: data.available.live_balance,
            margin_available: data.net,
            margin_used: data.utilised.debits,
            realized_pnl_today: data.utilised.m2m_realised,
        })
    }

    async fn get_trades(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, BrokerError> {
        let rows: Vec<KiteTradeRow> = self.get_json("/trades", &[]).await?;
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
    fn test_session_checksum() {
        // SHA-256("abc"): the concatenation is hashed as one string
        let sum = session_checksum("a", "b", "c");
        assert_eq!(
            sum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_login_url() {
        let url = KiteBroker::login_url("demo_key");
        assert_eq!(
            url,
            "https://kite.zerodha.com/connect/login?v=3&api_key=demo_key"
        );
    }

    #[test]
    fn test_parse_candle() {
        let value = serde_json::json!([
            "2025-08-29T09:15:00+0530",
            24510.0,
            24544.5,
            24498.0,
            24531.2,
            183400.0,
            1250000.0
        ]);
        let bar = parse_candle(&value).unwrap();
        assert_eq!(bar.open, 24510.0);
        assert_eq!(bar.close, 24531.2);
        assert_eq!(bar.oi, Some(1250000.0));
    }

    #[test]
    fn test_parse_candle_rejects_garbage() {
        assert!(parse_candle(&serde_json::json!("not a candle")).is_none());
        assert!(parse_candle(&serde_json::json!(["bad-ts", 1.0, 2.0, 0.5, 1.5, 10.0])).is_none());
    }

    #[test]
    fn test_parse_position_row() {
        let row: KitePositionRow = serde_json::from_str(
            r#"{
                "tradingsymbol": "INFY",
                "exchange": "NSE",
                "quantity": -10,
                "average_price": 1510.0,
                "last_price": 1500.0,
                "realised": 0,
                "unrealised": 100.0
            }"#,
        )
        .unwrap();
        let position = parse_position(row).unwrap();
        assert!(position.is_short());
        assert_eq!(position.unrealized_pnl, dec!(100.0));
        assert_eq!(position.exchange, Exchange::NSE);
    }

    #[test]
    fn test_parse_instruments_csv() {
        let csv = "\
instrument_token,exchange_token,tradingsymbol,name,last_price,expiry,strike,tick_size,lot_size,instrument_type,segment,exchange
408065,1594,INFY,INFOSYS,0,,0,0.05,1,EQ,NSE,NSE
13368834,52222,NIFTY25SEPFUT,NIFTY,0,2025-09-25,0,0.05,75,FUT,NFO-FUT,NFO
999,1,WEIRD,UNKNOWN,0,,0,0.05,1,XX,NSE,NSE
";
        let instruments = parse_instruments_csv(csv);
        assert_eq!(instruments.len(), 2);

        let infy = instruments.iter().find(|i| i.tradingsymbol == "INFY").unwrap();
        assert_eq!(infy.kind, InstrumentKind::EQ);
        assert_eq!(infy.lot_size, 1);

        let fut = instruments
            .iter()
            .find(|i| i.tradingsymbol == "NIFTY25SEPFUT")
            .unwrap();
        assert_eq!(fut.kind, InstrumentKind::FUT);
        assert_eq!(fut.lot_size, 75);
        assert_eq!(
            fut.expiry,
            NaiveDate::from_ymd_opt(2025, 9, 25)
        );
    }

    #[test]
    fn test_parse_trade_row() {
        let row: KiteTradeRow = serde_json::from_str(
            r#"{
                "order_id": "230830000123",
                "tradingsymbol": "SBIN",
                "exchange": "NSE",
                "transaction_type": "BUY",
                "quantity": 25,
                "average_price": 612.4,
                "fill_timestamp": "2025-08-29 09:31:02"
            }"#,
        )
        .unwrap();
        let trade = parse_trade(row).unwrap();
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.quantity, 25);
        // 09:31 IST is 04:01 UTC
        assert_eq!(trade.executed_at.format("%H:%M").to_string(), "04:01");
    }

    #[tokio::test]
    async fn test_requires_access_token_credentials() {
        let broker = KiteBroker::new();
        let err = broker
            .connect(&Credentials::ApiKey {
                api_key: "k".into(),
                api_secret: "s".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Authentication(_)));
        assert!(!broker.is_connected());
    }
}
