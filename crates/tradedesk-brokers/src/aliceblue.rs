//! Alice Blue (ANT) adapter.
//!
//! Session setup is a two-step handshake: fetch an encryption key for the
//! user id, then exchange SHA-256(user_id + api_key + enc_key) for a
//! session id. Thereafter auth is `Authorization: Bearer {user_id} {sid}`.
//! The API signals failures inside HTTP-200 bodies via `stat: "Not_Ok"`,
//! so every response goes through a stat check before deserializing.
//! Credentials map as `ApiKey { api_key: user_id, api_secret: api_key }`.

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
use tradedesk_core::traits::{BrokerAdapter, Credentials, UserProfile};
use tradedesk_core::types::{
    AccountInfo, Bar, BrokerId, Exchange, Instrument, InstrumentKind, OrderRequest, OrderType,
    Position, Product, Side, Timeframe, TradeRecord,
};

use crate::http::{extract_message, status_error, transport_error};

const DEFAULT_BASE_URL: &str = "https://ant.aliceblueonline.com/rest/AliceBlueAPIService/api";
const DEFAULT_CONTRACT_BASE_URL: &str =
    "https://v2api.aliceblueonline.com/restpy/static/contract_master";

fn ist() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 1800).unwrap()
}

struct AliceAuth {
    user_id: String,
    session_id: String,
}

impl AliceAuth {
    fn header(&self) -> String {
        format!("Bearer {} {}", self.user_id, self.session_id)
    }
}

/// Alice Blue adapter.
pub struct AliceBlueBroker {
    client: Client,
    base_url: String,
    contract_base_url: String,
    auth: RwLock<Option<AliceAuth>>,
    instruments: tokio::sync::RwLock<Option<Arc<HashMap<String, Instrument>>>>,
}

impl Default for AliceBlueBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl AliceBlueBroker {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            contract_base_url: DEFAULT_CONTRACT_BASE_URL.to_string(),
            auth: RwLock::new(None),
            instruments: tokio::sync::RwLock::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_contract_base_url(mut self, url: impl Into<String>) -> Self {
        self.contract_base_url = url.into();
        self
    }

    fn auth_header(&self) -> Result<String, BrokerError> {
        self.auth
            .read()
            .unwrap()
            .as_ref()
            .map(AliceAuth::header)
            .ok_or(BrokerError::NotConnected)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, BrokerError> {
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &extract_message(&body)));
        }
        check_stat(&body)?;
        serde_json::from_str(&body)
            .map_err(|e| BrokerError::Api(format!("malformed response: {}", e)))
    }

    async fn get_secure<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, BrokerError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth_header()?)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(resp).await
    }

    async fn post_secure<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<T, BrokerError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth_header()?)
            .json(payload)
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

        let mut map = HashMap::new();
        for segment in ["NSE", "NFO"] {
            let resp = self
                .client
                .get(format!("{}/{}.csv", self.contract_base_url, segment))
                .send()
                .await
                .map_err(transport_error)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(status_error(status, "contract master unavailable"));
            }
            let body = resp.text().await.map_err(transport_error)?;
            for instrument in parse_contract_csv(&body) {
                map.insert(instrument.tradingsymbol.clone(), instrument);
            }
        }
        info!(count = map.len(), "alice blue contract master loaded");
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

/// Failures arrive with HTTP 200; `stat` carries the verdict.
fn check_stat(body: &str) -> Result<(), BrokerError> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return Ok(());
    };
    let stat = value
        .get("stat")
        .or_else(|| value.get(0).and_then(|v| v.get("stat")))
        .and_then(|s| s.as_str());
    if stat == Some("Not_Ok") {
        let message = extract_message(body);
        if message.to_lowercase().contains("session") {
            return Err(BrokerError::TokenExpired);
        }
        return Err(BrokerError::Api(message));
    }
    Ok(())
}

fn session_digest(user_id: &str, api_key: &str, enc_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(api_key.as_bytes());
    hasher.update(enc_key.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Deserialize)]
struct EncKeyResponse {
    #[serde(rename = "encKey")]
    enc_key: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "sessionID")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct AccountDetails {
    #[serde(rename = "accountId")]
    account_id: String,
    #[serde(rename = "accountName")]
    account_name: String,
    #[serde(rename = "emailAddr")]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RmsLimitRow {
    #[serde(default)]
    net: String,
    #[serde(default)]
    cashmarginavailable: String,
    #[serde(default)]
    debits: String,
}

#[derive(Debug, Deserialize)]
struct AlicePositionRow {
    #[serde(rename = "Tsym")]
    tsym: String,
    #[serde(rename = "Exchange")]
    exchange: String,
    #[serde(rename = "Netqty")]
    netqty: String,
    #[serde(rename = "Buyavgprc", default)]
    buy_avg: String,
    #[serde(rename = "Sellavgprc", default)]
    sell_avg: String,
    #[serde(rename = "LTP", default)]
    ltp: String,
    #[serde(rename = "realisedprofitloss", default)]
    realised: String,
    #[serde(rename = "unrealisedprofitloss", default)]
    unrealised: String,
}

#[derive(Debug, Deserialize)]
struct OrderReceiptRow {
    #[serde(rename = "NOrdNo")]
    order_no: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AliceTradeRow {
    #[serde(rename = "Nstordno")]
    order_no: String,
    #[serde(rename = "Tsym")]
    tsym: String,
    #[serde(rename = "Exchange")]
    exchange: String,
    #[serde(rename = "Trantype")]
    trantype: String,
    #[serde(rename = "Filledqty")]
    filled_qty: String,
    #[serde(rename = "Price")]
    price: String,
    #[serde(rename = "Filltime")]
    fill_time: String,
}

#[derive(Debug, Deserialize)]
struct ChartHistory {
    result: Vec<ChartCandle>,
}

#[derive(Debug, Deserialize)]
struct ChartCandle {
    /// Epoch seconds.
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn dec_field(s: &str) -> Decimal {
    Decimal::from_str(s.trim()).unwrap_or_default()
}

fn parse_contract_csv(text: &str) -> Vec<Instrument> {
    #[derive(Debug, Deserialize)]
    struct Row {
        #[serde(rename = "Exch")]
        exch: String,
        #[serde(rename = "Token")]
        token: u32,
        #[serde(rename = "Instrument Type", default)]
        instrument_type: String,
        #[serde(rename = "Option Type", default)]
        option_type: String,
        #[serde(rename = "Strike Price", default)]
        strike: Option<Decimal>,
        #[serde(rename = "Trading Symbol")]
        trading_symbol: String,
        #[serde(rename = "Symbol", default)]
        symbol: String,
        #[serde(rename = "Expiry Date", default)]
        expiry: String,
        #[serde(rename = "Lot Size", default)]
        lot_size: Option<u32>,
        #[serde(rename = "Tick Size", default)]
        tick_size: Option<Decimal>,
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    reader
        .deserialize::<Row>()
        .filter_map(|row| row.ok())
        .filter_map(|row| {
            let exchange = Exchange::from_str(&row.exch).ok()?;
            let kind = match (row.instrument_type.as_str(), row.option_type.as_str()) {
                ("FUTSTK" | "FUTIDX", _) => InstrumentKind::FUT,
                (t, "CE") if t.starts_with("OPT") => InstrumentKind::CE,
                (t, "PE") if t.starts_with("OPT") => InstrumentKind::PE,
                (_, _) if row.instrument_type.is_empty() || row.instrument_type == "EQ" => {
                    InstrumentKind::EQ
                }
                _ => return None,
            };
            let tradingsymbol = row
                .trading_symbol
                .strip_suffix("-EQ")
                .unwrap_or(&row.trading_symbol)
                .to_string();
            let expiry = NaiveDate::parse_from_str(&row.expiry, "%Y-%m-%d").ok();
            Some(Instrument {
                instrument_token: row.token,
                exchange_token: row.token,
                tradingsymbol,
                name: row.symbol,
                exchange,
                kind,
                tick_size: row.tick_size.unwrap_or_default(),
                lot_size: row.lot_size.unwrap_or(1).max(1),
                expiry,
                strike: row.strike.filter(|s| *s > Decimal::ZERO),
            })
        })
        .collect()
}

fn parse_position(row: AlicePositionRow) -> Option<Position> {
    let exchange = Exchange::from_str(&row.exchange).ok()?;
    let quantity: i64 = row.netqty.trim().parse().ok()?;
    let entry = if quantity >= 0 {
        dec_field(&row.buy_avg)
    } else {
        dec_field(&row.sell_avg)
    };
    let mut position = Position::open(row.tsym, exchange, quantity, entry);
    position.realized_pnl = dec_field(&row.realised);
    position.update_price(dec_field(&row.ltp));
    position.unrealized_pnl = dec_field(&row.unrealised);
    Some(position)
}

fn parse_trade(row: AliceTradeRow) -> Option<TradeRecord> {
    let exchange = Exchange::from_str(&row.exchange).ok()?;
    let side = match row.trantype.as_str() {
        "B" => Side::Buy,
        "S" => Side::Sell,
        _ => return None,
    };
    let today = Utc::now().with_timezone(&ist()).date_naive();
    let time = chrono::NaiveTime::parse_from_str(&row.fill_time, "%H:%M:%S").ok()?;
    let executed_at = ist()
        .from_local_datetime(&NaiveDateTime::new(today, time))
        .single()?
        .with_timezone(&Utc);
    Some(TradeRecord {
        order_id: row.order_no,
        symbol: row.tsym,
        exchange,
        side,
        quantity: row.filled_qty.trim().parse().ok()?,
        price: dec_field(&row.price),
        executed_at,
    })
}

fn resolution_param(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Minute => "1",
        Timeframe::Minute3 => "3",
        Timeframe::Minute5 => "5",
        Timeframe::Minute10 => "10",
        Timeframe::Minute15 => "15",
        Timeframe::Minute30 => "30",
        Timeframe::Hour => "60",
        Timeframe::Day => "D",
    }
}

fn order_type_param(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MKT",
        OrderType::Limit => "L",
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
impl BrokerAdapter for AliceBlueBroker {
    fn id(&self) -> BrokerId {
        BrokerId::AliceBlue
    }

    fn name(&self) -> &str {
        "Alice Blue"
    }

    async fn connect(&self, credentials: &Credentials) -> Result<UserProfile, BrokerError> {
        let Credentials::ApiKey {
            api_key: user_id,
            api_secret: api_key,
        } = credentials
        else {
            return Err(BrokerError::Authentication(
                "Alice Blue requires a user id and API key".into(),
            ));
        };

        let resp = self
            .client
            .post(format!("{}/customer/getAPIEncpkey", self.base_url))
            .json(&serde_json::json!({ "userId": user_id }))
            .send()
            .await
            .map_err(transport_error)?;
        let enc: EncKeyResponse = Self::decode(resp).await.map_err(|e| match e {
            BrokerError::Api(message) => BrokerError::Authentication(message),
            other => other,
        })?;

        let digest = session_digest(user_id, api_key, &enc.enc_key);
        let resp = self
            .client
            .post(format!("{}/customer/getUserSID", self.base_url))
            .json(&serde_json::json!({ "userId": user_id, "userData": digest }))
            .send()
            .await
            .map_err(transport_error)?;
        let session: SessionResponse = Self::decode(resp).await.map_err(|e| match e {
            BrokerError::Api(message) => BrokerError::Authentication(message),
            other => other,
        })?;

        *self.auth.write().unwrap() = Some(AliceAuth {
            user_id: user_id.clone(),
            session_id: session.session_id,
        });

        let details: AccountDetails = self.get_secure("/customer/accountDetails").await?;
        info!(account = %details.account_id, "alice blue session established");

        Ok(UserProfile {
            user_id: details.account_id,
            user_name: details.account_name,
            email: details.email,
        })
    }

    async fn disconnect(&self) {
        *self.auth.write().unwrap() = None;
        *self.instruments.write().await = None;
    }

    fn is_connected(&self) -> bool {
        self.auth.read().unwrap().is_some()
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

        let span_secs = (timeframe.as_secs() * bars as u64).max(86_400) * 3;
        let to = Utc::now();
        let from = to - Duration::seconds(span_secs as i64);

        let history: ChartHistory = self
            .post_secure(
                "/chart/history",
                &serde_json::json!({
                    "token": instrument.instrument_token.to_string(),
                    "exchange": instrument.exchange.to_string(),
                    "resolution": resolution_param(timeframe),
                    "from": from.timestamp().to_string(),
                    "to": to.timestamp().to_string(),
                }),
            )
            .await?;

        let mut out: Vec<Bar> = history
            .result
            .into_iter()
            .map(|c| Bar::new(c.time * 1000, c.open, c.high, c.low, c.close, c.volume))
            .collect();
        out.sort_by_key(|b| b.timestamp);
        if out.len() > bars {
            out.drain(..out.len() - bars);
        }
        Ok(out)
    }

    async fn get_quote(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        let bars = self.get_historical_data(symbol, Timeframe::Minute, 1).await?;
        bars.last()
            .map(|b| Decimal::try_from(b.close).unwrap_or_default())
            .ok_or_else(|| BrokerError::Api(format!("no quote available for {}", symbol)))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError> {
        if request.quantity == 0 {
            return Err(BrokerError::Validation("quantity must be positive".into()));
        }
        let instrument = self.resolve(&request.symbol).await?;

        // the endpoint takes a batch; we submit one order at a time
        let payload = serde_json::json!([{
            "complexty": "regular",
            "discqty": "0",
            "exch": request.exchange.to_string(),
            "pCode": product_param(request.product),
            "prctyp": order_type_param(request.order_type),
            "price": request.price.unwrap_or_default().to_string(),
            "qty": request.quantity,
            "ret": "DAY",
            "symbol_id": instrument.instrument_token.to_string(),
            "trading_symbol": request.symbol,
            "transtype": match request.side {
                Side::Buy => "BUY",
                Side::Sell => "SELL",
            },
            "trigPrice": request.trigger_price.unwrap_or_default().to_string(),
            "orderTag": request.tag.clone().unwrap_or_default(),
        }]);

        debug!(symbol = %request.symbol, side = %request.side, qty = request.quantity,
               "submitting alice blue order");
        let receipts: Vec<OrderReceiptRow> = self
            .post_secure("/placeOrder/executePlaceOrder", &payload)
            .await
            .map_err(|e| match e {
                BrokerError::Api(message) => BrokerError::OrderRejected(message),
                other => other,
            })?;

        let order_id = receipts
            .into_iter()
            .find_map(|r| r.order_no)
            .ok_or_else(|| BrokerError::Api("order response missing order number".into()))?;
        info!(order_id = %order_id, symbol = %request.symbol, "alice blue order accepted");
        Ok(order_id)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let rows: Vec<AlicePositionRow> = match self
            .post_secure(
                "/positionAndHoldings/positionBook",
                &serde_json::json!({ "ret": "NET" }),
            )
            .await
        {
            Ok(rows) => rows,
            // an empty book comes back as Not_Ok with a "no data" message
            Err(BrokerError::Api(message)) if message.to_lowercase().contains("no data") => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };
        Ok(rows
            .into_iter()
            .filter_map(parse_position)
            .filter(|p| !p.is_flat())
            .collect())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError> {
        let rows: Vec<RmsLimitRow> = self.get_secure("/limits/getRmsLimits").await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::Api("empty RMS limits response".into()))?;
        let cash = dec_field(&row.cashmarginavailable);
        let used = dec_field(&row.debits);
        Ok(AccountInfo {
            balance: cash,
            equity: dec_field(&row.net),
            margin_available: cash,
            margin_used: used,
            realized_pnl_today: Decimal::ZERO,
        })
    }

    async fn get_trades(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, BrokerError> {
        let rows: Vec<AliceTradeRow> = match self.get_secure("/placeOrder/fetchTradeBook").await {
            Ok(rows) => rows,
            Err(BrokerError::Api(message)) if message.to_lowercase().contains("no data") => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };
        Ok(rows
            .into_iter()
            .filter_map(parse_trade)
            .filter(|t| t.executed_at >= from && t.executed_at <= to)
            .collect())
    }
}
