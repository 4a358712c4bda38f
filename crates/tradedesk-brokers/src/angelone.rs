//! Angel One SmartAPI adapter.
//!
//! Login is client code + password + TOTP, yielding a JWT used as a Bearer
//! token. SmartAPI returns most numeric fields as strings and wraps
//! everything in `{status: bool, message, errorcode, data}`. The scrip
//! master is a flat JSON file served off the margin-calculator host.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
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

const DEFAULT_BASE_URL: &str = "https://apiconnect.angelone.in";
const DEFAULT_SCRIP_MASTER_URL: &str =
    "https://margincalculator.angelbroking.com/OpenAPI_File/files/OpenAPIScripMaster.json";

fn ist() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 1800).unwrap()
}

struct AngelAuth {
    api_key: String,
    jwt: String,
}

/// Angel One SmartAPI adapter.
pub struct AngelOneBroker {
    client: Client,
    base_url: String,
    scrip_master_url: String,
    auth: RwLock<Option<AngelAuth>>,
    instruments: tokio::sync::RwLock<Option<Arc<HashMap<String, Instrument>>>>,
}

impl Default for AngelOneBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl AngelOneBroker {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            scrip_master_url: DEFAULT_SCRIP_MASTER_URL.to_string(),
            auth: RwLock::new(None),
            instruments: tokio::sync::RwLock::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_scrip_master_url(mut self, url: impl Into<String>) -> Self {
        self.scrip_master_url = url.into();
        self
    }

    fn headers(
        &self,
        builder: reqwest::RequestBuilder,
        api_key: &str,
        jwt: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut builder = builder
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("X-UserType", "USER")
            .header("X-SourceID", "WEB")
            .header("X-ClientLocalIP", "127.0.0.1")
            .header("X-ClientPublicIP", "127.0.0.1")
            .header("X-MACAddress", "00:00:00:00:00:00")
            .header("X-PrivateKey", api_key);
        if let Some(jwt) = jwt {
            builder = builder.header("Authorization", format!("Bearer {}", jwt));
        }
        builder
    }

    fn auth_parts(&self) -> Result<(String, String), BrokerError> {
        let guard = self.auth.read().unwrap();
        let auth = guard.as_ref().ok_or(BrokerError::NotConnected)?;
        Ok((auth.api_key.clone(), auth.jwt.clone()))
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, BrokerError> {
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &extract_message(&body)));
        }
        let envelope: AngelEnvelope<T> = serde_json::from_str(&body)
            .map_err(|e| BrokerError::Api(format!("malformed response: {}", e)))?;
        if !envelope.status {
            let message = envelope.message.unwrap_or_else(|| "request failed".into());
            // AG8001/AG8002 are the invalid/expired token codes
            if envelope
                .errorcode
                .as_deref()
                .is_some_and(|c| c.starts_with("AG80"))
            {
                return Err(BrokerError::TokenExpired);
            }
            return Err(BrokerError::Api(message));
        }
        envelope
            .data
            .ok_or_else(|| BrokerError::Api("empty response".into()))
    }

    async fn get_secure<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, BrokerError> {
        let (api_key, jwt) = self.auth_parts()?;
        let builder = self.client.get(format!("{}{}", self.base_url, path));
        let resp = self
            .headers(builder, &api_key, Some(&jwt))
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
        let (api_key, jwt) = self.auth_parts()?;
        let builder = self.client.post(format!("{}{}", self.base_url, path));
        let resp = self
            .headers(builder, &api_key, Some(&jwt))
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

        let resp = self
            .client
            .get(&self.scrip_master_url)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, "scrip master unavailable"));
        }
        let rows: Vec<ScripRow> = resp.json().await.map_err(transport_error)?;

        let map: HashMap<String, Instrument> = rows
            .into_iter()
            .filter_map(normalize_scrip)
            .map(|i| (i.tradingsymbol.clone(), i))
            .collect();
        info!(count = map.len(), "angel one scrip master loaded");
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
struct AngelEnvelope<T> {
    status: bool,
    message: Option<String>,
    errorcode: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AngelSession {
    #[serde(rename = "jwtToken")]
    jwt_token: String,
}

#[derive(Debug, Deserialize)]
struct AngelProfile {
    clientcode: String,
    name: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AngelRms {
    net: String,
    availablecash: String,
    utiliseddebits: String,
    #[serde(default)]
    m2mrealized: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AngelPositionRow {
    tradingsymbol: String,
    exchange: String,
    netqty: String,
    avgnetprice: String,
    ltp: String,
    #[serde(default)]
    realised: Option<String>,
    #[serde(default)]
    unrealised: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AngelOrderReceipt {
    orderid: String,
}

#[derive(Debug, Deserialize)]
struct AngelTradeRow {
    orderid: String,
    tradingsymbol: String,
    exchange: String,
    transactiontype: String,
    fillsize: String,
    fillprice: String,
    filltime: String,
}

/// Scrip master row. Strike and tick size are quoted in paise.
#[derive(Debug, Deserialize)]
struct ScripRow {
    token: String,
    symbol: String,
    name: String,
    #[serde(default)]
    expiry: String,
    #[serde(default)]
    strike: String,
    #[serde(default)]
    lotsize: String,
    #[serde(default)]
    instrumenttype: String,
    exch_seg: String,
    #[serde(default)]
    tick_size: String,
}

fn dec_field(s: &str) -> Decimal {
    Decimal::from_str(s.trim()).unwrap_or_default()
}

fn normalize_scrip(row: ScripRow) -> Option<Instrument> {
    let exchange = Exchange::from_str(&row.exch_seg).ok()?;
    // equities carry an empty instrumenttype and a "-EQ" series suffix
    let kind = if row.instrumenttype.is_empty() {
        InstrumentKind::EQ
    } else if row.instrumenttype.starts_with("FUT") {
        InstrumentKind::FUT
    } else if row.instrumenttype.starts_with("OPT") {
        if row.symbol.ends_with("CE") {
            InstrumentKind::CE
        } else {
            InstrumentKind::PE
        }
    } else {
        return None;
    };

    let token: u32 = row.token.parse().ok()?;
    let tradingsymbol = row
        .symbol
        .strip_suffix("-EQ")
        .unwrap_or(&row.symbol)
        .to_string();
    let expiry = NaiveDate::parse_from_str(&row.expiry, "%d%b%Y").ok();
    let strike = dec_field(&row.strike) / Decimal::from(100);

    Some(Instrument {
        instrument_token: token,
        exchange_token: token,
        tradingsymbol,
        name: row.name,
        exchange,
        kind,
        tick_size: dec_field(&row.tick_size) / Decimal::from(100),
        lot_size: row.lotsize.parse().unwrap_or(1),
        expiry,
        // equities carry 0 or -1 here
        strike: (strike > Decimal::ZERO).then_some(strike),
    })
}

fn parse_position(row: AngelPositionRow) -> Option<Position> {
    let exchange = Exchange::from_str(&row.exchange).ok()?;
    let quantity: i64 = row.netqty.trim().parse().ok()?;
    let mut position = Position::open(
        row.tradingsymbol,
        exchange,
        quantity,
        dec_field(&row.avgnetprice),
    );
    position.realized_pnl = row.realised.as_deref().map(dec_field).unwrap_or_default();
    position.update_price(dec_field(&row.ltp));
    if let Some(unrealised) = row.unrealised.as_deref() {
        position.unrealized_pnl = dec_field(unrealised);
    }
    Some(position)
}

fn parse_trade(row: AngelTradeRow) -> Option<TradeRecord> {
    let exchange = Exchange::from_str(&row.exchange).ok()?;
    let side = match row.transactiontype.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        _ => return None,
    };
    // trade book carries time-of-day only
    let today = Utc::now().with_timezone(&ist()).date_naive();
    let time = chrono::NaiveTime::parse_from_str(&row.filltime, "%H:%M:%S").ok()?;
    let executed_at = ist()
        .from_local_datetime(&NaiveDateTime::new(today, time))
        .single()?
        .with_timezone(&Utc);
    Some(TradeRecord {
        order_id: row.orderid,
        symbol: row.tradingsymbol,
        exchange,
        side,
        quantity: row.fillsize.trim().parse().ok()?,
        price: dec_field(&row.fillprice),
        executed_at,
    })
}

fn interval_param(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Minute => "ONE_MINUTE",
        Timeframe::Minute3 => "THREE_MINUTE",
        Timeframe::Minute5 => "FIVE_MINUTE",
        Timeframe::Minute10 => "TEN_MINUTE",
        Timeframe::Minute15 => "FIFTEEN_MINUTE",
        Timeframe::Minute30 => "THIRTY_MINUTE",
        Timeframe::Hour => "ONE_HOUR",
        Timeframe::Day => "ONE_DAY",
    }
}

fn order_type_param(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::Sl => "STOPLOSS_LIMIT",
        OrderType::SlM => "STOPLOSS_MARKET",
    }
}

fn product_param(product: Product) -> &'static str {
    match product {
        Product::Mis => "INTRADAY",
        Product::Cnc => "DELIVERY",
        Product::Nrml => "CARRYFORWARD",
    }
}

fn parse_candle(value: &serde_json::Value) -> Option<Bar> {
    let row = value.as_array()?;
    let ts = DateTime::parse_from_rfc3339(row.first()?.as_str()?).ok()?;
    Some(Bar::new(
        ts.timestamp_millis(),
        row.get(1)?.as_f64()?,
        row.get(2)?.as_f64()?,
        row.get(3)?.as_f64()?,
        row.get(4)?.as_f64()?,
        row.get(5)?.as_f64()?,
    ))
}

#[async_trait]
impl BrokerAdapter for AngelOneBroker {
    fn id(&self) -> BrokerId {
        BrokerId::AngelOne
    }

    fn name(&self) -> &str {
        "Angel One"
    }

    async fn connect(&self, credentials: &Credentials) -> Result<UserProfile, BrokerError> {
        let Credentials::Totp {
            api_key,
            client_code,
            password,
            totp,
        } = credentials
        else {
            return Err(BrokerError::Authentication(
                "Angel One requires client code, password and TOTP".into(),
            ));
        };

        let builder = self.client.post(format!(
            "{}/rest/auth/angelbroking/user/v1/loginByPassword",
            self.base_url
        ));
        let resp = self
            .headers(builder, api_key, None)
            .json(&serde_json::json!({
                "clientcode": client_code,
                "password": password,
                "totp": totp,
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let session: AngelSession = Self::decode(resp).await.map_err(|e| match e {
            BrokerError::Api(message) => BrokerError::Authentication(message),
            other => other,
        })?;

        *self.auth.write().unwrap() = Some(AngelAuth {
            api_key: api_key.clone(),
            jwt: session.jwt_token,
        });

        let profile: AngelProfile = self
            .get_secure("/rest/secure/angelbroking/user/v1/getProfile")
            .await?;
        info!(client = %profile.clientcode, "angel one session established");

        Ok(UserProfile {
            user_id: profile.clientcode,
            user_name: profile.name,
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
        let to = Utc::now().with_timezone(&ist());
        let from = to - Duration::seconds(span_secs as i64);
        let fmt = "%Y-%m-%d %H:%M";

        let candles: Vec<serde_json::Value> = self
            .post_secure(
                "/rest/secure/angelbroking/historical/v1/getCandleData",
                &serde_json::json!({
                    "exchange": instrument.exchange.to_string(),
                    "symboltoken": instrument.instrument_token.to_string(),
                    "interval": interval_param(timeframe),
                    "fromdate": from.format(fmt).to_string(),
                    "todate": to.format(fmt).to_string(),
                }),
            )
            .await?;

        let mut out: Vec<Bar> = candles.iter().filter_map(parse_candle).collect();
        if out.len() > bars {
            out.drain(..out.len() - bars);
        }
        Ok(out)
    }

    async fn get_quote(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        // SmartAPI has no standalone LTP call worth a second codepath; the
        // latest minute candle close serves as the quote
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

        let payload = serde_json::json!({
            "variety": "NORMAL",
            "tradingsymbol": request.symbol,
            "symboltoken": instrument.instrument_token.to_string(),
            "transactiontype": match request.side {
                Side::Buy => "BUY",
                Side::Sell => "SELL",
            },
            "exchange": request.exchange.to_string(),
            "ordertype": order_type_param(request.order_type),
            "producttype": product_param(request.product),
            "duration": "DAY",
            "price": request.price.unwrap_or_default().to_string(),
            "triggerprice": request.trigger_price.unwrap_or_default().to_string(),
            "quantity": request.quantity.to_string(),
        });

        debug!(symbol = %request.symbol, side = %request.side, qty = request.quantity,
               "submitting angel one order");
        let receipt: AngelOrderReceipt = self
            .post_secure("/rest/secure/angelbroking/order/v1/placeOrder", &payload)
            .await
            .map_err(|e| match e {
                BrokerError::Api(message) => BrokerError::OrderRejected(message),
                other => other,
            })?;
        info!(order_id = %receipt.orderid, symbol = %request.symbol, "angel one order accepted");
        Ok(receipt.orderid)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let rows: Vec<AngelPositionRow> = match self
            .get_secure("/rest/secure/angelbroking/order/v1/getPosition")
            .await
        {
            Ok(rows) => rows,
            // SmartAPI reports an empty book as "no data" instead of []
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
        let rms: AngelRms = self
            .get_secure("/rest/secure/angelbroking/user/v1/getRMS")
            .await?;
        let cash = dec_field(&rms.availablecash);
        let used = dec_field(&rms.utiliseddebits);
        Ok(AccountInfo {
            balance: cash,
            equity: dec_field(&rms.net),
            margin_available: cash,
            margin_used: used,
            realized_pnl_today: rms.m2mrealized.as_deref().map(dec_field).unwrap_or_default(),
        })
    }

    async fn get_trades(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, BrokerError> {
        let rows: Vec<AngelTradeRow> = match self
            .get_secure("/rest/secure/angelbroking/order/v1/getTradeBook")
            .await
        {
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_equity_scrip() {
        let row: ScripRow = serde_json::from_str(
            r#"{
                "token": "1594",
                "symbol": "INFY-EQ",
                "name": "INFY",
                "expiry": "",
                "strike": "-1.000000",
                "lotsize": "1",
                "instrumenttype": "",
                "exch_seg": "NSE",
                "tick_size": "5.000000"
            }"#,
        )
        .unwrap();
        let instrument = normalize_scrip(row).unwrap();
        assert_eq!(instrument.tradingsymbol, "INFY");
        assert_eq!(instrument.kind, InstrumentKind::EQ);
        assert_eq!(instrument.tick_size, dec!(0.05));
        assert!(instrument.strike.is_none());
    }

    #[test]
    fn test_normalize_option_scrip() {
        let row: ScripRow = serde_json::from_str(
            r#"{
                "token": "43566",
                "symbol": "NIFTY25SEP24500CE",
                "name": "NIFTY",
                "expiry": "25SEP2025",
                "strike": "2450000.000000",
                "lotsize": "75",
                "instrumenttype": "OPTIDX",
                "exch_seg": "NFO",
                "tick_size": "5.000000"
            }"#,
        )
        .unwrap();
        let instrument = normalize_scrip(row).unwrap();
        assert_eq!(instrument.kind, InstrumentKind::CE);
        assert_eq!(instrument.strike, Some(dec!(24500)));
        assert_eq!(instrument.lot_size, 75);
        assert_eq!(instrument.expiry, NaiveDate::from_ymd_opt(2025, 9, 25));
    }

    #[test]
    fn test_parse_position_strings() {
        let row: AngelPositionRow = serde_json::from_str(
            r#"{
                "tradingsymbol": "SBIN-EQ",
                "exchange": "NSE",
                "netqty": "-25",
                "avgnetprice": "612.40",
                "ltp": "610.00",
                "realised": "0.00",
                "unrealised": "60.00"
            }"#,
        )
        .unwrap();
        let position = parse_position(row).unwrap();
        assert!(position.is_short());
        assert_eq!(position.avg_entry_price, dec!(612.40));
        assert_eq!(position.unrealized_pnl, dec!(60.00));
    }

    #[test]
    fn test_interval_mapping() {
        assert_eq!(interval_param(Timeframe::Minute5), "FIVE_MINUTE");
        assert_eq!(interval_param(Timeframe::Day), "ONE_DAY");
    }

    #[tokio::test]
    async fn test_requires_totp_credentials() {
        let broker = AngelOneBroker::new();
        let err = broker
            .connect(&Credentials::ApiKey {
                api_key: "k".into(),
                api_secret: "s".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Authentication(_)));
    }
}
