//! Paper-trading adapter: an in-memory ledger with deterministic fills.
//!
//! Orders fill immediately at the last known price with no slippage, which
//! keeps strategy tests reproducible. The price feed is pushed in by the
//! caller (the trading loop, or a test) via [`PaperBroker::set_last_price`]
//! and [`PaperBroker::push_bar`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use tradedesk_core::error::BrokerError;
use tradedesk_core::traits::{BrokerAdapter, Credentials, UserProfile};
use tradedesk_core::types::{
    AccountInfo, Bar, BrokerId, Exchange, Instrument, InstrumentKind, OrderRequest, Position,
    Side, Timeframe, TradeRecord,
};

/// In-memory broker state. Guard is never held across an await.
struct Ledger {
    cash: Decimal,
    realized_pnl_today: Decimal,
    positions: HashMap<String, Position>,
    trades: Vec<TradeRecord>,
    prices: HashMap<String, Decimal>,
    bars: HashMap<String, VecDeque<Bar>>,
    instruments: HashMap<String, Instrument>,
}

impl Ledger {
    fn new(starting_balance: Decimal, instruments: HashMap<String, Instrument>) -> Self {
        Self {
            cash: starting_balance,
            realized_pnl_today: Decimal::ZERO,
            positions: HashMap::new(),
            trades: Vec::new(),
            prices: HashMap::new(),
            bars: HashMap::new(),
            instruments,
        }
    }

    fn market_value(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| Decimal::from(p.quantity) * p.last_price)
            .sum()
    }
}

/// Paper-trading simulator.
pub struct PaperBroker {
    starting_balance: Decimal,
    seed_instruments: HashMap<String, Instrument>,
    connected: AtomicBool,
    ledger: Mutex<Ledger>,
}

impl PaperBroker {
    /// Create a simulator that seeds its ledger with `starting_balance` on
    /// every connect. Ships with a small NSE/NFO instrument universe.
    pub fn new(starting_balance: Decimal) -> Self {
        let seed_instruments = default_universe();
        let ledger = Mutex::new(Ledger::new(starting_balance, seed_instruments.clone()));
        Self {
            starting_balance,
            seed_instruments,
            connected: AtomicBool::new(false),
            ledger,
        }
    }

    /// Replace the instrument universe.
    pub fn with_instruments(mut self, instruments: Vec<Instrument>) -> Self {
        self.seed_instruments = instruments
            .into_iter()
            .map(|i| (i.tradingsymbol.clone(), i))
            .collect();
        self.ledger = Mutex::new(Ledger::new(
            self.starting_balance,
            self.seed_instruments.clone(),
        ));
        self
    }

    /// Set the last traded price for a symbol and re-mark any open position.
    pub fn set_last_price(&self, symbol: &str, price: Decimal) {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.prices.insert(symbol.to_string(), price);
        if let Some(position) = ledger.positions.get_mut(symbol) {
            position.update_price(price);
        }
    }

    /// Append a bar to a symbol's history and track its close as the last
    /// traded price.
    pub fn push_bar(&self, symbol: &str, bar: Bar) {
        let close = Decimal::try_from(bar.close).unwrap_or_default();
        {
            let mut ledger = self.ledger.lock().unwrap();
            let history = ledger.bars.entry(symbol.to_string()).or_default();
            if history.len() >= 512 {
                history.pop_front();
            }
            history.push_back(bar);
        }
        self.set_last_price(symbol, close);
    }

    fn require_connected(&self) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    fn last_price(ledger: &Ledger, symbol: &str) -> Option<Decimal> {
        ledger.prices.get(symbol).copied().or_else(|| {
            ledger
                .bars
                .get(symbol)
                .and_then(|bars| bars.back())
                .and_then(|bar| Decimal::try_from(bar.close).ok())
        })
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    fn id(&self) -> BrokerId {
        BrokerId::Paper
    }

    fn name(&self) -> &str {
        "Paper Trading"
    }

    async fn connect(&self, _credentials: &Credentials) -> Result<UserProfile, BrokerError> {
        {
            let mut ledger = self.ledger.lock().unwrap();
            *ledger = Ledger::new(self.starting_balance, self.seed_instruments.clone());
        }
        self.connected.store(true, Ordering::SeqCst);
        debug!(balance = %self.starting_balance, "paper ledger seeded");

        Ok(UserProfile {
            user_id: "PAPER".into(),
            user_name: "Paper Trader".into(),
            email: None,
        })
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_instruments(&self) -> Result<Vec<Instrument>, BrokerError> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger.instruments.values().cloned().collect())
    }

    async fn get_instrument_info(&self, symbol: &str) -> Result<Option<Instrument>, BrokerError> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger.instruments.get(symbol).cloned())
    }

    async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        let ledger = self.ledger.lock().unwrap();
        if !ledger.instruments.contains_key(symbol) {
            return Err(BrokerError::SymbolNotFound(symbol.to_string()));
        }

        if let Some(history) = ledger.bars.get(symbol) {
            let start = history.len().saturating_sub(bars);
            return Ok(history.iter().skip(start).copied().collect());
        }

        // No recorded bars: synthesize a flat window at the last price so
        // strategies can warm up against a connected-but-quiet market.
        let Some(price) = Self::last_price(&ledger, symbol) else {
            return Ok(Vec::new());
        };
        let close: f64 = price.try_into().unwrap_or(0.0);
        let step = Duration::seconds(timeframe.as_secs() as i64);
        let end = Utc::now();
        Ok((0..bars)
            .map(|i| {
                let ts = end - step * ((bars - 1 - i) as i32);
                Bar::new(ts.timestamp_millis(), close, close, close, close, 0.0)
            })
            .collect())
    }

    async fn get_quote(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        self.require_connected()?;
        let ledger = self.ledger.lock().unwrap();
        if !ledger.instruments.contains_key(symbol) {
            return Err(BrokerError::SymbolNotFound(symbol.to_string()));
        }
        Self::last_price(&ledger, symbol)
            .ok_or_else(|| BrokerError::Api(format!("no market price for {}", symbol)))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError> {
        self.require_connected()?;
        if request.quantity == 0 {
            return Err(BrokerError::Validation(
                "quantity must be positive".to_string(),
            ));
        }

        let mut ledger = self.ledger.lock().unwrap();
        if !ledger.instruments.contains_key(&request.symbol) {
            return Err(BrokerError::SymbolNotFound(request.symbol.clone()));
        }
        let price = Self::last_price(&ledger, &request.symbol)
            .ok_or_else(|| BrokerError::Api(format!("no market price for {}", request.symbol)))?;

        let notional = price * Decimal::from(request.quantity);
        if request.side == Side::Buy && notional > ledger.cash {
            return Err(BrokerError::OrderRejected(format!(
                "insufficient funds: need {}, have {}",
                notional, ledger.cash
            )));
        }

        // Immediate fill at last price, no slippage.
        match request.side {
            Side::Buy => ledger.cash -= notional,
            Side::Sell => ledger.cash += notional,
        }

        let exchange = request.exchange;
        let position = ledger
            .positions
            .entry(request.symbol.clone())
            .or_insert_with(|| Position::open(&request.symbol, exchange, 0, price));
        let realized = position.apply_fill(request.side, request.quantity, price);
        let flat = position.is_flat();
        ledger.realized_pnl_today += realized;
        if flat {
            ledger.positions.remove(&request.symbol);
        }

        let order_id = Uuid::new_v4().to_string();
        let fill = TradeRecord {
            order_id: order_id.clone(),
            symbol: request.symbol.clone(),
            exchange,
            side: request.side,
            quantity: request.quantity,
            price,
            executed_at: Utc::now(),
        };
        debug!(order_id = %order_id, symbol = %fill.symbol, side = %fill.side,
               qty = fill.quantity, price = %price, "paper fill");
        ledger.trades.push(fill);

        Ok(order_id)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger.positions.values().cloned().collect())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError> {
        self.require_connected()?;
        let ledger = self.ledger.lock().unwrap();
        let equity = ledger.cash + ledger.market_value();
        Ok(AccountInfo {
            balance: ledger.cash,
            equity,
            margin_available: ledger.cash,
            margin_used: ledger.market_value().abs(),
            realized_pnl_today: ledger.realized_pnl_today,
        })
    }

    async fn get_trades(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, BrokerError> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger
            .trades
            .iter()
            .filter(|t| t.executed_at >= from && t.executed_at <= to)
            .cloned()
            .collect())
    }
}

fn default_universe() -> HashMap<String, Instrument> {
    let mut universe: Vec<Instrument> = vec![
        Instrument::equity(738561, "RELIANCE", "RELIANCE INDUSTRIES", Exchange::NSE),
        Instrument::equity(408065, "INFY", "INFOSYS", Exchange::NSE),
        Instrument::equity(2953217, "TCS", "TATA CONSULTANCY SERVICES", Exchange::NSE),
        Instrument::equity(341249, "HDFCBANK", "HDFC BANK", Exchange::NSE),
        Instrument::equity(779521, "SBIN", "STATE BANK OF INDIA", Exchange::NSE),
    ];
    let mut nifty_fut = Instrument::equity(13368834, "NIFTY25SEPFUT", "NIFTY", Exchange::NFO);
    nifty_fut.kind = InstrumentKind::FUT;
    nifty_fut.lot_size = 75;
    nifty_fut.tick_size = dec!(0.05);
    universe.push(nifty_fut);

    universe
        .into_iter()
        .map(|i| (i.tradingsymbol.clone(), i))
        .collect()
}
