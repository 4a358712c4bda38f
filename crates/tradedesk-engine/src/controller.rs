//! Bot lifecycle controller.
//!
//! One controller supervises at most one trading loop. Lifecycle
//! transitions (start/stop/restart) are serialized behind an async mutex;
//! status reads come from a shared snapshot behind a std RwLock so they
//! never wait on the loop or on broker IO.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tradedesk_core::error::{ControllerError, StrategyError};
use tradedesk_core::traits::Strategy;
use tradedesk_core::types::{
    AccountInfo, BrokerId, Instrument, OrderRequest, Position, TradeRecord, TradingConfiguration,
};
use tradedesk_session::BrokerManager;
use tradedesk_strategies::StrategyRegistry;

use crate::risk::RiskGate;
use crate::runner::{run_loop, CancelToken, LoopContext};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(15);

/// Lifecycle phase of the trading loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Point-in-time view of the bot, safe to poll at any frequency.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub running: bool,
    pub phase: BotPhase,
    pub uptime_secs: Option<u64>,
    pub broker: Option<BrokerId>,
    pub strategy: Option<String>,
    pub open_positions: usize,
    pub last_error: Option<String>,
    pub stop_reason: Option<String>,
}

/// Result of a broker-backed query: distinguishes "no broker session"
/// from a normal empty payload.
#[derive(Debug)]
pub enum BrokerView<T> {
    NotConnected,
    Ready(T),
}

impl<T> BrokerView<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            BrokerView::NotConnected => None,
            BrokerView::Ready(value) => Some(value),
        }
    }
}

struct RunState {
    phase: BotPhase,
    started_at: Option<DateTime<Utc>>,
    broker: Option<BrokerId>,
    strategy: Option<String>,
    open_positions: usize,
    last_error: Option<String>,
    stop_reason: Option<String>,
}

/// Snapshot shared between the controller and the running loop.
pub(crate) struct SharedState {
    inner: RwLock<RunState>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            inner: RwLock::new(RunState {
                phase: BotPhase::Stopped,
                started_at: None,
                broker: None,
                strategy: None,
                open_positions: 0,
                last_error: None,
                stop_reason: None,
            }),
        }
    }

    pub(crate) fn phase(&self) -> BotPhase {
        self.inner.read().unwrap().phase
    }

    fn set_phase(&self, phase: BotPhase) {
        self.inner.write().unwrap().phase = phase;
    }

    fn begin_run(&self, broker: BrokerId, strategy: String) {
        let mut state = self.inner.write().unwrap();
        state.phase = BotPhase::Running;
        state.started_at = Some(Utc::now());
        state.broker = Some(broker);
        state.strategy = Some(strategy);
        state.open_positions = 0;
        state.last_error = None;
        state.stop_reason = None;
    }

    pub(crate) fn record_error(&self, error: impl Into<String>) {
        self.inner.write().unwrap().last_error = Some(error.into());
    }

    pub(crate) fn set_open_positions(&self, count: usize) {
        self.inner.write().unwrap().open_positions = count;
    }

    /// Transition to Stopped. An existing stop reason (set by the loop
    /// itself) wins over the one supplied here.
    pub(crate) fn finish(&self, reason: impl Into<String>) {
        let mut state = self.inner.write().unwrap();
        state.phase = BotPhase::Stopped;
        if state.stop_reason.is_none() {
            state.stop_reason = Some(reason.into());
        }
    }

    fn snapshot(&self) -> BotStatus {
        let state = self.inner.read().unwrap();
        let uptime_secs = match (state.phase, state.started_at) {
            (BotPhase::Running | BotPhase::Stopping, Some(started_at)) => {
                Some((Utc::now() - started_at).num_seconds().max(0) as u64)
            }
            _ => None,
        };
        BotStatus {
            running: state.phase == BotPhase::Running,
            phase: state.phase,
            uptime_secs,
            broker: state.broker,
            strategy: state.strategy.clone(),
            open_positions: state.open_positions,
            last_error: state.last_error.clone(),
            stop_reason: state.stop_reason.clone(),
        }
    }
}

struct Lifecycle {
    config: Option<Arc<TradingConfiguration>>,
    handle: Option<JoinHandle<()>>,
    cancel: Option<Arc<CancelToken>>,
}

/// Supervises the trading loop against the broker manager's live session.
pub struct BotController {
    manager: Arc<BrokerManager>,
    registry: StrategyRegistry,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    state: Arc<SharedState>,
    stop_timeout: Duration,
}

impl BotController {
    pub fn new(manager: Arc<BrokerManager>) -> Self {
        Self {
            manager,
            registry: StrategyRegistry::new(),
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                config: None,
                handle: None,
                cancel: None,
            }),
            state: Arc::new(SharedState::new()),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Override the stop join timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn strategy_registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Start the trading loop with the given configuration.
    pub async fn start(&self, config: TradingConfiguration) -> Result<(), ControllerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.start_locked(&mut lifecycle, config).await
    }

    async fn start_locked(
        &self,
        lifecycle: &mut Lifecycle,
        config: TradingConfiguration,
    ) -> Result<(), ControllerError> {
        if let Some(handle) = lifecycle.handle.take() {
            if self.state.phase() == BotPhase::Stopped {
                // loop stopped itself; it publishes Stopped just before
                // returning, so this join is immediate
                let _ = handle.await;
                lifecycle.cancel = None;
            } else {
                lifecycle.handle = Some(handle);
                return Err(ControllerError::AlreadyRunning);
            }
        }

        config.validate()?;

        let adapter = self
            .manager
            .adapter()
            .map_err(|_| ControllerError::NotConnected)?;
        if !self.registry.contains(&config.strategy) {
            return Err(StrategyError::NotFound(config.strategy.clone()).into());
        }

        // every configured symbol must resolve against the live adapter;
        // the first unresolved one names the error
        let mut instruments: HashMap<String, Instrument> = HashMap::new();
        for selector in &config.instruments {
            let instrument = adapter
                .get_instrument_info(&selector.symbol)
                .await?
                .ok_or_else(|| ControllerError::UnknownInstrument(selector.symbol.clone()))?;
            instruments.insert(selector.symbol.clone(), instrument);
        }

        let mut strategies: HashMap<String, Box<dyn Strategy>> = HashMap::new();
        for symbol in instruments.keys() {
            strategies.insert(
                symbol.clone(),
                self.registry.create(&config.strategy, &config.strategy_params)?,
            );
        }

        self.state.set_phase(BotPhase::Starting);

        let config = Arc::new(config);
        let cancel = Arc::new(CancelToken::new());
        let context = LoopContext {
            config: Arc::clone(&config),
            adapter,
            instruments,
            strategies,
            gate: RiskGate::new(config.risk.clone()),
            state: Arc::clone(&self.state),
            cancel: Arc::clone(&cancel),
        };
        // publish Running before the task spawns so a fast self-stop
        // (breaker on the first iteration) is never overwritten
        self.state.begin_run(config.broker, config.strategy.clone());
        let handle = tokio::spawn(run_loop(context));
        info!(broker = %config.broker, strategy = %config.strategy,
              instruments = config.instruments.len(), "bot started");

        lifecycle.config = Some(config);
        lifecycle.handle = Some(handle);
        lifecycle.cancel = Some(cancel);
        Ok(())
    }

    /// Stop the trading loop. Open positions are left as they are.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle) -> Result<(), ControllerError> {
        let Some(mut handle) = lifecycle.handle.take() else {
            return Err(ControllerError::NotRunning);
        };

        if self.state.phase() == BotPhase::Stopped {
            // loop already stopped itself (daily-loss breaker)
            let _ = handle.await;
            lifecycle.cancel = None;
            return Err(ControllerError::NotRunning);
        }

        self.state.set_phase(BotPhase::Stopping);
        if let Some(cancel) = &lifecycle.cancel {
            cancel.cancel();
        }

        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(_) => {
                lifecycle.cancel = None;
                self.state.finish("stopped on request");
                info!("bot stopped");
                Ok(())
            }
            Err(_) => {
                // never abort mid-iteration; keep the handle so a later
                // stop can rejoin the task
                warn!(waited_secs = self.stop_timeout.as_secs(), "stop timed out");
                lifecycle.handle = Some(handle);
                Err(ControllerError::StopTimedOut {
                    waited_secs: self.stop_timeout.as_secs(),
                })
            }
        }
    }

    /// Stop (if running) and start again with the previously recorded
    /// configuration. Instruments are re-resolved against the live
    /// adapter, since broker instrument dumps change across sessions.
    pub async fn restart(&self) -> Result<(), ControllerError> {
        let mut lifecycle = self.lifecycle.lock().await;

        match self.stop_locked(&mut lifecycle).await {
            Ok(()) | Err(ControllerError::NotRunning) => {}
            Err(e) => return Err(e),
        }

        let config = lifecycle
            .config
            .clone()
            .ok_or(ControllerError::NoConfiguration)?;
        self.start_locked(&mut lifecycle, (*config).clone()).await
    }

    pub fn get_status(&self) -> BotStatus {
        self.state.snapshot()
    }

    pub async fn get_positions(&self) -> Result<BrokerView<Vec<Position>>, ControllerError> {
        let Some(session) = self.manager.active() else {
            return Ok(BrokerView::NotConnected);
        };
        Ok(BrokerView::Ready(session.adapter.get_positions().await?))
    }

    pub async fn get_account_info(&self) -> Result<BrokerView<AccountInfo>, ControllerError> {
        let Some(session) = self.manager.active() else {
            return Ok(BrokerView::NotConnected);
        };
        Ok(BrokerView::Ready(session.adapter.get_account_info().await?))
    }

    pub async fn get_trades(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BrokerView<Vec<TradeRecord>>, ControllerError> {
        let Some(session) = self.manager.active() else {
            return Ok(BrokerView::NotConnected);
        };
        Ok(BrokerView::Ready(session.adapter.get_trades(from, to).await?))
    }

    /// Flatten one open position with an offsetting market order.
    pub async fn close_position(&self, symbol: &str) -> Result<String, ControllerError> {
        let adapter = self
            .manager
            .adapter()
            .map_err(|_| ControllerError::NotConnected)?;

        let positions = adapter.get_positions().await?;
        let position = positions
            .iter()
            .find(|p| p.symbol == symbol && !p.is_flat())
            .ok_or_else(|| ControllerError::PositionNotFound(symbol.to_string()))?;

        let order = OrderRequest::market(
            &position.symbol,
            position.exchange,
            position.side().opposite(),
            position.abs_quantity(),
        );
        let order_id = adapter.place_order(&order).await?;
        info!(%symbol, order_id, "position closed");
        Ok(order_id)
    }
}
