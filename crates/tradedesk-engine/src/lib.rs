//! Bot engine: lifecycle controller, supervised trading loop, risk gate.

mod controller;
pub mod risk;
mod runner;

pub use controller::{BotController, BotPhase, BotStatus, BrokerView};
pub use risk::{RiskDecision, RiskGate};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tradedesk_brokers::{AdapterConfig, PaperBroker};
    use tradedesk_core::error::{BrokerError, ControllerError};
    use tradedesk_core::traits::{BrokerAdapter, Credentials, UserProfile};
    use tradedesk_core::types::{
        AccountInfo, Bar, BrokerId, Exchange, Instrument, InstrumentSelector, OrderRequest,
        Position, RiskParams, SessionWindow, Side, Timeframe, TradeRecord, TradingConfiguration,
    };
    use tradedesk_session::BrokerManager;
    use tradedesk_vault::CredentialVault;

    struct Harness {
        _dir: tempfile::TempDir,
        manager: Arc<BrokerManager>,
        controller: BotController,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::open(dir.path()).unwrap();
        let manager = Arc::new(BrokerManager::new(vault, AdapterConfig::default()));
        let controller =
            BotController::new(Arc::clone(&manager)).with_stop_timeout(Duration::from_secs(5));
        Harness {
            _dir: dir,
            manager,
            controller,
        }
    }

    async fn connect_paper(h: &Harness) -> Arc<PaperBroker> {
        let broker = Arc::new(PaperBroker::new(dec!(1000000)));
        h.manager
            .connect_adapter(broker.clone(), &Credentials::None, false)
            .await
            .unwrap();
        broker
    }

    fn config() -> TradingConfiguration {
        TradingConfiguration {
            broker: BrokerId::Paper,
            instruments: vec![InstrumentSelector::new("INFY", Exchange::NSE)],
            strategy: "ma_crossover".into(),
            strategy_params: serde_json::Value::Null,
            timeframe: Timeframe::Minute5,
            risk: RiskParams::default(),
            // always inside the trading window so tests run at any hour
            session: SessionWindow {
                start: chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                end: chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
            },
            poll_interval_ms: 20,
            paper_trading: true,
        }
    }

    fn infy() -> Instrument {
        Instrument::equity(408065, "INFY", "INFOSYS", Exchange::NSE)
    }

    fn test_account(equity: Decimal) -> AccountInfo {
        AccountInfo {
            balance: equity,
            equity,
            margin_available: equity,
            margin_used: Decimal::ZERO,
            realized_pnl_today: Decimal::ZERO,
        }
    }

    fn bars_from(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Bar::new(i as i64 * 300_000, *close, *close, *close, *close, 1000.0))
            .collect()
    }

    /// Serves a downtrend on the first history fetch and a reversal that
    /// crosses the averages on every later one, with the live quote pinned
    /// away from the bar closes. Orders are recorded, never filled.
    struct ScriptedBroker {
        quote: Decimal,
        history_calls: AtomicUsize,
        orders: Mutex<Vec<OrderRequest>>,
    }

    impl ScriptedBroker {
        fn new(quote: Decimal) -> Self {
            Self {
                quote,
                history_calls: AtomicUsize::new(0),
                orders: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrokerAdapter for ScriptedBroker {
        fn id(&self) -> BrokerId {
            BrokerId::Paper
        }

        fn name(&self) -> &str {
            "Scripted Feed"
        }

        async fn connect(&self, _credentials: &Credentials) -> Result<UserProfile, BrokerError> {
            Ok(UserProfile {
                user_id: "SCRIPT".into(),
                user_name: "Scripted Feed".into(),
                email: None,
            })
        }

        async fn disconnect(&self) {}

        fn is_connected(&self) -> bool {
            true
        }

        async fn get_instruments(&self) -> Result<Vec<Instrument>, BrokerError> {
            Ok(vec![infy()])
        }

        async fn get_instrument_info(
            &self,
            symbol: &str,
        ) -> Result<Option<Instrument>, BrokerError> {
            Ok((symbol == "INFY").then(infy))
        }

        async fn get_historical_data(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _bars: usize,
        ) -> Result<Vec<Bar>, BrokerError> {
            if self.history_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(bars_from(&(0..15).map(|i| 114.0 - i as f64).collect::<Vec<_>>()))
            } else {
                Ok(bars_from(&[
                    112.0, 111.0, 110.0, 109.0, 108.0, 107.0, 106.0, 105.0, 104.0, 103.0, 102.0,
                    101.0, 100.0, 110.0, 120.0,
                ]))
            }
        }

        async fn get_quote(&self, _symbol: &str) -> Result<Decimal, BrokerError> {
            Ok(self.quote)
        }

        async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError> {
            let mut orders = self.orders.lock().unwrap();
            orders.push(request.clone());
            Ok(format!("SCRIPT-{}", orders.len()))
        }

        async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
            Ok(Vec::new())
        }

        async fn get_account_info(&self) -> Result<AccountInfo, BrokerError> {
            Ok(test_account(dec!(1000000)))
        }

        async fn get_trades(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<TradeRecord>, BrokerError> {
            Ok(Vec::new())
        }
    }

    /// An adapter whose account fetch never resolves, pinning the loop
    /// mid-iteration. `entered` flips once the fetch has actually begun,
    /// so tests can wait until the loop is genuinely pinned.
    #[derive(Default)]
    struct StalledBroker {
        entered: AtomicBool,
    }

    #[async_trait]
    impl BrokerAdapter for StalledBroker {
        fn id(&self) -> BrokerId {
            BrokerId::Paper
        }

        fn name(&self) -> &str {
            "Stalled Feed"
        }

        async fn connect(&self, _credentials: &Credentials) -> Result<UserProfile, BrokerError> {
            Ok(UserProfile {
                user_id: "STALL".into(),
                user_name: "Stalled Feed".into(),
                email: None,
            })
        }

        async fn disconnect(&self) {}

        fn is_connected(&self) -> bool {
            true
        }

        async fn get_instruments(&self) -> Result<Vec<Instrument>, BrokerError> {
            Ok(vec![infy()])
        }

        async fn get_instrument_info(
            &self,
            symbol: &str,
        ) -> Result<Option<Instrument>, BrokerError> {
            Ok((symbol == "INFY").then(infy))
        }

        async fn get_historical_data(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _bars: usize,
        ) -> Result<Vec<Bar>, BrokerError> {
            Ok(Vec::new())
        }

        async fn get_quote(&self, _symbol: &str) -> Result<Decimal, BrokerError> {
            Ok(Decimal::ZERO)
        }

        async fn place_order(&self, _request: &OrderRequest) -> Result<String, BrokerError> {
            Ok(String::new())
        }

        async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
            Ok(Vec::new())
        }

        async fn get_account_info(&self) -> Result<AccountInfo, BrokerError> {
            self.entered.store(true, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn get_trades(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<TradeRecord>, BrokerError> {
            Ok(Vec::new())
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_start_requires_broker_session() {
        let h = harness();
        let err = h.controller.start(config()).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotConnected));
        assert_eq!(h.controller.get_status().phase, BotPhase::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_instrument_leaves_bot_stopped() {
        let h = harness();
        connect_paper(&h).await;

        let mut config = config();
        config.instruments = vec![InstrumentSelector::new("NOSUCH", Exchange::NSE)];
        let err = h.controller.start(config).await.unwrap_err();
        assert!(matches!(err, ControllerError::UnknownInstrument(s) if s == "NOSUCH"));

        let status = h.controller.get_status();
        assert!(!status.running);
        assert_eq!(status.phase, BotPhase::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_strategy_rejected() {
        let h = harness();
        connect_paper(&h).await;

        let mut config = config();
        config.strategy = "martingale".into();
        let err = h.controller.start(config).await.unwrap_err();
        assert!(matches!(err, ControllerError::Strategy(_)));
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let h = harness();
        connect_paper(&h).await;

        h.controller.start(config()).await.unwrap();
        let err = h.controller.start(config()).await.unwrap_err();
        assert!(matches!(err, ControllerError::AlreadyRunning));

        h.controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let h = harness();
        let err = h.controller.stop().await.unwrap_err();
        assert!(matches!(err, ControllerError::NotRunning));
    }

    #[tokio::test]
    async fn test_round_trip_preserves_positions() {
        let h = harness();
        let broker = connect_paper(&h).await;

        // an existing position the bot must not touch on stop
        broker.set_last_price("INFY", dec!(1500));
        broker
            .place_order(&OrderRequest::market("INFY", Exchange::NSE, Side::Buy, 10))
            .await
            .unwrap();

        h.controller.start(config()).await.unwrap();
        let status = h.controller.get_status();
        assert!(status.running);
        assert_eq!(status.broker, Some(BrokerId::Paper));
        assert_eq!(status.strategy.as_deref(), Some("ma_crossover"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        h.controller.stop().await.unwrap();

        let status = h.controller.get_status();
        assert!(!status.running);
        assert_eq!(status.phase, BotPhase::Stopped);
        assert_eq!(status.stop_reason.as_deref(), Some("stopped on request"));

        let positions = h.controller.get_positions().await.unwrap().ready().unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "INFY");
        assert_eq!(positions[0].quantity, 10);
    }

    #[tokio::test]
    async fn test_daily_loss_breaker_stops_loop() {
        let h = harness();
        let broker = connect_paper(&h).await;

        // ride 100 INFY down 700 points: 70k lost on a 1,000,000 book,
        // past the 5% default limit
        broker.set_last_price("INFY", dec!(1500));
        broker
            .place_order(&OrderRequest::market("INFY", Exchange::NSE, Side::Buy, 100))
            .await
            .unwrap();
        broker.set_last_price("INFY", dec!(800));

        h.controller.start(config()).await.unwrap();

        wait_until(|| {
            let status = h.controller.get_status();
            status.phase == BotPhase::Stopped
        })
        .await;

        let status = h.controller.get_status();
        assert!(!status.running);
        let reason = status.stop_reason.expect("breaker records a reason");
        assert!(reason.contains("daily loss"), "reason: {}", reason);

        // the loop stopped itself; a manual stop now reports not running
        let err = h.controller.stop().await.unwrap_err();
        assert!(matches!(err, ControllerError::NotRunning));

        // the losing position was not liquidated
        let positions = h.controller.get_positions().await.unwrap().ready().unwrap();
        assert_eq!(positions.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_reuses_recorded_config() {
        let h = harness();
        connect_paper(&h).await;

        let err = h.controller.restart().await.unwrap_err();
        assert!(matches!(err, ControllerError::NoConfiguration));

        h.controller.start(config()).await.unwrap();
        h.controller.restart().await.unwrap();
        assert!(h.controller.get_status().running);

        h.controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_queries_without_session_are_not_connected() {
        let h = harness();
        assert!(matches!(
            h.controller.get_positions().await.unwrap(),
            BrokerView::NotConnected
        ));
        assert!(matches!(
            h.controller.get_account_info().await.unwrap(),
            BrokerView::NotConnected
        ));
    }

    #[tokio::test]
    async fn test_close_position() {
        let h = harness();
        let broker = connect_paper(&h).await;

        broker.set_last_price("SBIN", dec!(600));
        broker
            .place_order(&OrderRequest::market("SBIN", Exchange::NSE, Side::Buy, 25))
            .await
            .unwrap();

        h.controller.close_position("SBIN").await.unwrap();
        let positions = h.controller.get_positions().await.unwrap().ready().unwrap();
        assert!(positions.iter().all(|p| p.symbol != "SBIN"));

        let err = h.controller.close_position("SBIN").await.unwrap_err();
        assert!(matches!(err, ControllerError::PositionNotFound(_)));
    }

    #[tokio::test]
    async fn test_entry_sized_off_live_quote() {
        let h = harness();
        let broker = Arc::new(ScriptedBroker::new(dec!(400)));
        h.manager
            .connect_adapter(broker.clone(), &Credentials::None, false)
            .await
            .unwrap();

        let mut config = config();
        config.strategy_params = serde_json::json!({
            "fast_period": 3,
            "slow_period": 6,
            "use_ema": false,
            "signal_threshold": 0.0,
        });
        h.controller.start(config).await.unwrap();

        wait_until(|| !broker.orders.lock().unwrap().is_empty()).await;
        h.controller.stop().await.unwrap();

        let orders = broker.orders.lock().unwrap();
        assert_eq!(orders[0].symbol, "INFY");
        assert_eq!(orders[0].side, Side::Buy);
        // 1% of 1,000,000 at the 400 quote is 25 shares; sizing off the
        // signal bar's 120 close would have produced 83
        assert_eq!(orders[0].quantity, 25);
    }

    #[tokio::test]
    async fn test_stop_timeout_leaves_loop_running() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::open(dir.path()).unwrap();
        let manager = Arc::new(BrokerManager::new(vault, AdapterConfig::default()));
        let controller = BotController::new(Arc::clone(&manager))
            .with_stop_timeout(Duration::from_millis(100));

        let stalled = Arc::new(StalledBroker::default());
        manager
            .connect_adapter(stalled.clone(), &Credentials::None, false)
            .await
            .unwrap();
        controller.start(config()).await.unwrap();
        wait_until(|| stalled.entered.load(Ordering::SeqCst)).await;

        let err = controller.stop().await.unwrap_err();
        assert!(matches!(err, ControllerError::StopTimedOut { .. }));

        let status = controller.get_status();
        assert_eq!(status.phase, BotPhase::Stopping);
        assert!(!status.running);

        // the handle was kept, so a later stop retries the join
        let err = controller.stop().await.unwrap_err();
        assert!(matches!(err, ControllerError::StopTimedOut { .. }));
    }

    #[tokio::test]
    async fn test_start_accepted_right_after_self_stop() {
        let h = harness();
        let broker = connect_paper(&h).await;

        broker.set_last_price("INFY", dec!(1500));
        broker
            .place_order(&OrderRequest::market("INFY", Exchange::NSE, Side::Buy, 100))
            .await
            .unwrap();
        broker.set_last_price("INFY", dec!(800));

        h.controller.start(config()).await.unwrap();
        wait_until(|| h.controller.get_status().phase == BotPhase::Stopped).await;

        // the task may still be returning when Stopped becomes visible;
        // a new start joins it instead of reporting AlreadyRunning
        h.controller.start(config()).await.unwrap();

        wait_until(|| h.controller.get_status().phase == BotPhase::Stopped).await;
    }

    #[tokio::test]
    async fn test_account_info_reflects_paper_ledger() {
        let h = harness();
        connect_paper(&h).await;
        let account = h.controller.get_account_info().await.unwrap().ready().unwrap();
        assert_eq!(account.balance, dec!(1000000));
    }
}
