//! The supervised trading loop.
//!
//! One spawned task per bot run. Every iteration: account and position
//! refresh, daily-loss breaker, then per-instrument bar fetch, strategy
//! evaluation and risk-gated order placement. Adapter and strategy errors
//! inside an iteration are recorded and retried next tick; only the
//! breaker and the cancel token end the loop.

use chrono::{FixedOffset, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use tradedesk_core::traits::{BrokerAdapter, Strategy};
use tradedesk_core::types::{
    AccountInfo, BarSeries, Instrument, OrderRequest, Position, Signal, TradingConfiguration,
};

use crate::controller::SharedState;
use crate::risk::{RiskDecision, RiskGate};

/// Cooperative cancellation: a flag the loop polls plus a notifier that
/// cuts its sleep short.
pub(crate) struct CancelToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

pub(crate) struct LoopContext {
    pub config: Arc<TradingConfiguration>,
    pub adapter: Arc<dyn BrokerAdapter>,
    pub instruments: HashMap<String, Instrument>,
    pub strategies: HashMap<String, Box<dyn Strategy>>,
    pub gate: RiskGate,
    pub state: Arc<SharedState>,
    pub cancel: Arc<CancelToken>,
}

fn ist() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 1800).unwrap()
}

pub(crate) async fn run_loop(mut ctx: LoopContext) {
    let poll = Duration::from_millis(ctx.config.poll_interval_ms);
    let mut series: HashMap<String, BarSeries> = ctx
        .instruments
        .keys()
        .map(|symbol| {
            (
                symbol.clone(),
                BarSeries::new(symbol.clone(), ctx.config.timeframe),
            )
        })
        .collect();

    info!(symbols = ?ctx.instruments.keys().collect::<Vec<_>>(), "trading loop started");

    loop {
        if ctx.cancel.is_cancelled() {
            debug!("trading loop cancelled");
            break;
        }

        if !iteration(&mut ctx, &mut series).await {
            break;
        }

        tokio::select! {
            _ = ctx.cancel.notified() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// One loop pass. Returns false when the loop must end itself.
async fn iteration(ctx: &mut LoopContext, series: &mut HashMap<String, BarSeries>) -> bool {
    let account = match ctx.adapter.get_account_info().await {
        Ok(account) => account,
        Err(e) => {
            warn!(error = %e, "account fetch failed, retrying next tick");
            ctx.state.record_error(e.to_string());
            return true;
        }
    };
    let positions = match ctx.adapter.get_positions().await {
        Ok(positions) => positions,
        Err(e) => {
            warn!(error = %e, "position fetch failed, retrying next tick");
            ctx.state.record_error(e.to_string());
            return true;
        }
    };
    ctx.state.set_open_positions(positions.len());

    // the breaker runs before any evaluation so a breached book never
    // places another order
    if let Some(loss) = ctx.gate.daily_loss_breached(&account, &positions) {
        let reason = format!("daily loss limit breached: down {}", loss.round_dp(2));
        warn!(%loss, "stopping: {}", reason);
        ctx.state.finish(reason);
        return false;
    }

    let now = Utc::now().with_timezone(&ist()).time();
    if !ctx.config.session.contains(now) {
        debug!("outside trading hours, holding");
        return true;
    }

    let symbols: Vec<String> = ctx.instruments.keys().cloned().collect();
    for symbol in symbols {
        if ctx.cancel.is_cancelled() {
            return true;
        }
        evaluate_symbol(ctx, series, &symbol, &account, &positions).await;
    }
    true
}

async fn evaluate_symbol(
    ctx: &mut LoopContext,
    series: &mut HashMap<String, BarSeries>,
    symbol: &str,
    account: &AccountInfo,
    positions: &[Position],
) {
    let (Some(strategy), Some(instrument), Some(series)) = (
        ctx.strategies.get_mut(symbol),
        ctx.instruments.get(symbol),
        series.get_mut(symbol),
    ) else {
        return;
    };

    let wanted = strategy.warmup_period() + 8;
    match ctx
        .adapter
        .get_historical_data(symbol, ctx.config.timeframe, wanted)
        .await
    {
        Ok(bars) => series.replace(bars),
        Err(e) => {
            warn!(%symbol, error = %e, "bar fetch failed");
            ctx.state.record_error(format!("{}: {}", symbol, e));
            return;
        }
    }
    if series.len() < strategy.warmup_period() {
        debug!(%symbol, have = series.len(), need = strategy.warmup_period(), "warming up");
        return;
    }

    let Some(signal) = strategy.on_bar(series) else {
        return;
    };
    info!(%symbol, kind = ?signal.kind, price = signal.price, reason = %signal.reason, "signal");

    let order = if signal.kind.is_entry() {
        // entries are sized off the live quote; the signal bar's close can
        // be up to a poll interval stale
        let price = match ctx.adapter.get_quote(symbol).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(%symbol, error = %e, "quote fetch failed, pricing off the signal bar");
                Decimal::try_from(signal.price).unwrap_or_default()
            }
        };
        match ctx
            .gate
            .evaluate_entry(signal.kind, price, instrument, account, positions)
        {
            RiskDecision::Approved(order) => order,
            RiskDecision::Rejected(reason) => {
                debug!(%symbol, %reason, "entry rejected by risk gate");
                return;
            }
        }
    } else {
        match ctx.gate.exit_order(signal.kind, symbol, positions) {
            Some(order) => order,
            None => {
                debug!(%symbol, "exit signal with no matching position");
                return;
            }
        }
    };

    submit(ctx, &signal, order).await;
}

async fn submit(ctx: &LoopContext, signal: &Signal, order: OrderRequest) {
    let order = order.with_tag(format!("bot:{}", ctx.config.strategy));
    match ctx.adapter.place_order(&order).await {
        Ok(order_id) => {
            info!(symbol = %order.symbol, side = %order.side, qty = order.quantity,
                  %order_id, reason = %signal.reason, "order placed");
        }
        Err(e) => {
            warn!(symbol = %order.symbol, error = %e, "order rejected");
            ctx.state.record_error(format!("{}: {}", order.symbol, e));
        }
    }
}
