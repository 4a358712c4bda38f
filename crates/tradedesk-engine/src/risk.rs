//! Pre-trade risk checks and position sizing.

use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use tradedesk_core::types::{
    AccountInfo, Instrument, OrderRequest, Position, RiskParams, Side, SignalKind, SizingMode,
};

/// Outcome of evaluating a prospective entry.
#[derive(Debug)]
pub enum RiskDecision {
    Approved(OrderRequest),
    Rejected(String),
}

/// Stateless gate applying the configured risk parameters.
pub struct RiskGate {
    params: RiskParams,
}

impl RiskGate {
    pub fn new(params: RiskParams) -> Self {
        Self { params }
    }

    /// Today's loss against the day-start capital, when it has reached the
    /// configured limit. P&L today is realized plus the open positions'
    /// unrealized.
    pub fn daily_loss_breached(
        &self,
        account: &AccountInfo,
        positions: &[Position],
    ) -> Option<Decimal> {
        let unrealized: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        let pnl_today = account.realized_pnl_today + unrealized;
        if pnl_today >= Decimal::ZERO {
            return None;
        }

        let day_start_capital = account.equity - pnl_today;
        if day_start_capital <= Decimal::ZERO {
            return None;
        }
        let limit = day_start_capital * self.params.max_daily_loss_pct / Decimal::from(100);
        let loss = -pnl_today;
        (loss >= limit).then_some(loss)
    }

    /// Order quantity for an entry at `price`, floored to the instrument's
    /// lot size. Zero means the account cannot support the trade.
    pub fn size_order(&self, equity: Decimal, price: Decimal, instrument: &Instrument) -> u32 {
        if price <= Decimal::ZERO {
            return 0;
        }
        let raw = match &self.params.sizing {
            SizingMode::FixedQuantity { quantity } => *quantity,
            SizingMode::PercentEquity => {
                let notional = equity * self.params.risk_per_trade_pct / Decimal::from(100);
                (notional / price).floor().to_u32().unwrap_or(0)
            }
            SizingMode::RiskBased { stop_loss_pct } => {
                if *stop_loss_pct <= Decimal::ZERO {
                    return 0;
                }
                let risk_amount = equity * self.params.risk_per_trade_pct / Decimal::from(100);
                let per_unit = price * *stop_loss_pct / Decimal::from(100);
                (risk_amount / per_unit).floor().to_u32().unwrap_or(0)
            }
        };
        instrument.round_to_lot(raw)
    }

    /// Check an entry signal against position limits and size it.
    pub fn evaluate_entry(
        &self,
        kind: SignalKind,
        price: Decimal,
        instrument: &Instrument,
        account: &AccountInfo,
        positions: &[Position],
    ) -> RiskDecision {
        debug_assert!(kind.is_entry());

        if positions
            .iter()
            .any(|p| p.symbol == instrument.tradingsymbol)
        {
            return RiskDecision::Rejected(format!(
                "already holding a position in {}",
                instrument.tradingsymbol
            ));
        }
        if positions.len() >= self.params.max_open_positions {
            return RiskDecision::Rejected(format!(
                "max open positions reached ({})",
                self.params.max_open_positions
            ));
        }

        let quantity = self.size_order(account.equity, price, instrument);
        if quantity == 0 {
            return RiskDecision::Rejected(format!(
                "sized to zero at price {} with equity {}",
                price, account.equity
            ));
        }

        let side = match kind {
            SignalKind::EnterLong => Side::Buy,
            SignalKind::EnterShort => Side::Sell,
            _ => unreachable!("entry signals only"),
        };
        debug!(symbol = %instrument.tradingsymbol, %side, quantity, "entry approved");
        RiskDecision::Approved(OrderRequest::market(
            &instrument.tradingsymbol,
            instrument.exchange,
            side,
            quantity,
        ))
    }

    /// Offsetting order for an exit signal, if a position exists.
    pub fn exit_order(&self, kind: SignalKind, symbol: &str, positions: &[Position]) -> Option<OrderRequest> {
        let position = positions.iter().find(|p| p.symbol == symbol)?;
        let matches = match kind {
            SignalKind::ExitLong => position.is_long(),
            SignalKind::ExitShort => position.is_short(),
            _ => false,
        };
        if !matches {
            return None;
        }
        Some(OrderRequest::market(
            symbol,
            position.exchange,
            position.side().opposite(),
            position.abs_quantity(),
        ))
    }
}
