//! Position and account snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Exchange, Side};

/// An open position as normalized from any broker.
///
/// `quantity` is signed: positive for long, negative for short. Snapshot
/// semantics: recomputed on every query, no identity beyond the broker's
/// own records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub exchange: Exchange,
    pub quantity: i64,
    pub avg_entry_price: Decimal,
    pub last_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Open a fresh position.
    pub fn open(
        symbol: impl Into<String>,
        exchange: Exchange,
        quantity: i64,
        entry_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange,
            quantity,
            avg_entry_price: entry_price,
            last_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    /// The side of the position itself (long positions are Buy-side).
    pub fn side(&self) -> Side {
        if self.quantity >= 0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn abs_quantity(&self) -> u32 {
        self.quantity.unsigned_abs() as u32
    }

    /// Refresh the mark price and recompute unrealized P&L.
    pub fn update_price(&mut self, price: Decimal) {
        self.last_price = price;
        self.unrealized_pnl =
            Decimal::from(self.quantity) * (price - self.avg_entry_price);
    }

    /// Apply a fill against this position. Returns the realized P&L on any
    /// closed portion.
    ///
    /// Adding in the same direction re-averages the entry price; reducing
    /// realizes P&L on the closed quantity; overshooting reverses the
    /// position at the fill price.
    pub fn apply_fill(&mut self, side: Side, quantity: u32, price: Decimal) -> Decimal {
        let fill_qty = side.sign() * quantity as i64;
        let mut realized = Decimal::ZERO;

        let same_direction = self.quantity.signum() == fill_qty.signum();

        if same_direction || self.quantity == 0 {
            let total_cost = Decimal::from(self.quantity) * self.avg_entry_price
                + Decimal::from(fill_qty) * price;
            self.quantity += fill_qty;
            if self.quantity != 0 {
                self.avg_entry_price = total_cost / Decimal::from(self.quantity);
            }
        } else {
            let close_qty = fill_qty.unsigned_abs().min(self.quantity.unsigned_abs()) as i64;

            realized = if self.quantity > 0 {
                Decimal::from(close_qty) * (price - self.avg_entry_price)
            } else {
                Decimal::from(close_qty) * (self.avg_entry_price - price)
            };
            self.realized_pnl += realized;

            let remaining = fill_qty.abs() - close_qty;
            if remaining > 0 {
                // Reversed through flat
                self.quantity = fill_qty.signum() * remaining;
                self.avg_entry_price = price;
            } else {
                self.quantity += fill_qty;
            }
        }

        self.update_price(price);
        realized
    }
}

/// Account/margin snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Free cash
    pub balance: Decimal,
    /// Cash plus mark-to-market value of open positions
    pub equity: Decimal,
    pub margin_available: Decimal,
    pub margin_used: Decimal,
    /// Realized P&L booked today
    pub realized_pnl_today: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_long_position_pnl() {
        let mut pos = Position::open("INFY", Exchange::NSE, 10, dec!(1500));
        assert!(pos.is_long());
        assert_eq!(pos.side(), Side::Buy);

        pos.update_price(dec!(1520));
        assert_eq!(pos.unrealized_pnl, dec!(200));
    }

    #[test]
    fn test_averaging_up() {
        let mut pos = Position::open("INFY", Exchange::NSE, 10, dec!(1500));
        let realized = pos.apply_fill(Side::Buy, 10, dec!(1600));

        assert_eq!(realized, Decimal::ZERO);
        assert_eq!(pos.quantity, 20);
        assert_eq!(pos.avg_entry_price, dec!(1550));
    }

    #[test]
    fn test_full_close_realizes() {
        let mut pos = Position::open("INFY", Exchange::NSE, 10, dec!(1500));
        let realized = pos.apply_fill(Side::Sell, 10, dec!(1550));

        assert_eq!(realized, dec!(500));
        assert!(pos.is_flat());
        assert_eq!(pos.realized_pnl, dec!(500));
    }

    #[test]
    fn test_short_close_realizes() {
        let mut pos = Position::open("NIFTY24DECFUT", Exchange::NFO, -50, dec!(24000));
        assert!(pos.is_short());

        let realized = pos.apply_fill(Side::Buy, 50, dec!(23900));
        assert_eq!(realized, dec!(5000));
        assert!(pos.is_flat());
    }

    #[test]
    fn test_reversal_through_flat() {
        let mut pos = Position::open("INFY", Exchange::NSE, 10, dec!(1500));
        let realized = pos.apply_fill(Side::Sell, 25, dec!(1480));

        // 10 closed at a 20 loss, 15 opened short at 1480
        assert_eq!(realized, dec!(-200));
        assert_eq!(pos.quantity, -15);
        assert_eq!(pos.avg_entry_price, dec!(1480));
    }
}
