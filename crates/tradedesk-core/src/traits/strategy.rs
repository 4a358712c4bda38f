//! Strategy trait.

use crate::types::{BarSeries, Signal};

/// A signal function over a rolling bar series.
///
/// One strategy instance is bound to one instrument; the trading loop owns
/// the series and calls `on_bar` once per iteration.
pub trait Strategy: Send + Sync {
    /// Registry id ("ma_crossover", "rsi", ...).
    fn id(&self) -> &'static str;

    /// Display name.
    fn name(&self) -> &str;

    /// Bars needed before the strategy can emit signals.
    fn warmup_period(&self) -> usize;

    /// Evaluate the series; `None` means hold.
    fn on_bar(&mut self, series: &BarSeries) -> Option<Signal>;

    /// Clear internal state before a fresh run.
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, SignalKind, Timeframe};

    struct AlwaysLong;

    impl Strategy for AlwaysLong {
        fn id(&self) -> &'static str {
            "always_long"
        }

        fn name(&self) -> &str {
            "Always Long"
        }

        fn warmup_period(&self) -> usize {
            1
        }

        fn on_bar(&mut self, series: &BarSeries) -> Option<Signal> {
            let bar = series.last()?;
            Some(Signal::new(
                series.symbol.clone(),
                SignalKind::EnterLong,
                bar.close,
                bar.timestamp,
                "test",
            ))
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn test_strategy_object_safety() {
        let mut strategy: Box<dyn Strategy> = Box::new(AlwaysLong);
        let mut series = BarSeries::new("INFY", Timeframe::Minute5);

        assert!(strategy.on_bar(&series).is_none());

        series.push(Bar::new(1, 100.0, 101.0, 99.0, 100.5, 1000.0));
        let signal = strategy.on_bar(&series).unwrap();
        assert_eq!(signal.kind, SignalKind::EnterLong);
    }
}
