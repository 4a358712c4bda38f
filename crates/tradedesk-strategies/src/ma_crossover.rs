//! Moving average crossover strategy.
//!
//! Enters long when the fast MA crosses above the slow MA and exits when
//! it crosses back below. Crossovers below the configured threshold are
//! ignored as noise.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tradedesk_core::error::StrategyError;
use tradedesk_core::traits::Strategy;
use tradedesk_core::types::{BarSeries, Signal, SignalKind};

use crate::indicators::{ema, sma};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaCrossoverConfig {
    /// Fast moving average period
    pub fast_period: usize,
    /// Slow moving average period
    pub slow_period: usize,
    /// Use EMA instead of SMA
    pub use_ema: bool,
    /// Minimum fast/slow divergence to accept a crossover, as a fraction
    pub signal_threshold: f64,
}

impl Default for MaCrossoverConfig {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            use_ema: true,
            signal_threshold: 0.001,
        }
    }
}

impl MaCrossoverConfig {
    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.fast_period == 0 {
            return Err(StrategyError::InvalidConfig(
                "fast_period must be greater than 0".into(),
            ));
        }
        if self.fast_period >= self.slow_period {
            return Err(StrategyError::InvalidConfig(
                "fast_period must be less than slow_period".into(),
            ));
        }
        Ok(())
    }
}

pub struct MaCrossoverStrategy {
    config: MaCrossoverConfig,
    prev_fast: Option<f64>,
    prev_slow: Option<f64>,
    in_position: bool,
}

impl MaCrossoverStrategy {
    pub fn new(config: MaCrossoverConfig) -> Result<Self, StrategyError> {
        config.validate()?;
        Ok(Self {
            config,
            prev_fast: None,
            prev_slow: None,
            in_position: false,
        })
    }

    fn average(&self, closes: &[f64], period: usize) -> Option<f64> {
        if self.config.use_ema {
            ema(closes, period)
        } else {
            sma(closes, period)
        }
    }
}

impl Strategy for MaCrossoverStrategy {
    fn id(&self) -> &'static str {
        "ma_crossover"
    }

    fn name(&self) -> &str {
        "MA Crossover"
    }

    fn warmup_period(&self) -> usize {
        self.config.slow_period + 1
    }

    fn on_bar(&mut self, series: &BarSeries) -> Option<Signal> {
        let closes = series.closes();
        let fast = self.average(&closes, self.config.fast_period)?;
        let slow = self.average(&closes, self.config.slow_period)?;
        let bar = series.last()?;

        let (prev_fast, prev_slow) = (self.prev_fast, self.prev_slow);
        self.prev_fast = Some(fast);
        self.prev_slow = Some(slow);
        let (prev_fast, prev_slow) = (prev_fast?, prev_slow?);

        let magnitude = (fast - slow).abs() / slow;
        let crossed_up = prev_fast <= prev_slow && fast > slow;
        let crossed_down = prev_fast >= prev_slow && fast < slow;

        if crossed_up && !self.in_position && magnitude >= self.config.signal_threshold {
            debug!(symbol = %series.symbol, fast, slow, "bullish crossover");
            self.in_position = true;
            return Some(Signal::new(
                series.symbol.clone(),
                SignalKind::EnterLong,
                bar.close,
                bar.timestamp,
                format!("fast MA {:.2} crossed above slow MA {:.2}", fast, slow),
            ));
        }

        if crossed_down && self.in_position {
            debug!(symbol = %series.symbol, fast, slow, "bearish crossover");
            self.in_position = false;
            return Some(Signal::new(
                series.symbol.clone(),
                SignalKind::ExitLong,
                bar.close,
                bar.timestamp,
                format!("fast MA {:.2} crossed below slow MA {:.2}", fast, slow),
            ));
        }

        None
    }

    fn reset(&mut self) {
        self.prev_fast = None;
        self.prev_slow = None;
        self.in_position = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradedesk_core::types::{Bar, Timeframe};

    fn series_from(closes: &[f64]) -> BarSeries {
        let mut series = BarSeries::new("TEST", Timeframe::Minute5);
        for (i, close) in closes.iter().enumerate() {
            series.push(Bar::new(
                i as i64 * 300_000,
                *close,
                close + 0.5,
                close - 0.5,
                *close,
                1000.0,
            ));
        }
        series
    }

    fn strategy() -> MaCrossoverStrategy {
        MaCrossoverStrategy::new(MaCrossoverConfig {
            fast_period: 3,
            slow_period: 6,
            use_ema: false,
            signal_threshold: 0.0,
        })
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        let bad = MaCrossoverConfig {
            fast_period: 26,
            slow_period: 12,
            ..Default::default()
        };
        assert!(matches!(
            MaCrossoverStrategy::new(bad),
            Err(StrategyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_enters_long_on_bullish_crossover() {
        let mut strategy = strategy();

        // downtrend to put fast below slow, then a sharp reversal
        let mut closes: Vec<f64> = (0..10).map(|i| 100.0 - i as f64).collect();
        let mut series = series_from(&closes);
        assert!(strategy.on_bar(&series).is_none());

        for up in [95.0, 99.0, 103.0] {
            closes.push(up);
            series = series_from(&closes);
            if let Some(signal) = strategy.on_bar(&series) {
                assert_eq!(signal.kind, SignalKind::EnterLong);
                assert_eq!(signal.symbol, "TEST");
                return;
            }
        }
        panic!("no entry signal on reversal");
    }

    #[test]
    fn test_exit_only_after_entry() {
        let mut strategy = strategy();

        // uptrend then collapse; without a prior entry there is no exit
        let mut closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        for down in [100.0, 95.0, 90.0, 85.0] {
            closes.push(down);
            let series = series_from(&closes);
            assert!(strategy.on_bar(&series).is_none());
        }
    }

    #[test]
    fn test_reset_clears_state() {
        let mut strategy = strategy();
        let series = series_from(&(0..10).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        strategy.on_bar(&series);
        assert!(strategy.prev_fast.is_some());

        strategy.reset();
        assert!(strategy.prev_fast.is_none());
        assert!(!strategy.in_position);
    }
}
