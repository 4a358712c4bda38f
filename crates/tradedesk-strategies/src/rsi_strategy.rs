//! RSI reversal strategy.
//!
//! Buys when RSI crosses back above the oversold level, exits when it
//! crosses below the overbought level. Shorting mirrors that when
//! enabled.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tradedesk_core::error::StrategyError;
use tradedesk_core::traits::Strategy;
use tradedesk_core::types::{BarSeries, Signal, SignalKind};

use crate::indicators::rsi;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiConfig {
    pub period: usize,
    /// Overbought threshold
    pub overbought: f64,
    /// Oversold threshold
    pub oversold: f64,
    /// Allow short entries on overbought reversals
    pub allow_short: bool,
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            period: 14,
            overbought: 70.0,
            oversold: 30.0,
            allow_short: false,
        }
    }
}

impl RsiConfig {
    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.period < 2 {
            return Err(StrategyError::InvalidConfig(
                "period must be at least 2".into(),
            ));
        }
        if self.oversold >= self.overbought {
            return Err(StrategyError::InvalidConfig(
                "oversold must be below overbought".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.oversold) || !(0.0..=100.0).contains(&self.overbought) {
            return Err(StrategyError::InvalidConfig(
                "thresholds must be within 0..100".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Exposure {
    Flat,
    Long,
    Short,
}

pub struct RsiStrategy {
    config: RsiConfig,
    prev_rsi: Option<f64>,
    exposure: Exposure,
}

impl RsiStrategy {
    pub fn new(config: RsiConfig) -> Result<Self, StrategyError> {
        config.validate()?;
        Ok(Self {
            config,
            prev_rsi: None,
            exposure: Exposure::Flat,
        })
    }
}

impl Strategy for RsiStrategy {
    fn id(&self) -> &'static str {
        "rsi"
    }

    fn name(&self) -> &str {
        "RSI Reversal"
    }

    fn warmup_period(&self) -> usize {
        self.config.period + 2
    }

    fn on_bar(&mut self, series: &BarSeries) -> Option<Signal> {
        let closes = series.closes();
        let current = rsi(&closes, self.config.period)?;
        let bar = series.last()?;

        let prev = self.prev_rsi.replace(current)?;
        let crossed_above_oversold = prev <= self.config.oversold && current > self.config.oversold;
        let crossed_below_overbought =
            prev >= self.config.overbought && current < self.config.overbought;

        match self.exposure {
            Exposure::Flat if crossed_above_oversold => {
                debug!(symbol = %series.symbol, rsi = current, "oversold reversal");
                self.exposure = Exposure::Long;
                Some(Signal::new(
                    series.symbol.clone(),
                    SignalKind::EnterLong,
                    bar.close,
                    bar.timestamp,
                    format!("RSI {:.1} recovered from oversold", current),
                ))
            }
            Exposure::Flat if crossed_below_overbought && self.config.allow_short => {
                debug!(symbol = %series.symbol, rsi = current, "overbought reversal");
                self.exposure = Exposure::Short;
                Some(Signal::new(
                    series.symbol.clone(),
                    SignalKind::EnterShort,
                    bar.close,
                    bar.timestamp,
                    format!("RSI {:.1} fell from overbought", current),
                ))
            }
            Exposure::Long if crossed_below_overbought => {
                self.exposure = Exposure::Flat;
                Some(Signal::new(
                    series.symbol.clone(),
                    SignalKind::ExitLong,
                    bar.close,
                    bar.timestamp,
                    format!("RSI {:.1} fell from overbought", current),
                ))
            }
            Exposure::Short if crossed_above_oversold => {
                self.exposure = Exposure::Flat;
                Some(Signal::new(
                    series.symbol.clone(),
                    SignalKind::ExitShort,
                    bar.close,
                    bar.timestamp,
                    format!("RSI {:.1} recovered from oversold", current),
                ))
            }
            _ => None,
        }
    }

    fn reset(&mut self) {
        self.prev_rsi = None;
        self.exposure = Exposure::Flat;
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

    #[test]
    fn test_config_validation() {
        let bad = RsiConfig {
            oversold: 80.0,
            overbought: 20.0,
            ..Default::default()
        };
        assert!(RsiStrategy::new(bad).is_err());
    }

    #[test]
    fn test_enters_long_on_oversold_recovery() {
        let mut strategy = RsiStrategy::new(RsiConfig {
            period: 5,
            overbought: 70.0,
            oversold: 30.0,
            allow_short: false,
        })
        .unwrap();

        // long slide drives RSI to the floor
        let mut closes: Vec<f64> = (0..15).map(|i| 200.0 - 5.0 * i as f64).collect();
        let series = series_from(&closes);
        assert!(strategy.on_bar(&series).is_none());

        // sharp recovery pulls RSI back over the oversold line
        let mut entered = false;
        for up in [140.0, 150.0, 162.0, 175.0] {
            closes.push(up);
            let series = series_from(&closes);
            if let Some(signal) = strategy.on_bar(&series) {
                assert_eq!(signal.kind, SignalKind::EnterLong);
                entered = true;
                break;
            }
        }
        assert!(entered, "no entry on oversold recovery");
    }

    #[test]
    fn test_no_short_entry_when_disabled() {
        let mut strategy = RsiStrategy::new(RsiConfig {
            period: 5,
            allow_short: false,
            ..Default::default()
        })
        .unwrap();

        let mut closes: Vec<f64> = (0..15).map(|i| 100.0 + 5.0 * i as f64).collect();
        strategy.on_bar(&series_from(&closes));
        for down in [160.0, 150.0, 140.0, 130.0] {
            closes.push(down);
            assert!(strategy.on_bar(&series_from(&closes)).is_none());
        }
    }
}
