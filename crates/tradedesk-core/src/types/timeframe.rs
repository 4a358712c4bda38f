//! Candle intervals, named the way Kite's historical API names them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bar interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    #[serde(rename = "minute")]
    Minute,
    #[serde(rename = "3minute")]
    Minute3,
    #[default]
    #[serde(rename = "5minute")]
    Minute5,
    #[serde(rename = "10minute")]
    Minute10,
    #[serde(rename = "15minute")]
    Minute15,
    #[serde(rename = "30minute")]
    Minute30,
    #[serde(rename = "60minute")]
    Hour,
    #[serde(rename = "day")]
    Day,
}

impl Timeframe {
    /// Interval duration in seconds.
    pub fn as_secs(&self) -> u64 {
        match self {
            Timeframe::Minute => 60,
            Timeframe::Minute3 => 180,
            Timeframe::Minute5 => 300,
            Timeframe::Minute10 => 600,
            Timeframe::Minute15 => 900,
            Timeframe::Minute30 => 1800,
            Timeframe::Hour => 3600,
            Timeframe::Day => 86400,
        }
    }

    /// The interval string broker historical-data endpoints expect.
    pub fn api_interval(&self) -> &'static str {
        match self {
            Timeframe::Minute => "minute",
            Timeframe::Minute3 => "3minute",
            Timeframe::Minute5 => "5minute",
            Timeframe::Minute10 => "10minute",
            Timeframe::Minute15 => "15minute",
            Timeframe::Minute30 => "30minute",
            Timeframe::Hour => "60minute",
            Timeframe::Day => "day",
        }
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Timeframe::Day)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.api_interval())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minute" | "1m" => Ok(Timeframe::Minute),
            "3minute" | "3m" => Ok(Timeframe::Minute3),
            "5minute" | "5m" => Ok(Timeframe::Minute5),
            "10minute" | "10m" => Ok(Timeframe::Minute10),
            "15minute" | "15m" => Ok(Timeframe::Minute15),
            "30minute" | "30m" => Ok(Timeframe::Minute30),
            "60minute" | "1h" | "hour" => Ok(Timeframe::Hour),
            "day" | "1d" | "daily" => Ok(Timeframe::Day),
            _ => Err(format!("Invalid timeframe: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        assert_eq!(Timeframe::Minute.as_secs(), 60);
        assert_eq!(Timeframe::Minute5.as_secs(), 300);
        assert_eq!(Timeframe::Day.as_secs(), 86400);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Timeframe::from_str("5m").unwrap(), Timeframe::Minute5);
        assert_eq!(Timeframe::from_str("5minute").unwrap(), Timeframe::Minute5);
        assert_eq!(Timeframe::from_str("day").unwrap(), Timeframe::Day);
        assert!(Timeframe::from_str("2m").is_err());
    }

    #[test]
    fn test_api_interval() {
        assert_eq!(Timeframe::Minute3.api_interval(), "3minute");
        assert_eq!(Timeframe::Hour.api_interval(), "60minute");
    }

    #[test]
    fn test_intraday() {
        assert!(Timeframe::Minute15.is_intraday());
        assert!(!Timeframe::Day.is_intraday());
    }
}
