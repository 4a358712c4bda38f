//! Instrument metadata as published by Indian exchanges.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// National Stock Exchange (equity)
    NSE,
    /// Bombay Stock Exchange (equity)
    BSE,
    /// NSE futures & options
    NFO,
    /// BSE futures & options
    BFO,
    /// Multi Commodity Exchange
    MCX,
    /// Currency derivatives
    CDS,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Exchange::NSE => "NSE",
            Exchange::BSE => "BSE",
            Exchange::NFO => "NFO",
            Exchange::BFO => "BFO",
            Exchange::MCX => "MCX",
            Exchange::CDS => "CDS",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NSE" => Ok(Exchange::NSE),
            "BSE" => Ok(Exchange::BSE),
            "NFO" => Ok(Exchange::NFO),
            "BFO" => Ok(Exchange::BFO),
            "MCX" => Ok(Exchange::MCX),
            "CDS" => Ok(Exchange::CDS),
            _ => Err(format!("Unknown exchange: {}", s)),
        }
    }
}

/// Instrument type within an exchange segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    /// Cash equity
    EQ,
    /// Future
    FUT,
    /// Call option
    CE,
    /// Put option
    PE,
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstrumentKind::EQ => "EQ",
            InstrumentKind::FUT => "FUT",
            InstrumentKind::CE => "CE",
            InstrumentKind::PE => "PE",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for InstrumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EQ" => Ok(InstrumentKind::EQ),
            "FUT" => Ok(InstrumentKind::FUT),
            "CE" => Ok(InstrumentKind::CE),
            "PE" => Ok(InstrumentKind::PE),
            _ => Err(format!("Unknown instrument type: {}", s)),
        }
    }
}

/// A tradeable security as the broker describes it.
///
/// `instrument_token` is the broker-scoped unique id; `tradingsymbol` is
/// what order and quote endpoints key on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument_token: u32,
    pub exchange_token: u32,
    pub tradingsymbol: String,
    pub name: String,
    pub exchange: Exchange,
    pub kind: InstrumentKind,
    pub tick_size: Decimal,
    pub lot_size: u32,
    pub expiry: Option<NaiveDate>,
    pub strike: Option<Decimal>,
}

impl Instrument {
    /// Convenience constructor for a cash equity instrument.
    pub fn equity(
        token: u32,
        tradingsymbol: impl Into<String>,
        name: impl Into<String>,
        exchange: Exchange,
    ) -> Self {
        use rust_decimal_macros::dec;
        Self {
            instrument_token: token,
            exchange_token: token >> 8,
            tradingsymbol: tradingsymbol.into(),
            name: name.into(),
            exchange,
            kind: InstrumentKind::EQ,
            tick_size: dec!(0.05),
            lot_size: 1,
            expiry: None,
            strike: None,
        }
    }

    /// Whether this is a derivative contract.
    pub fn is_derivative(&self) -> bool {
        !matches!(self.kind, InstrumentKind::EQ)
    }

    /// Round a quantity down to a whole number of lots.
    pub fn round_to_lot(&self, quantity: u32) -> u32 {
        if self.lot_size <= 1 {
            quantity
        } else {
            (quantity / self.lot_size) * self.lot_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_parse() {
        assert_eq!(Exchange::from_str("nse").unwrap(), Exchange::NSE);
        assert_eq!(Exchange::from_str("NFO").unwrap(), Exchange::NFO);
        assert!(Exchange::from_str("NYSE").is_err());
    }

    #[test]
    fn test_round_to_lot() {
        let mut inst = Instrument::equity(256265, "NIFTY24DECFUT", "NIFTY", Exchange::NFO);
        inst.kind = InstrumentKind::FUT;
        inst.lot_size = 50;

        assert_eq!(inst.round_to_lot(49), 0);
        assert_eq!(inst.round_to_lot(50), 50);
        assert_eq!(inst.round_to_lot(174), 150);
        assert!(inst.is_derivative());
    }

    #[test]
    fn test_equity_lot() {
        let inst = Instrument::equity(738561, "RELIANCE", "RELIANCE INDUSTRIES", Exchange::NSE);
        assert_eq!(inst.round_to_lot(17), 17);
        assert!(!inst.is_derivative());
    }
}
