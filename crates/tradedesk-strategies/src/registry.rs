//! Strategy registry.
//!
//! Maps strategy ids from configuration to per-instrument instances. One
//! instance is created per configured symbol so strategies can keep
//! independent crossover/exposure state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tradedesk_core::error::StrategyError;
use tradedesk_core::traits::Strategy;

use crate::ma_crossover::{MaCrossoverConfig, MaCrossoverStrategy};
use crate::rsi_strategy::{RsiConfig, RsiStrategy};

/// Catalog entry for one registered strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Default parameters as JSON, the shape `create` accepts
    pub default_params: serde_json::Value,
}

/// Catalog of built-in strategies.
pub struct StrategyRegistry {
    strategies: BTreeMap<String, StrategyInfo>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let mut strategies = BTreeMap::new();

        strategies.insert(
            "ma_crossover".to_string(),
            StrategyInfo {
                id: "ma_crossover".to_string(),
                name: "MA Crossover".to_string(),
                description: "Fast/slow moving average crossover entries and exits".to_string(),
                default_params: serde_json::to_value(MaCrossoverConfig::default())
                    .expect("default config serializes"),
            },
        );

        strategies.insert(
            "rsi".to_string(),
            StrategyInfo {
                id: "rsi".to_string(),
                name: "RSI Reversal".to_string(),
                description: "RSI oversold/overbought reversal entries".to_string(),
                default_params: serde_json::to_value(RsiConfig::default())
                    .expect("default config serializes"),
            },
        );

        Self { strategies }
    }

    /// All registered strategies, stable order.
    pub fn list(&self) -> Vec<&StrategyInfo> {
        self.strategies.values().collect()
    }

    pub fn get(&self, id: &str) -> Option<&StrategyInfo> {
        self.strategies.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.strategies.contains_key(id)
    }

    /// Instantiate a strategy from its id and JSON parameters. Null or
    /// missing parameters fall back to the strategy's defaults.
    pub fn create(
        &self,
        id: &str,
        params: &serde_json::Value,
    ) -> Result<Box<dyn Strategy>, StrategyError> {
        match id {
            "ma_crossover" => {
                let config = parse_params::<MaCrossoverConfig>(params)?;
                Ok(Box::new(MaCrossoverStrategy::new(config)?))
            }
            "rsi" => {
                let config = parse_params::<RsiConfig>(params)?;
                Ok(Box::new(RsiStrategy::new(config)?))
            }
            other => Err(StrategyError::NotFound(other.to_string())),
        }
    }
}

fn parse_params<T>(params: &serde_json::Value) -> Result<T, StrategyError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|e| StrategyError::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lists_builtins() {
        let registry = StrategyRegistry::new();
        assert!(registry.contains("ma_crossover"));
        assert!(registry.contains("rsi"));
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_create_with_defaults() {
        let registry = StrategyRegistry::new();
        let strategy = registry
            .create("ma_crossover", &serde_json::Value::Null)
            .unwrap();
        assert_eq!(strategy.id(), "ma_crossover");
        assert!(strategy.warmup_period() > 0);
    }

    #[test]
    fn test_create_with_explicit_params() {
        let registry = StrategyRegistry::new();
        let params = serde_json::json!({
            "period": 7,
            "overbought": 75.0,
            "oversold": 25.0,
            "allow_short": true
        });
        let strategy = registry.create("rsi", &params).unwrap();
        assert_eq!(strategy.warmup_period(), 9);
    }

    #[test]
    fn test_unknown_strategy() {
        let registry = StrategyRegistry::new();
        let err = registry
            .create("martingale", &serde_json::Value::Null)
            .err()
            .unwrap();
        assert!(matches!(err, StrategyError::NotFound(_)));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let registry = StrategyRegistry::new();
        let params = serde_json::json!({ "fast_period": 50, "slow_period": 10 });
        assert!(registry.create("ma_crossover", &params).is_err());
    }
}
