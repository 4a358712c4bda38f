//! Built-in signal strategies and the registry that instantiates them.

pub mod indicators;
pub mod ma_crossover;
pub mod registry;
pub mod rsi_strategy;

pub use ma_crossover::{MaCrossoverConfig, MaCrossoverStrategy};
pub use registry::{StrategyInfo, StrategyRegistry};
pub use rsi_strategy::{RsiConfig, RsiStrategy};
