//! `tradedesk strategies`: list the built-in strategy catalog.

use tradedesk_strategies::StrategyRegistry;

pub async fn run() -> anyhow::Result<()> {
    let registry = StrategyRegistry::new();

    for info in registry.list() {
        println!("{}  ({})", info.id, info.name);
        println!("  {}", info.description);
        println!(
            "  default params: {}",
            serde_json::to_string(&info.default_params)?
        );
        println!();
    }
    Ok(())
}
