//! `tradedesk validate-config`: load the configuration and print what
//! the bot would actually run with.

use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;

    match config_path {
        Some(path) => println!("Configuration OK: {}", path.display()),
        None => println!("Configuration OK (defaults + environment)"),
    }
    println!("  environment:       {}", config.app.environment);
    println!("  default broker:    {}", config.broker.default);
    println!("  vault dir:         {}", config.vault.dir);
    println!("  poll interval:     {} ms", config.engine.poll_interval_ms);
    println!("  stop timeout:      {} s", config.engine.stop_timeout_secs);
    println!("  risk per trade:    {}%", config.risk.risk_per_trade_pct);
    println!("  max daily loss:    {}%", config.risk.max_daily_loss_pct);
    println!("  max open positions: {}", config.risk.max_open_positions);
    Ok(())
}
