//! `tradedesk logout`: drop stored credentials and tokens for a broker.

use std::path::Path;
use tracing::info;

use crate::cli::LogoutArgs;

pub async fn run(args: LogoutArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let broker = super::resolve_broker(args.broker.as_deref(), &config)?;
    let manager = super::build_manager(&config)?;

    manager.disconnect().await;
    manager.vault().forget(broker)?;

    info!(%broker, "stored session removed");
    println!("Forgot stored session for {broker}");
    Ok(())
}
