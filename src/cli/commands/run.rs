//! `tradedesk run`: connect, start the bot, trade until interrupted.

use anyhow::Context;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::sleep;
use tradedesk_core::error::{ControllerError, SessionError};
use tradedesk_core::traits::Credentials;
use tradedesk_core::types::{
    BrokerId, Exchange, InstrumentSelector, SessionWindow, Timeframe, TradingConfiguration,
};
use tradedesk_engine::{BotController, BotPhase};
use tradedesk_session::BrokerManager;
use tracing::{info, warn};

use crate::cli::RunArgs;

pub async fn run(args: RunArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let broker = super::resolve_broker(args.broker.as_deref(), &config)?;
    let manager = super::build_manager(&config)?;

    connect(&manager, broker, args.totp.as_deref()).await?;

    let exchange = Exchange::from_str(&args.exchange).map_err(anyhow::Error::msg)?;
    let timeframe = Timeframe::from_str(&args.timeframe).map_err(anyhow::Error::msg)?;
    let strategy_params = match &args.params {
        Some(raw) => serde_json::from_str(raw).context("invalid --params JSON")?,
        None => serde_json::Value::Null,
    };

    let trading = TradingConfiguration {
        broker,
        instruments: args
            .symbols
            .iter()
            .map(|s| InstrumentSelector::new(s.trim().to_uppercase(), exchange))
            .collect(),
        strategy: args.strategy.clone(),
        strategy_params,
        timeframe,
        risk: config.risk.clone(),
        session: SessionWindow::nse(),
        poll_interval_ms: config.engine.poll_interval_ms,
        paper_trading: broker == BrokerId::Paper,
    };

    let controller = BotController::new(Arc::clone(&manager))
        .with_stop_timeout(Duration::from_secs(config.engine.stop_timeout_secs));
    controller.start(trading).await?;
    info!(%broker, strategy = %args.strategy, "bot started, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("interrupt received, stopping bot");
                break;
            }
            _ = sleep(Duration::from_secs(1)) => {
                let status = controller.get_status();
                if status.phase == BotPhase::Stopped {
                    match status.stop_reason {
                        Some(reason) => warn!(%reason, "bot stopped itself"),
                        None => warn!("bot stopped itself"),
                    }
                    manager.disconnect().await;
                    return Ok(());
                }
            }
        }
    }

    match controller.stop().await {
        Ok(()) | Err(ControllerError::NotRunning) => {}
        Err(err) => return Err(err.into()),
    }
    let status = controller.get_status();
    info!(
        open_positions = status.open_positions,
        stop_reason = status.stop_reason.as_deref().unwrap_or("-"),
        "bot stopped"
    );
    manager.disconnect().await;
    Ok(())
}

/// Establish a broker session from whatever the vault holds.
async fn connect(
    manager: &BrokerManager,
    broker: BrokerId,
    totp: Option<&str>,
) -> anyhow::Result<()> {
    match broker {
        BrokerId::Paper => {
            manager.connect(broker, &Credentials::None, false).await?;
        }
        BrokerId::Kite | BrokerId::Upstox => {
            let profile = manager.load_stored_token(broker).await.map_err(|err| {
                match err {
                    SessionError::NoStoredToken(_) | SessionError::TokenExpired { .. } => {
                        anyhow::anyhow!("{err}; run `tradedesk login --broker {broker}` first")
                    }
                    other => other.into(),
                }
            })?;
            info!(user = %profile.user_id, "resumed stored session");
        }
        BrokerId::AngelOne | BrokerId::AliceBlue => {
            let stored = manager.vault().load(broker)?.ok_or_else(|| {
                anyhow::anyhow!(
                    "no stored credentials for {broker}; run `tradedesk login --broker {broker}` first"
                )
            })?;
            let credentials = match (stored, totp) {
                (
                    Credentials::Totp {
                        api_key,
                        client_code,
                        password,
                        ..
                    },
                    Some(code),
                ) => Credentials::Totp {
                    api_key,
                    client_code,
                    password,
                    totp: code.to_string(),
                },
                (stored @ Credentials::Totp { .. }, None) => {
                    warn!("stored TOTP code is likely stale, pass --totp for a fresh one");
                    stored
                }
                (stored, _) => stored,
            };
            manager.connect(broker, &credentials, false).await?;
        }
    }
    Ok(())
}
