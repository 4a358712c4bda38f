pub mod login;
pub mod logout;
pub mod run;
pub mod strategies;
pub mod validate;

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tradedesk_brokers::AdapterConfig;
use tradedesk_config::AppConfig;
use tradedesk_core::types::BrokerId;
use tradedesk_session::BrokerManager;
use tradedesk_vault::CredentialVault;

pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    tradedesk_config::load_config(path).context("failed to load configuration")
}

pub(crate) fn resolve_broker(
    flag: Option<&str>,
    config: &AppConfig,
) -> anyhow::Result<BrokerId> {
    match flag {
        Some(name) => BrokerId::from_str(name).map_err(anyhow::Error::msg),
        None => Ok(config.broker.default),
    }
}

pub(crate) fn build_manager(config: &AppConfig) -> anyhow::Result<Arc<BrokerManager>> {
    let vault = CredentialVault::open(expand_home(&config.vault.dir))
        .context("failed to open credential vault")?;
    let adapter_config = AdapterConfig {
        paper_starting_balance: config.broker.paper_starting_balance,
        upstox_redirect_uri: config.broker.upstox_redirect_uri.clone(),
    };
    Ok(Arc::new(BrokerManager::new(vault, adapter_config)))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_broker_flag_wins() {
        let config = AppConfig::default();
        assert_eq!(
            resolve_broker(Some("kite"), &config).unwrap(),
            BrokerId::Kite
        );
        assert_eq!(resolve_broker(None, &config).unwrap(), BrokerId::Paper);
        assert!(resolve_broker(Some("nonsense"), &config).is_err());
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/trader");
        assert_eq!(
            expand_home("~/.tradedesk/vault"),
            PathBuf::from("/home/trader/.tradedesk/vault")
        );
        assert_eq!(expand_home("/var/lib/vault"), PathBuf::from("/var/lib/vault"));
    }
}
