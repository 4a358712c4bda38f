//! `tradedesk login`: authenticate with a broker and persist the session.

use anyhow::{bail, Context};
use std::io::{self, Write};
use std::path::Path;
use tradedesk_core::traits::Credentials;
use tradedesk_core::types::BrokerId;
use tracing::info;

use crate::cli::LoginArgs;

pub async fn run(args: LoginArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let broker = super::resolve_broker(args.broker.as_deref(), &config)?;
    let manager = super::build_manager(&config)?;
    let store = !args.no_store;

    let profile = match broker {
        BrokerId::Paper => {
            manager
                .connect(broker, &Credentials::None, false)
                .await?
        }
        BrokerId::Kite | BrokerId::Upstox => {
            let api_key = required(&args.api_key, "--api-key")?;
            let api_secret = required(&args.api_secret, "--api-secret")?;

            let url = manager.initiate_oauth(broker, api_key, api_secret)?;
            println!("Open this URL in a browser and complete the login:\n\n  {url}\n");

            let token = prompt(match broker {
                BrokerId::Kite => "Paste the request_token from the redirect URL: ",
                _ => "Paste the authorization code from the redirect URL: ",
            })?;
            manager.complete_oauth(broker, token.trim(), store).await?
        }
        BrokerId::AngelOne => {
            let credentials = Credentials::Totp {
                api_key: required(&args.api_key, "--api-key")?.to_string(),
                client_code: required(&args.client_code, "--client-code")?.to_string(),
                password: required(&args.password, "--password")?.to_string(),
                totp: required(&args.totp, "--totp")?.to_string(),
            };
            manager.connect(broker, &credentials, store).await?
        }
        BrokerId::AliceBlue => {
            // Alice Blue sessions are keyed by user id + API key
            let credentials = Credentials::ApiKey {
                api_key: required(&args.user_id, "--user-id")?.to_string(),
                api_secret: required(&args.api_key, "--api-key")?.to_string(),
            };
            manager.connect(broker, &credentials, store).await?
        }
    };

    let account = manager.test_connection().await?;
    info!(%broker, user = %profile.user_id, "login verified");
    println!(
        "Logged in to {} as {} ({})",
        broker, profile.user_name, profile.user_id
    );
    println!("Available balance: {}", account.balance);
    if store {
        println!("Session stored in {}", manager.vault().dir().display());
    }
    Ok(())
}

fn required<'a>(value: &'a Option<String>, flag: &str) -> anyhow::Result<&'a str> {
    match value {
        Some(v) => Ok(v),
        None => bail!("{flag} is required for this broker"),
    }
}

fn prompt(message: &str) -> anyhow::Result<String> {
    print!("{message}");
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    if line.trim().is_empty() {
        bail!("no token entered");
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_flag() {
        assert_eq!(
            required(&Some("key".to_string()), "--api-key").unwrap(),
            "key"
        );
        let err = required(&None, "--api-key").unwrap_err();
        assert!(err.to_string().contains("--api-key"));
    }
}
