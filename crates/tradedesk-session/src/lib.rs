//! Broker session lifecycle.
//!
//! [`BrokerManager`] owns the single live adapter handle. Connecting to a
//! new broker fully authenticates first and only then replaces (and
//! disconnects) the previous session, so a failed connect leaves the
//! prior session untouched. Lifecycle transitions are serialized behind
//! one async lock; reads of the active handle never wait on a broker
//! round trip.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

use tradedesk_brokers::{build_adapter, AdapterConfig, KiteBroker, UpstoxBroker};
use tradedesk_core::error::{BrokerError, SessionError, VaultError};
use tradedesk_core::traits::{BrokerAdapter, Credentials, UserProfile};
use tradedesk_core::types::{AccountInfo, BrokerId};
use tradedesk_vault::{CredentialVault, TokenRecord};

/// A live, authenticated broker session.
#[derive(Clone)]
pub struct ActiveSession {
    pub broker: BrokerId,
    pub adapter: Arc<dyn BrokerAdapter>,
    pub profile: UserProfile,
    pub connected_at: DateTime<Utc>,
}

struct PendingOAuth {
    broker: BrokerId,
    api_key: String,
    api_secret: String,
    redirect_uri: Option<String>,
}

/// Owns the active adapter and every way of producing one.
pub struct BrokerManager {
    vault: CredentialVault,
    adapter_config: AdapterConfig,
    active: RwLock<Option<ActiveSession>>,
    lifecycle: tokio::sync::Mutex<()>,
    pending_oauth: Mutex<Option<PendingOAuth>>,
}

/// Kite-style daily tokens die at the broker's morning cutoff, 06:00 IST.
fn next_token_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    let ist = chrono::FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
    let local = now.with_timezone(&ist);
    let cutoff = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
    let date = if local.time() < cutoff {
        local.date_naive()
    } else {
        local.date_naive() + Duration::days(1)
    };
    ist.from_local_datetime(&date.and_time(cutoff))
        .single()
        .expect("fixed offset has no DST gaps")
        .with_timezone(&Utc)
}

impl BrokerManager {
    pub fn new(vault: CredentialVault, adapter_config: AdapterConfig) -> Self {
        Self {
            vault,
            adapter_config,
            active: RwLock::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            pending_oauth: Mutex::new(None),
        }
    }

    /// The current session, if any. Cheap snapshot, never blocks on IO.
    pub fn active(&self) -> Option<ActiveSession> {
        self.active.read().unwrap().clone()
    }

    /// The live adapter handle.
    pub fn adapter(&self) -> Result<Arc<dyn BrokerAdapter>, SessionError> {
        self.active()
            .map(|s| s.adapter)
            .ok_or(SessionError::NotConnected)
    }

    /// Connect to a broker with explicit credentials. With `remember` the
    /// credentials are persisted to the vault on success.
    pub async fn connect(
        &self,
        broker: BrokerId,
        credentials: &Credentials,
        remember: bool,
    ) -> Result<UserProfile, SessionError> {
        let adapter = build_adapter(broker, &self.adapter_config);
        self.connect_adapter(adapter, credentials, remember).await
    }

    /// Connect through a caller-supplied adapter instance.
    pub async fn connect_adapter(
        &self,
        adapter: Arc<dyn BrokerAdapter>,
        credentials: &Credentials,
        remember: bool,
    ) -> Result<UserProfile, SessionError> {
        let _lifecycle = self.lifecycle.lock().await;

        let broker = adapter.id();
        let profile = adapter.connect(credentials).await?;

        if remember {
            self.vault.save(broker, credentials)?;
        }

        let session = ActiveSession {
            broker,
            adapter,
            profile: profile.clone(),
            connected_at: Utc::now(),
        };
        let previous = self.active.write().unwrap().replace(session);
        if let Some(previous) = previous {
            info!(broker = %previous.broker, "replacing existing session");
            previous.adapter.disconnect().await;
        }

        info!(%broker, user = %profile.user_id, "broker session active");
        Ok(profile)
    }

    /// Drop the active session. Safe to call when not connected.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let previous = self.active.write().unwrap().take();
        if let Some(previous) = previous {
            previous.adapter.disconnect().await;
            info!(broker = %previous.broker, "broker session closed");
        }
    }

    /// Verify the active session with a lightweight account fetch.
    pub async fn test_connection(&self) -> Result<AccountInfo, SessionError> {
        let adapter = self.adapter()?;
        Ok(adapter.get_account_info().await?)
    }

    /// Begin an OAuth login. Returns the URL the user must open; the
    /// callback code is then fed to [`complete_oauth`](Self::complete_oauth).
    pub fn initiate_oauth(
        &self,
        broker: BrokerId,
        api_key: &str,
        api_secret: &str,
    ) -> Result<String, SessionError> {
        if !broker.supports_oauth() {
            return Err(SessionError::OAuthUnsupported {
                broker: broker.to_string(),
            });
        }

        let (url, redirect_uri) = match broker {
            BrokerId::Kite => (KiteBroker::login_url(api_key), None),
            BrokerId::Upstox => {
                let redirect_uri = self.adapter_config.upstox_redirect_uri.clone().ok_or_else(
                    || {
                        SessionError::Broker(BrokerError::Validation(
                            "Upstox OAuth requires a configured redirect URI".into(),
                        ))
                    },
                )?;
                (
                    UpstoxBroker::authorization_url(api_key, &redirect_uri),
                    Some(redirect_uri),
                )
            }
            _ => unreachable!("supports_oauth gate"),
        };

        *self.pending_oauth.lock().unwrap() = Some(PendingOAuth {
            broker,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            redirect_uri,
        });
        Ok(url)
    }

    /// Finish an OAuth login with the request token / authorization code
    /// from the broker's callback, then connect with the issued token.
    pub async fn complete_oauth(
        &self,
        broker: BrokerId,
        request_token: &str,
        remember: bool,
    ) -> Result<UserProfile, SessionError> {
        let pending = self
            .pending_oauth
            .lock()
            .unwrap()
            .take()
            .filter(|p| p.broker == broker)
            .ok_or_else(|| SessionError::NoPendingOAuth(broker.to_string()))?;

        let adapter = build_adapter(broker, &self.adapter_config);

        // Upstox token exchange needs the redirect URI alongside the code
        let exchange_token = match &pending.redirect_uri {
            Some(uri) => format!("{}|{}", request_token, uri),
            None => request_token.to_string(),
        };
        let token = adapter
            .exchange_request_token(&pending.api_key, &pending.api_secret, &exchange_token)
            .await?;

        if remember {
            self.vault.save_token(&TokenRecord {
                broker,
                api_key: pending.api_key.clone(),
                access_token: token.access_token.clone(),
                expires_at: next_token_expiry(Utc::now()),
                profile: token.profile.clone(),
            })?;
        }

        let credentials = Credentials::AccessToken {
            api_key: pending.api_key,
            access_token: token.access_token,
        };
        self.connect_adapter(adapter, &credentials, false).await
    }

    /// Reconnect using a token stored by a previous OAuth login.
    pub async fn load_stored_token(&self, broker: BrokerId) -> Result<UserProfile, SessionError> {
        let record = match self.vault.load_token(broker) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(SessionError::NoStoredToken(broker.to_string())),
            Err(VaultError::TokenExpired { broker, expired_at }) => {
                return Err(SessionError::TokenExpired { broker, expired_at })
            }
            Err(e) => return Err(e.into()),
        };

        let credentials = Credentials::AccessToken {
            api_key: record.api_key,
            access_token: record.access_token,
        };
        self.connect(broker, &credentials, false).await
    }

    /// Whether a usable stored token exists for the broker.
    pub fn check_token_validity(&self, broker: BrokerId) -> bool {
        match self.vault.load_token(broker) {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(%broker, error = %e, "stored token unusable");
                false
            }
        }
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }
}
