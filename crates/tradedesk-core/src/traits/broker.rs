//! The broker adapter capability contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::types::{
    AccountInfo, Bar, BrokerId, Instrument, OrderRequest, Position, Timeframe, TradeRecord,
};

/// Credentials in the shapes the supported brokers actually take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    /// API key + secret (Alice Blue session login)
    ApiKey { api_key: String, api_secret: String },
    /// Pre-exchanged access token (Kite, Upstox after OAuth)
    AccessToken { api_key: String, access_token: String },
    /// Client code + password + TOTP (Angel One SmartAPI)
    Totp {
        api_key: String,
        client_code: String,
        password: String,
        totp: String,
    },
    /// Paper trading needs none
    None,
}

/// Authenticated user as reported by the broker at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub user_name: String,
    pub email: Option<String>,
}

/// An OAuth access token produced by a request-token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub profile: UserProfile,
}

/// Uniform capability contract over every broker integration.
///
/// Each broker exposes a materially different authentication flow and raw
/// response shape; adapters normalize all of it so nothing downstream
/// branches on broker identity. Implementations must tolerate concurrent
/// calls: the trading loop and the query surface both talk to the same
/// adapter.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn id(&self) -> BrokerId;

    /// Human-readable broker name for logs and status.
    fn name(&self) -> &str;

    /// Establish an authenticated session.
    async fn connect(&self, credentials: &Credentials) -> Result<UserProfile, BrokerError>;

    /// Release the session. Idempotent; never fails.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Exchange an OAuth request token for an access token.
    ///
    /// Only OAuth-capable brokers override this.
    async fn exchange_request_token(
        &self,
        _api_key: &str,
        _api_secret: &str,
        _request_token: &str,
    ) -> Result<OAuthToken, BrokerError> {
        Err(BrokerError::Unsupported("OAuth token exchange".into()))
    }

    /// Full instrument dump for this broker.
    async fn get_instruments(&self) -> Result<Vec<Instrument>, BrokerError>;

    /// Look up one instrument by trading symbol. `None` when unknown.
    async fn get_instrument_info(&self, symbol: &str) -> Result<Option<Instrument>, BrokerError>;

    /// Recent bars, oldest first, most recent last.
    async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// Last traded price.
    async fn get_quote(&self, symbol: &str) -> Result<Decimal, BrokerError>;

    /// Submit an order; returns the broker's order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError>;

    /// Open positions. Empty vec (never an error) when flat.
    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Account/margin snapshot. Errors when not connected.
    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError>;

    /// Executed trades in the given window.
    async fn get_trades(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, BrokerError>;
}
