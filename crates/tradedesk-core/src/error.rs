//! Error types for the tradedesk core.

use thiserror::Error;

/// Errors surfaced by broker adapters.
///
/// Every variant carries a human-readable message; broker-internal error
/// codes are summarized by the adapter before they land here, never passed
/// through verbatim.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Access token has expired; log in again")]
    TokenExpired,

    #[error("Broker endpoint unreachable: {0}")]
    Network(String),

    #[error("Broker rejected the request: {0}")]
    Api(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Invalid order: {0}")]
    Validation(String),

    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Symbol not known to this broker: {0}")]
    SymbolNotFound(String),

    #[error("No open position in {0}")]
    PositionNotFound(String),

    #[error("{0} is not supported by this broker")]
    Unsupported(String),
}

/// Strategy errors.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Invalid strategy configuration: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Strategy not found: {0}")]
    NotFound(String),
}

/// Errors from the broker session manager.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Not connected to any broker")]
    NotConnected,

    #[error("No stored token for {0}")]
    NoStoredToken(String),

    #[error("Stored token for {broker} expired at {expired_at}")]
    TokenExpired { broker: String, expired_at: String },

    #[error("{broker} does not support OAuth login")]
    OAuthUnsupported { broker: String },

    #[error("No OAuth login in progress for {0}")]
    NoPendingOAuth(String),
}

/// Bot lifecycle errors.
///
/// These represent expected, recoverable caller mistakes (double-clicking
/// Start and the like) and are meant to be mapped onto HTTP statuses by
/// whatever serves them.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Bot is already running")]
    AlreadyRunning,

    #[error("Bot is not running")]
    NotRunning,

    #[error("Not connected to any broker")]
    NotConnected,

    #[error("No configuration recorded from a previous run")]
    NoConfiguration,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Instrument not known to the connected broker: {0}")]
    UnknownInstrument(String),

    #[error("No open position in {0}")]
    PositionNotFound(String),

    #[error("Stop timed out after {waited_secs}s; the trading loop is still finishing its current iteration")]
    StopTimedOut { waited_secs: u64 },

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Credential/token store errors.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt vault record: {0}")]
    Corrupt(String),

    #[error("Stored token for {broker} expired at {expired_at}")]
    TokenExpired { broker: String, expired_at: String },
}
