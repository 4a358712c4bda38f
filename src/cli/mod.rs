//! Command-line interface definitions.

pub mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tradedesk")]
#[command(about = "Automated trading bot for Indian brokers", version)]
pub struct Cli {
    /// Path to the configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a broker and run a strategy until interrupted
    Run(RunArgs),
    /// Authenticate with a broker and store the session in the vault
    Login(LoginArgs),
    /// Remove stored credentials and tokens for a broker
    Logout(LogoutArgs),
    /// List available strategies and their default parameters
    Strategies,
    /// Load and print the resolved configuration
    ValidateConfig,
}

#[derive(Args)]
pub struct RunArgs {
    /// Broker to trade through; defaults to the configured broker
    #[arg(short, long)]
    pub broker: Option<String>,

    /// Strategy id, see `tradedesk strategies`
    #[arg(short, long)]
    pub strategy: String,

    /// Strategy parameters as a JSON object
    #[arg(long)]
    pub params: Option<String>,

    /// Symbols to trade
    #[arg(long, value_delimiter = ',', required = true)]
    pub symbols: Vec<String>,

    /// Exchange the symbols trade on
    #[arg(long, default_value = "NSE")]
    pub exchange: String,

    /// Candle timeframe (1m, 5m, 15m, 1h, day, ...)
    #[arg(short, long, default_value = "5m")]
    pub timeframe: String,

    /// Fresh TOTP code, for brokers whose stored login needs one
    #[arg(long)]
    pub totp: Option<String>,
}

#[derive(Args)]
pub struct LoginArgs {
    /// Broker to log in to; defaults to the configured broker
    #[arg(short, long)]
    pub broker: Option<String>,

    /// API key issued by the broker
    #[arg(long)]
    pub api_key: Option<String>,

    /// API secret, for OAuth token exchange
    #[arg(long)]
    pub api_secret: Option<String>,

    /// Client code (Angel One)
    #[arg(long)]
    pub client_code: Option<String>,

    /// Login password (Angel One)
    #[arg(long)]
    pub password: Option<String>,

    /// Current TOTP code (Angel One)
    #[arg(long)]
    pub totp: Option<String>,

    /// User id (Alice Blue)
    #[arg(long)]
    pub user_id: Option<String>,

    /// Do not persist credentials or tokens to the vault
    #[arg(long)]
    pub no_store: bool,
}

#[derive(Args)]
pub struct LogoutArgs {
    /// Broker to forget; defaults to the configured broker
    #[arg(short, long)]
    pub broker: Option<String>,
}
