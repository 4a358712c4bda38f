mod cli;
mod logging;

use clap::Parser;
use cli::{Cli, Commands, LogLevel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    logging::setup_logging(log_level, cli.json_logs);

    match cli.command {
        Commands::Run(args) => cli::commands::run::run(args, cli.config.as_deref()).await,
        Commands::Login(args) => cli::commands::login::run(args, cli.config.as_deref()).await,
        Commands::Logout(args) => cli::commands::logout::run(args, cli.config.as_deref()).await,
        Commands::Strategies => cli::commands::strategies::run().await,
        Commands::ValidateConfig => cli::commands::validate::run(cli.config.as_deref()).await,
    }
}
