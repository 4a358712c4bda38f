//! Configuration management.

mod settings;

pub use settings::{AppConfig, AppSettings, BrokerSettings, EngineSettings, VaultSettings};

use config::{Config, ConfigError, Environment, File};
use std::path::Path;

/// Load configuration from file and environment. The file is optional;
/// `TRADEDESK__` environment variables override it either way.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    let config = builder
        .add_source(
            Environment::with_prefix("TRADEDESK")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tradedesk_core::types::BrokerId;

    #[test]
    fn test_defaults_without_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.app.name, "tradedesk");
        assert_eq!(config.broker.default, BrokerId::Paper);
        assert_eq!(config.engine.poll_interval_ms, 5_000);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[app]
name = "tradedesk"
environment = "production"

[broker]
default = "kite"
paper_starting_balance = 500000

[engine]
poll_interval_ms = 2000
stop_timeout_secs = 10
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.app.environment, "production");
        assert_eq!(config.broker.default, BrokerId::Kite);
        assert_eq!(config.engine.poll_interval_ms, 2_000);
        // unspecified sections fall back to defaults
        assert_eq!(config.engine.stop_timeout_secs, 10);
        assert_eq!(config.vault.dir, "~/.tradedesk/vault");
    }
}
