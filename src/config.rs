use chrono::Duration;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Environment variable naming the configuration file.
pub const CONFIG_FILE_ENV: &str = "LEDGER_CONFIG";

/// Configuration file used when [`CONFIG_FILE_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "Ledger.toml";

/// Application configuration, derived from defaults, `Ledger.toml` and
/// `LEDGER_*` environment variables, in increasing order of precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    // secrets
    db_uri: String,
    // non-secrets
    db_name: String,
    conflict_retries: u32,
    retry_interval_secs: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_uri: "mongodb://localhost:27017".to_string(),
            db_name: "vote_ledger".to_string(),
            conflict_retries: crate::ledger::DEFAULT_CONFLICT_RETRIES,
            retry_interval_secs: 300,
        }
    }
}

impl Config {
    /// The configuration sources, merged.
    pub fn figment() -> Figment {
        let file = std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("LEDGER_"))
    }

    pub fn load() -> Result<Self> {
        Ok(Self::figment().extract()?)
    }

    /// MongoDB connection string.
    /// Configured via `LEDGER_DB_URI`.
    pub fn db_uri(&self) -> &str {
        &self.db_uri
    }

    /// Name of the database holding the ledger's collections.
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// How many times a write that lost a race is retried.
    pub fn conflict_retries(&self) -> u32 {
        self.conflict_retries
    }

    /// Delay before a failed scheduled transition is attempted again.
    pub fn retry_interval(&self) -> Duration {
        Duration::seconds(self.retry_interval_secs.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use figment::Jail;

    #[test]
    fn defaults() {
        Jail::expect_with(|_jail| {
            let config: Config = Config::figment().extract()?;
            assert_eq!(config, Config::default());
            assert_eq!(config.retry_interval(), Duration::minutes(5));
            Ok(())
        });
    }

    #[test]
    fn file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                    db_name = "from_file"
                    conflict_retries = 2
                    retry_interval_secs = 10
                "#,
            )?;
            jail.set_env("LEDGER_CONFLICT_RETRIES", "9");
            jail.set_env("LEDGER_DB_URI", "mongodb://ledger-db:27017/?replicaSet=rs0");

            let config: Config = Config::figment().extract()?;
            assert_eq!(config.db_name(), "from_file");
            assert_eq!(config.conflict_retries(), 9);
            assert_eq!(config.db_uri(), "mongodb://ledger-db:27017/?replicaSet=rs0");
            assert_eq!(config.retry_interval(), Duration::seconds(10));
            Ok(())
        });
    }

    #[test]
    fn alternative_file() {
        Jail::expect_with(|jail| {
            jail.create_file("staging.toml", r#"db_name = "staging""#)?;
            jail.set_env(CONFIG_FILE_ENV, "staging.toml");

            let config = Config::load().map_err(|err| err.to_string())?;
            assert_eq!(config.db_name(), "staging");
            Ok(())
        });
    }
}
