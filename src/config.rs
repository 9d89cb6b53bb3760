//! Application configuration loaded from a TOML file with environment
//! overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    errors::{Error, Result},
    ledger::DEFAULT_RETENTION_DAYS,
    runtime::handle::RuntimeConfig,
    types::Money,
};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "GROCERYLOG_CONFIG";
/// Configuration file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "grocerylog.toml";
/// Overrides `database_path`.
pub const DATABASE_PATH_ENV: &str = "GROCERYLOG_DATABASE_PATH";
/// Overrides `retention_days`.
pub const RETENTION_DAYS_ENV: &str = "GROCERYLOG_RETENTION_DAYS";

/// Settings for the binary and the runtime.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Days of trip history kept.
    pub retention_days: u32,
    /// Persistence batching and cleanup timer.
    pub runtime: RuntimeConfig,
    /// Known stores and their monthly budgets.
    pub stores: Vec<StoreConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/grocerylog.sqlite"),
            retention_days: DEFAULT_RETENTION_DAYS,
            runtime: RuntimeConfig::default(),
            stores: Vec::new(),
        }
    }
}

/// A store the user shops at.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoreConfig {
    /// Display name, matched exactly.
    pub name: String,
    /// Monthly budget in dollars.
    #[serde(default)]
    pub budget: Option<f64>,
}

impl StoreConfig {
    /// Budget as an exact amount, if one is set and finite.
    pub fn budget(&self) -> Option<Money> {
        self.budget.and_then(Money::from_dollars)
    }
}

impl AppConfig {
    /// Settings for the store named exactly `name`.
    pub fn store(&self, name: &str) -> Option<&StoreConfig> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Applies `GROCERYLOG_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup(DATABASE_PATH_ENV).filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(days) = lookup(RETENTION_DAYS_ENV) {
            self.retention_days = days.trim().parse().map_err(|e| Error::Config {
                message: format!("{RETENTION_DAYS_ENV}={days:?} is not a number of days: {e}"),
            })?;
        }
        Ok(())
    }
}

/// Parses TOML configuration text. Missing keys take their defaults.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("failed to parse configuration: {e}"),
    })
}

/// Reads and parses the configuration file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("failed to read config file {path_ref:?}: {e}"),
    })?;
    parse_config(&contents).map_err(|err| match err {
        Error::Config { message } => Error::Config {
            message: format!("{path_ref:?}: {message}"),
        },
        other => other,
    })
}

/// Loads the file named by `GROCERYLOG_CONFIG` (default `grocerylog.toml`),
/// falling back to defaults when it does not exist, then applies environment
/// overrides.
pub fn load_app_configuration() -> Result<AppConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = if Path::new(&path).exists() {
        load_config(&path)?
    } else {
        info!(%path, "no configuration file, using defaults");
        AppConfig::default()
    };
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_configuration() {
        let config = parse_config(
            r#"
            database_path = "/tmp/groceries.sqlite"
            retention_days = 45

            [runtime]
            batch_max_latency_ms = 500

            [[stores]]
            name = "Trader Joe's"
            budget = 400.0

            [[stores]]
            name = "Costco"
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/groceries.sqlite"));
        assert_eq!(config.retention_days, 45);
        assert_eq!(config.runtime.batch_max_latency_ms, 500);
        assert_eq!(config.runtime.batch_max_writes, 32);
        assert_eq!(config.store("Trader Joe's").unwrap().budget(), Some(Money::from_cents(40_000)));
        assert_eq!(config.store("Costco").unwrap().budget(), None);
    }

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(parse_config("").unwrap(), AppConfig::default());
    }

    #[test]
    fn env_overrides_win() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|key| match key {
                DATABASE_PATH_ENV => Some("/var/lib/grocerylog.sqlite".to_string()),
                RETENTION_DAYS_ENV => Some(" 7 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/grocerylog.sqlite"));
        assert_eq!(config.retention_days, 7);

        let err = config
            .apply_env_overrides(|key| (key == RETENTION_DAYS_ENV).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn load_config_reports_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grocerylog.toml");
        std::fs::write(&path, "retention_days = 14\n").unwrap();
        assert_eq!(load_config(&path).unwrap().retention_days, 14);

        std::fs::write(&path, "retention_days = \"two weeks\"\n").unwrap();
        let message = load_config(&path).unwrap_err().to_string();
        assert!(message.contains("grocerylog.toml"), "{message}");
        assert!(message.contains("failed to parse configuration"), "{message}");

        assert!(load_config(dir.path().join("missing.toml")).is_err());
    }
}
