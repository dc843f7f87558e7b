//! Configuration loading and representation.
//!
//! Settings come from a JSON document or from `STOCKBOOK_*` environment
//! variables. Unparseable environment values fall back to the default with a
//! warning; a configuration that cannot produce valid numbers is an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockbook_documents::DocumentType;
use stockbook_numbering::{FormatError, NumberingConfig};

pub const ENV_CONFIG_FILE: &str = "STOCKBOOK_CONFIG";
pub const ENV_MAX_ATTEMPTS: &str = "STOCKBOOK_MAX_ALLOCATION_ATTEMPTS";
pub const ENV_SEQUENCE_WIDTH: &str = "STOCKBOOK_SEQUENCE_WIDTH";
pub const ENV_AUDIT_AFTER_SYNC: &str = "STOCKBOOK_AUDIT_AFTER_SYNC";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DB_MAX_CONNECTIONS: &str = "STOCKBOOK_DB_MAX_CONNECTIONS";
/// Followed by the document type code, e.g. `STOCKBOOK_PREFIX_QUOTE=OFF`.
pub const ENV_PREFIX: &str = "STOCKBOOK_PREFIX_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid numbering config: {0}")]
    Numbering(#[from] FormatError),
}

/// Sync engine settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Re-check the balances touched by each sync right after it commits.
    pub audit_after_sync: bool,
}

/// Connection settings for the Postgres store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockbookConfig {
    pub numbering: NumberingConfig,
    pub sync: SyncConfig,
    pub database: DatabaseConfig,
}

impl StockbookConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment.
    ///
    /// `STOCKBOOK_CONFIG` names an optional JSON file used as the base; the
    /// individual variables override it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`StockbookConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(ENV_CONFIG_FILE) {
            Some(path) => {
                let json = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Io { path, source })?;
                serde_json::from_str(&json)?
            }
            None => Self::default(),
        };

        if let Some(v) = parse_var(&lookup, ENV_MAX_ATTEMPTS) {
            config.numbering.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_SEQUENCE_WIDTH) {
            config.numbering.sequence_width = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_AUDIT_AFTER_SYNC) {
            config.sync.audit_after_sync = v;
        }
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            config.database.url = Some(url);
        }
        if let Some(v) = parse_var(&lookup, ENV_DB_MAX_CONNECTIONS) {
            config.database.max_connections = v;
        }
        for t in DocumentType::ALL {
            if let Some(prefix) = lookup(&format!("{ENV_PREFIX}{}", t.code())) {
                config.numbering.prefixes.insert(t, prefix);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.numbering.validate()?;
        Ok(())
    }
}

fn parse_var<T: core::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = StockbookConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StockbookConfig::default());
        assert_eq!(config.numbering.max_attempts, 5);
        assert!(!config.sync.audit_after_sync);
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = StockbookConfig::from_lookup(lookup(&[
            (ENV_MAX_ATTEMPTS, "9"),
            (ENV_SEQUENCE_WIDTH, "6"),
            (ENV_AUDIT_AFTER_SYNC, "true"),
            ("STOCKBOOK_PREFIX_QUOTE", "OFF"),
        ]))
        .unwrap();
        assert_eq!(config.numbering.max_attempts, 9);
        assert_eq!(config.numbering.sequence_width, 6);
        assert!(config.sync.audit_after_sync);
        assert_eq!(config.numbering.prefix_for(DocumentType::Quote), "OFF");
    }

    #[test]
    fn database_settings_come_from_the_environment() {
        let config = StockbookConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://localhost/stock"),
            (ENV_DB_MAX_CONNECTIONS, "12"),
        ]))
        .unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/stock"));
        assert_eq!(config.database.max_connections, 12);
        assert_eq!(StockbookConfig::default().database.max_connections, 5);
    }

    #[test]
    fn garbage_values_fall_back_but_bad_prefixes_fail() {
        let config =
            StockbookConfig::from_lookup(lookup(&[(ENV_MAX_ATTEMPTS, "many")])).unwrap();
        assert_eq!(config.numbering.max_attempts, 5);

        let err = StockbookConfig::from_lookup(lookup(&[("STOCKBOOK_PREFIX_ORDER", "O 1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Numbering(FormatError::InvalidPrefix(_))));
    }

    #[test]
    fn json_config_with_partial_sections() {
        let config = StockbookConfig::from_json_str(
            r#"{ "sync": { "audit_after_sync": true }, "numbering": { "max_attempts": 3 } }"#,
        )
        .unwrap();
        assert!(config.sync.audit_after_sync);
        assert_eq!(config.numbering.max_attempts, 3);
        assert_eq!(config.numbering.sequence_width, 4);

        assert!(matches!(
            StockbookConfig::from_json_str(r#"{ "numbering": { "sequence_width": 0 } }"#),
            Err(ConfigError::Numbering(FormatError::InvalidWidth(0)))
        ));
    }
}
