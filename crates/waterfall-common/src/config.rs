//! Application configuration loaded from a YAML document.
//!
//! The document is sourced either from a file path or, failing that, from an
//! environment variable whose value is either itself a path or inline YAML.

use std::path::Path;
use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::ConfigError;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Name of the environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV_VAR: &str = "WATERFALL_CONFIG";

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("config not initialized. Call waterfall_common::config::init() first.")
}

/// Load configuration from an explicit path, falling back to `WATERFALL_CONFIG`,
/// validate it, and install it as the global configuration.
///
/// Should be called once at application startup, before any other code accesses config.
pub fn init(explicit_path: Option<&Path>) -> Result<&'static AppConfig, ConfigError> {
    let _ = dotenvy::dotenv();

    let raw = load_raw(explicit_path)?;
    let cfg: AppConfig = serde_yaml::from_str(&raw).map_err(ConfigError::Parse)?;
    cfg.validate()?;

    Ok(CONFIG.get_or_init(|| cfg))
}

fn load_raw(explicit_path: Option<&Path>) -> Result<String, ConfigError> {
    if let Some(path) = explicit_path {
        return std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        });
    }

    let var = std::env::var(CONFIG_ENV_VAR).map_err(|_| ConfigError::Missing)?;
    let as_path = Path::new(&var);
    if as_path.is_file() {
        return std::fs::read_to_string(as_path).map_err(|source| ConfigError::Read {
            path: var.clone(),
            source,
        });
    }

    Ok(var)
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub matrix: MatrixConfig,
    pub conference: ConferenceConfig,
    #[serde(default)]
    pub log: LogLevel,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatrixConfig {
    pub user_id: String,
    pub homeserver_url: String,
    pub access_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConferenceConfig {
    /// Seconds; must fall in 1..=30 (validated at load).
    pub keep_alive_timeout: u64,
    /// Seconds; must be >= 30 when present (validated at load).
    #[serde(default)]
    pub ping_interval: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl LogLevel {
    /// Maps to the nearest `tracing` level; `fatal`/`panic` collapse to `error`,
    /// matching the reference deployment's convention of logging and then exiting
    /// rather than relying on a dedicated tracing level.
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error | LogLevel::Fatal | LogLevel::Panic => tracing::Level::ERROR,
        }
    }
}

impl AppConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.matrix.user_id.is_empty() {
            return Err(ConfigError::Invalid {
                field: "matrix.user_id",
                reason: "must not be empty".into(),
            });
        }
        if self.matrix.homeserver_url.is_empty() {
            return Err(ConfigError::Invalid {
                field: "matrix.homeserver_url",
                reason: "must not be empty".into(),
            });
        }
        if self.matrix.access_token.is_empty() {
            return Err(ConfigError::Invalid {
                field: "matrix.access_token",
                reason: "must not be empty".into(),
            });
        }

        let keep_alive = self.conference.keep_alive_timeout;
        if !(1..=30).contains(&keep_alive) {
            return Err(ConfigError::Invalid {
                field: "conference.keep_alive_timeout",
                reason: format!("must be in 1..=30 seconds, got {keep_alive}"),
            });
        }

        if let Some(ping) = self.conference.ping_interval {
            if ping < 30 {
                return Err(ConfigError::Invalid {
                    field: "conference.ping_interval",
                    reason: format!("must be >= 30 seconds, got {ping}"),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
matrix:
  user_id: "@sfu:example.org"
  homeserver_url: "https://example.org"
  access_token: "secret"
conference:
  keep_alive_timeout: 10
  ping_interval: 30
log: debug
"#
    }

    fn parse(yaml: &str) -> Result<AppConfig, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(yaml).map_err(ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn parses_and_validates_a_well_formed_document() {
        let cfg = parse(sample_yaml()).unwrap();
        assert_eq!(cfg.matrix.user_id, "@sfu:example.org");
        assert_eq!(cfg.conference.keep_alive_timeout, 10);
        assert_eq!(cfg.conference.ping_interval, Some(30));
        assert_eq!(cfg.log, LogLevel::Debug);
    }

    #[test]
    fn defaults_log_level_to_info_when_absent() {
        let yaml = sample_yaml().replace("log: debug\n", "");
        let cfg = parse(&yaml).unwrap();
        assert_eq!(cfg.log, LogLevel::Info);
    }

    #[test]
    fn rejects_keep_alive_timeout_outside_bounds() {
        let yaml = sample_yaml().replace("keep_alive_timeout: 10", "keep_alive_timeout: 31");
        assert!(matches!(parse(&yaml), Err(ConfigError::Invalid { field, .. }) if field == "conference.keep_alive_timeout"));
    }

    #[test]
    fn rejects_ping_interval_below_thirty_seconds() {
        let yaml = sample_yaml().replace("ping_interval: 30", "ping_interval: 5");
        assert!(matches!(parse(&yaml), Err(ConfigError::Invalid { field, .. }) if field == "conference.ping_interval"));
    }

    #[test]
    fn rejects_empty_matrix_access_token() {
        let yaml = sample_yaml().replace("access_token: \"secret\"", "access_token: \"\"");
        assert!(matches!(parse(&yaml), Err(ConfigError::Invalid { field, .. }) if field == "matrix.access_token"));
    }

    #[test]
    fn load_raw_reads_an_explicit_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waterfall.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();
        let raw = load_raw(Some(&path)).unwrap();
        assert!(raw.contains("homeserver_url"));
    }
}
