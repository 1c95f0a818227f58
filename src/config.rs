//! Service configuration
//!
//! Layered, later sources win:
//! 1. built-in defaults
//! 2. TOML file at `$ORCH_CONFIG`, or `config/orchestration.toml` if present
//! 3. `ORCH__<SECTION>__<KEY>` environment variables (a `.env` file is loaded first)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::BudgetConfig;
use crate::error::{Error, Result};
use crate::persistence::PersistenceSettings;

const CONFIG_PATH_VAR: &str = "ORCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/orchestration.toml";
const ENV_PREFIX: &str = "ORCH";

/// Root configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: BudgetConfig,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load from the default locations and the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(Some(&path))
    }

    /// Load with an explicit (optional) file
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path.to_path_buf()).required(false));
        }

        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.server.body_limit_bytes == 0 {
            return Err(Error::Config("server.body_limit_bytes must be > 0".to_string()));
        }
        if self.persistence.queue_capacity == 0 {
            return Err(Error::Config("persistence.queue_capacity must be > 0".to_string()));
        }
        if self.persistence.write_timeout_ms == 0 {
            return Err(Error::Config("persistence.write_timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert!(config.persistence.sqlite_path.is_none());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load_from(Some(Path::new("/nonexistent/orchestration.toml"))).unwrap();
        assert_eq!(config.engine.daily_token_limit, 500_000);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9191

[engine]
daily_token_limit = 20000
downgrade_model = "claude-haiku-3"

[persistence]
sqlite_path = "usage.db"
"#
        )
        .unwrap();

        let config = Config::load_from(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9191);
        assert_eq!(config.engine.daily_token_limit, 20000);
        assert_eq!(config.engine.downgrade_model, "claude-haiku-3");
        assert_eq!(config.engine.default_model, "claude-sonnet-4-20250514");
        assert_eq!(config.persistence.sqlite_path, Some(PathBuf::from("usage.db")));
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]\nbudget_warning_threshold = 3.0").unwrap();
        assert!(Config::load_from(Some(file.path())).is_err());
    }
}
