//! Configuration management for the Red Button client.
//!
//! Settings are loaded from a TOML file, created with defaults when missing,
//! then overridden by command-line flags and validated.

use crate::cli::CliArgs;
use game_session::{
    CapacityPolicy, Dialect, LogPolicy, RetryPolicy, SessionConfig, DEFAULT_BROKER_PORT,
    DEFAULT_LOG_CAPACITY,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_port() -> u16 {
    DEFAULT_BROKER_PORT
}

fn default_update_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the broker is and which dialect it speaks
    #[serde(default)]
    pub broker: BrokerSettings,
    /// Visible log capacities
    #[serde(default)]
    pub session: SessionSettings,
    /// Connection retry policy
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Origin of the game page; the broker shares its host
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Port of the broker's WebSocket listener
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub dialect: Dialect,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            port: default_port(),
            dialect: Dialect::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Entries kept after a game update is appended
    #[serde(default = "default_update_capacity")]
    pub update_capacity: usize,
    /// Entries kept after an instruction is appended; unset means no limit
    #[serde(default)]
    pub instruction_capacity: Option<usize>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            update_capacity: default_update_capacity(),
            instruction_capacity: None,
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written at
    /// `path` and the defaults are returned.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file settings.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(origin) = &args.origin {
            self.broker.origin = origin.clone();
        }
        if let Some(dialect) = args.dialect {
            self.broker.dialect = dialect;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Converts the file settings into what the session layer expects.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            broker_port: self.broker.port,
            dialect: self.broker.dialect,
            log_policy: LogPolicy {
                updates: CapacityPolicy::Bounded(self.session.update_capacity),
                instructions: match self.session.instruction_capacity {
                    Some(capacity) => CapacityPolicy::Bounded(capacity),
                    None => CapacityPolicy::Unbounded,
                },
            },
            retry: self.retry.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.broker.port == 0 {
            return Err("broker.port must be greater than 0".to_string());
        }

        if self.session.update_capacity == 0 {
            return Err("session.update_capacity must be greater than 0".to_string());
        }
        if self.session.instruction_capacity == Some(0) {
            return Err("session.instruction_capacity must be greater than 0 when set".to_string());
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(format!(
                "retry.jitter_factor must be between 0.0 and 1.0, got {}",
                self.retry.jitter_factor
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err("retry.max_delay_ms cannot be less than retry.base_delay_ms".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.broker.origin, "http://localhost:3000");
        assert_eq!(config.broker.port, 9222);
        assert_eq!(config.broker.dialect, Dialect::Game);
        assert_eq!(config.session.update_capacity, 10);
        assert!(config.session.instruction_capacity.is_none());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.logging.level, "warn");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redbutton.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.broker.port, 9222);

        // The defaults were written out and read back the same.
        assert!(path.exists());
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.broker.origin, config.broker.origin);
        assert_eq!(reloaded.retry, config.retry);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[broker]
origin = "https://redbutton.example:3000"
port = 4223
dialect = "world"

[session]
update_capacity = 25
instruction_capacity = 50

[retry]
max_retries = 0

[logging]
level = "debug"
json_format = true
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = AppConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.broker.origin, "https://redbutton.example:3000");
        assert_eq!(config.broker.port, 4223);
        assert_eq!(config.broker.dialect, Dialect::World);
        assert_eq!(config.session.instruction_capacity, Some(50));
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.base_delay_ms, RetryPolicy::default().base_delay_ms);
        assert_eq!(config.logging.level, "debug");

        let session = config.to_session_config();
        assert_eq!(session.broker_port, 4223);
        assert_eq!(session.log_policy.updates, CapacityPolicy::Bounded(25));
        assert_eq!(session.log_policy.instructions, CapacityPolicy::Bounded(50));
    }

    #[tokio::test]
    async fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[broker\nport = ").unwrap();
        assert!(AppConfig::load_from_file(file.path()).await.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();

        config.broker.port = 0;
        assert!(config.validate().is_err());
        config.broker.port = 9222;

        config.session.update_capacity = 0;
        assert!(config.validate().is_err());
        config.session.update_capacity = 10;

        config.session.instruction_capacity = Some(0);
        assert!(config.validate().is_err());
        config.session.instruction_capacity = None;

        config.retry.jitter_factor = 1.5;
        assert!(config.validate().is_err());
        config.retry.jitter_factor = 0.2;

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "info".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs::try_parse_from([
            "redbutton",
            "--origin",
            "https://elsewhere:3000",
            "--dialect",
            "world",
            "--log-level",
            "trace",
            "--json-logs",
        ])
        .unwrap();

        config.apply_overrides(&args);
        assert_eq!(config.broker.origin, "https://elsewhere:3000");
        assert_eq!(config.broker.dialect, Dialect::World);
        assert_eq!(config.logging.level, "trace");
        assert!(config.logging.json_format);
        assert_eq!(config.to_session_config().log_policy.instructions, CapacityPolicy::Unbounded);
    }
}
