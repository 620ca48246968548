//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{Context, bail};
use std::path::Path;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config.validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        Self::load_from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from defaults and a variable lookup
    pub fn load_from_vars<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(host) = lookup("PARKCLIENT_HOST") {
            config.server.host = host;
        }

        if let Some(port) = lookup("PARKCLIENT_PORT") {
            config.server.port = port.parse::<u16>()
                .with_context(|| format!("Invalid PARKCLIENT_PORT: {}", port))?;
        }

        if let Some(timeout) = lookup("PARKCLIENT_CONNECT_TIMEOUT") {
            config.server.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid PARKCLIENT_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Some(log_level) = lookup("PARKCLIENT_LOG_LEVEL") {
            config.logging.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_client_config()
            .with_context(|| "Client configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            bail!("host must not be empty");
        }

        if self.server.port == 0 {
            bail!("port must be greater than 0");
        }

        if self.server.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }

        if self.server.connect_timeout > Duration::from_secs(300) {
            bail!("connect_timeout cannot exceed 5 minutes");
        }

        Ok(())
    }

    fn validate_client_config(&self) -> Result<()> {
        if self.client.read_buffer_size < 1024 {
            bail!("read_buffer_size must be at least 1024 bytes");
        }

        if self.client.read_buffer_size > 1048576 {
            bail!("read_buffer_size cannot exceed 1MB");
        }

        if self.client.max_line_length < 1024 {
            bail!("max_line_length must be at least 1024 bytes");
        }

        if self.client.max_line_length > 16 * 1048576 {
            bail!("max_line_length cannot exceed 16MB");
        }

        if self.client.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.log_level.as_str()) {
            bail!("logging.log_level must be one of: {}", VALID_LOG_LEVELS.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        host: Option<&str>,
        port: Option<u16>,
        timeout: Option<u64>,
        log_level: Option<&str>,
    ) {
        if let Some(host) = host {
            self.server.host = host.to_string();
            tracing::info!("CLI override: host set to {}", host);
        }

        if let Some(port) = port {
            self.server.port = port;
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(timeout_secs) = timeout {
            self.server.connect_timeout = Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: connect timeout set to {}s", timeout_secs);
        }

        if let Some(level) = log_level {
            self.logging.log_level = level.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.endpoint(), "localhost:12345");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.host = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.connect_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.client.read_buffer_size = 16;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.client.max_line_length = 80;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.client.max_line_length = 64 * 1048576;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_vars() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PARKCLIENT_HOST", "10.0.0.7"),
            ("PARKCLIENT_PORT", "4000"),
            ("PARKCLIENT_CONNECT_TIMEOUT", "3s"),
            ("PARKCLIENT_LOG_LEVEL", "debug"),
        ]);

        let config = ConfigManager::load_from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.server.host, "10.0.0.7");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.logging.log_level, "debug");
    }

    #[test]
    fn test_load_from_vars_invalid_port() {
        let result = ConfigManager::load_from_vars(|name| {
            (name == "PARKCLIENT_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_with_cli_args() {
        let mut config = Config::default();
        config.merge_with_cli_args(Some("127.0.0.1"), Some(9000), Some(2), Some("warn"));

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.logging.log_level, "warn");

        let mut untouched = Config::default();
        untouched.merge_with_cli_args(None, None, None, None);
        assert_eq!(untouched.server.port, 12345);
    }
}
