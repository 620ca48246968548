//! Configuration Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::relay::DEFAULT_MAX_LINE_LENGTH;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

/// Client behaviour configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Capacity of the read buffer in front of the socket
    pub read_buffer_size: usize,
    /// Longest inbound line accepted before the connection is dropped
    pub max_line_length: usize,
    /// Prepended to inbound lines when rendered
    pub server_prefix: String,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8192,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            server_prefix: "Server: ".to_string(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "localhost".to_string(),
                port: 12345,
                connect_timeout: default_connect_timeout(),
            },
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// `host:port` form used in logs and messages
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
