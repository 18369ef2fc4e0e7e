//! Configuration
//!
//! Configuration structures for server and client.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::protocol::MAX_FRAME_BYTES;
use crate::room::MIN_CODE_LENGTH;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS is enabled when both certfile and keyfile are set
    #[serde(default)]
    pub certfile: Option<PathBuf>,
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
    #[serde(default = "default_code_length")]
    pub code_length: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_code_length() -> usize {
    MIN_CODE_LENGTH
}

fn default_max_frame_bytes() -> usize {
    MAX_FRAME_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            certfile: None,
            keyfile: None,
            code_length: MIN_CODE_LENGTH,
            max_frame_bytes: MAX_FRAME_BYTES,
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.code_length < MIN_CODE_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "code_length must be at least {}",
                MIN_CODE_LENGTH
            )));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_frame_bytes must be positive".to_string(),
            ));
        }
        if self.certfile.is_some() != self.keyfile.is_some() {
            return Err(ConfigError::Invalid(
                "certfile and keyfile must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Certificate and key paths when TLS is configured
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        match (&self.certfile, &self.keyfile) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    /// Trusted CA for the server certificate; any certificate is accepted when unset
    #[serde(default)]
    pub ca_certfile: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            port: default_port(),
            tls: false,
            ca_certfile: None,
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Log filter to start with: the command line wins over the config file
pub fn resolve_log_level<'a>(cli: Option<&'a str>, configured: &'a str) -> &'a str {
    cli.unwrap_or(configured)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.code_length, 6);
        assert!(config.tls_files().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_server_config() {
        let config: ServerConfig = toml::from_str("port = 9000\ncode_length = 8\n").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.code_length, 8);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.max_frame_bytes, MAX_FRAME_BYTES);
    }

    #[test]
    fn test_invalid_server_config() {
        let short_codes = ServerConfig {
            code_length: 4,
            ..ServerConfig::default()
        };
        assert!(short_codes.validate().is_err());

        let half_tls = ServerConfig {
            certfile: Some(PathBuf::from("server.crt")),
            ..ServerConfig::default()
        };
        assert!(half_tls.validate().is_err());
    }

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_host, "127.0.0.1");
        assert!(!config.tls);
    }

    #[test]
    fn test_client_log_level_from_file() {
        let config: ClientConfig = toml::from_str("log_level = \"debug\"\n").unwrap();
        assert_eq!(resolve_log_level(None, &config.log_level), "debug");
        assert_eq!(resolve_log_level(Some("warn"), &config.log_level), "warn");
        assert_eq!(
            resolve_log_level(None, &ClientConfig::default().log_level),
            "info"
        );
    }
}
