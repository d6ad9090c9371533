//! Configuration for the exporter.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Terraform Cloud/Enterprise API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Terraform Cloud/Enterprise API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Organization names to scrape from. Empty means every organization
    /// visible to the token.
    #[serde(default)]
    pub organizations: Vec<String>,

    /// User token for authenticating with the API.
    #[serde(default)]
    pub token: String,

    /// File containing the API token; its first line is used and it takes
    /// precedence over `token`.
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// API address to scrape metrics from (default: "https://app.terraform.io/").
    #[serde(default = "default_api_address")]
    pub address: String,

    /// Accept any certificate presented by the API.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

fn default_api_address() -> String {
    tfc_api::DEFAULT_ADDRESS.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            organizations: Vec::new(),
            token: String::new(),
            token_file: None,
            address: default_api_address(),
            insecure_skip_verify: false,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on for web interface and telemetry
    /// (default: "0.0.0.0:9100").
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:9100".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ExporterConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate listen address format
        if self
            .server
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.server.listen
            )));
        }

        if self.api.address.is_empty() {
            return Err(ConfigError::Validation(
                "API address must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl ApiConfig {
    /// Resolve the API token: the first line of `token_file` when set,
    /// otherwise the inline `token`.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(path) = &self.token_file {
            let content = std::fs::read_to_string(path)?;
            let token = content.lines().next().unwrap_or("").trim().to_string();
            if token.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "API token file {} is empty",
                    path.display()
                )));
            }
            return Ok(token);
        }

        if !self.token.is_empty() {
            return Ok(self.token.clone());
        }

        Err(ConfigError::Validation(
            "Missing API token: set api.token, api.token_file or TF_API_TOKEN".to_string(),
        ))
    }
}
