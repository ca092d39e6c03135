//! Configuration module for the AudioConnector gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use audioconnector_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// An API key the gateway accepts, with the shared secret used to sign requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyEntry {
    pub key_id: String,
    pub secret: String,
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway:
/// - Server settings (host, port, TLS)
/// - Upgrade authentication (API keys, signature policy)
/// - Session settings (collaborator timeout)
/// - Security settings (rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Authentication configuration
    /// Known API keys and their signing secrets
    pub api_keys: Vec<ApiKeyEntry>,
    /// Accept upgrade requests that carry no signature at all
    /// Default: true
    pub allow_unsigned_requests: bool,
    /// Signatures older than this are rejected
    /// Default: 10
    pub max_signature_age_seconds: u64,
    /// Minimum length of the signature nonce
    /// Default: 22
    pub min_nonce_length: usize,

    // Session configuration
    /// Upper bound for a single bot call before the session is disconnected
    /// Default: 30
    pub collaborator_timeout_seconds: u64,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        for entry in &mut self.api_keys {
            entry.secret.zeroize();
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: merge::DEFAULT_HOST.to_string(),
            port: merge::DEFAULT_PORT,
            tls: None,
            api_keys: Vec::new(),
            allow_unsigned_requests: true,
            max_signature_age_seconds: merge::DEFAULT_MAX_SIGNATURE_AGE_SECONDS,
            min_nonce_length: merge::DEFAULT_MIN_NONCE_LENGTH,
            collaborator_timeout_seconds: merge::DEFAULT_COLLABORATOR_TIMEOUT_SECONDS,
            rate_limit_requests_per_second: merge::DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND,
            rate_limit_burst_size: merge::DEFAULT_RATE_LIMIT_BURST_SIZE,
            max_websocket_connections: None,
            max_connections_per_ip: merge::DEFAULT_MAX_CONNECTIONS_PER_IP,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// The `.env` file is loaded in `main.rs` before this is called, so its
    /// values are visible here as regular environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_seconds)
    }

    /// `(key_id, secret)` pairs for the secret store
    pub fn api_key_secrets(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.api_keys
            .iter()
            .map(|entry| (entry.key_id.as_str(), entry.secret.as_bytes()))
    }
}

/// Parse the `API_KEYS_JSON` format: `[{"key_id": "...", "secret": "..."}]`
pub(crate) fn parse_api_keys_json(json_str: &str) -> Result<Vec<ApiKeyEntry>, ConfigError> {
    #[derive(serde::Deserialize)]
    struct ApiKeyJson {
        key_id: String,
        secret: String,
    }

    let entries: Vec<ApiKeyJson> =
        serde_json::from_str(json_str).map_err(|e| ConfigError::InvalidValue {
            name: "API_KEYS_JSON".to_string(),
            message: e.to_string(),
        })?;

    Ok(entries
        .into_iter()
        .map(|entry| ApiKeyEntry {
            key_id: entry.key_id,
            secret: entry.secret,
        })
        .collect())
}
