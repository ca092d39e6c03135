//! Environment variable loading
//!
//! Every value is optional here; defaults are applied by the merge step.

use std::env;
use std::str::FromStr;

use super::{ApiKeyEntry, ConfigError, parse_api_keys_json};

/// Configuration values read from the process environment
#[derive(Debug, Default)]
pub(super) struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub api_keys: Vec<ApiKeyEntry>,
    pub allow_unsigned_requests: Option<bool>,
    pub max_signature_age_seconds: Option<u64>,
    pub min_nonce_length: Option<usize>,
    pub collaborator_timeout_seconds: Option<u64>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl EnvConfig {
    pub(super) fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            host: string_var("HOST"),
            port: parsed_var("PORT")?,
            tls_cert_path: string_var("TLS_CERT_PATH"),
            tls_key_path: string_var("TLS_KEY_PATH"),
            api_keys: api_keys()?,
            allow_unsigned_requests: bool_var("ALLOW_UNSIGNED_REQUESTS")?,
            max_signature_age_seconds: parsed_var("MAX_SIGNATURE_AGE_SECONDS")?,
            min_nonce_length: parsed_var("MIN_NONCE_LENGTH")?,
            collaborator_timeout_seconds: parsed_var("COLLABORATOR_TIMEOUT_SECONDS")?,
            rate_limit_requests_per_second: parsed_var("RATE_LIMIT_REQUESTS_PER_SECOND")?,
            rate_limit_burst_size: parsed_var("RATE_LIMIT_BURST_SIZE")?,
            max_websocket_connections: parsed_var("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: parsed_var("MAX_CONNECTIONS_PER_IP")?,
        })
    }
}

/// `API_KEYS_JSON` wins over the single `API_KEY`/`API_SECRET` pair.
fn api_keys() -> Result<Vec<ApiKeyEntry>, ConfigError> {
    if let Some(json) = string_var("API_KEYS_JSON") {
        return parse_api_keys_json(&json);
    }

    match (string_var("API_KEY"), string_var("API_SECRET")) {
        (Some(key_id), Some(secret)) => Ok(vec![ApiKeyEntry { key_id, secret }]),
        (None, None) => Ok(Vec::new()),
        _ => Err(ConfigError::InvalidValue {
            name: "API_KEY".to_string(),
            message: "API_KEY and API_SECRET must be set together".to_string(),
        }),
    }
}

/// Unset and blank variables both read as `None`.
fn string_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    string_var(name)
        .map(|value| {
            value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("{value:?}: {e}"),
            })
        })
        .transpose()
}

fn bool_var(name: &str) -> Result<Option<bool>, ConfigError> {
    string_var(name)
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("{value:?} is not a boolean"),
            }),
        })
        .transpose()
}
