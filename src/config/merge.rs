//! Merging YAML and environment configurations
//!
//! Priority: YAML > environment > defaults.

use std::path::PathBuf;

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{ApiKeyEntry, ConfigError, ServerConfig, TlsConfig};

pub(super) const DEFAULT_HOST: &str = "0.0.0.0";
pub(super) const DEFAULT_PORT: u16 = 8080;
pub(super) const DEFAULT_MAX_SIGNATURE_AGE_SECONDS: u64 = 10;
pub(super) const DEFAULT_MIN_NONCE_LENGTH: usize = 22;
pub(super) const DEFAULT_COLLABORATOR_TIMEOUT_SECONDS: u64 = 30;
pub(super) const DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND: u32 = 60;
pub(super) const DEFAULT_RATE_LIMIT_BURST_SIZE: u32 = 10;
pub(super) const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// Build the final configuration from the environment and an optional YAML file.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let env = EnvConfig::load()?;
    Ok(merge(yaml.unwrap_or_default(), env))
}

fn merge(yaml: YamlConfig, env: EnvConfig) -> ServerConfig {
    let server = yaml.server.unwrap_or_default();
    let auth = yaml.auth.unwrap_or_default();
    let session = yaml.session.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let tls = merge_tls(server.tls, env.tls_cert_path, env.tls_key_path);

    let api_keys = match auth.api_keys {
        Some(keys) => keys
            .into_iter()
            .map(|key| ApiKeyEntry {
                key_id: key.key_id,
                secret: key.secret,
            })
            .collect(),
        None => env.api_keys,
    };

    ServerConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: server.port.or(env.port).unwrap_or(DEFAULT_PORT),
        tls,
        api_keys,
        allow_unsigned_requests: auth
            .allow_unsigned_requests
            .or(env.allow_unsigned_requests)
            .unwrap_or(true),
        max_signature_age_seconds: auth
            .max_signature_age_seconds
            .or(env.max_signature_age_seconds)
            .unwrap_or(DEFAULT_MAX_SIGNATURE_AGE_SECONDS),
        min_nonce_length: auth
            .min_nonce_length
            .or(env.min_nonce_length)
            .unwrap_or(DEFAULT_MIN_NONCE_LENGTH),
        collaborator_timeout_seconds: session
            .collaborator_timeout_seconds
            .or(env.collaborator_timeout_seconds)
            .unwrap_or(DEFAULT_COLLABORATOR_TIMEOUT_SECONDS),
        rate_limit_requests_per_second: security
            .rate_limit_requests_per_second
            .or(env.rate_limit_requests_per_second)
            .unwrap_or(DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND),
        rate_limit_burst_size: security
            .rate_limit_burst_size
            .or(env.rate_limit_burst_size)
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST_SIZE),
        max_websocket_connections: security
            .max_websocket_connections
            .or(env.max_websocket_connections),
        max_connections_per_ip: security
            .max_connections_per_ip
            .or(env.max_connections_per_ip)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP),
    }
}

/// TLS is on when YAML enables it, or when the environment names both files.
///
/// `enabled: false` in YAML turns TLS off regardless of the environment.
fn merge_tls(
    yaml: Option<super::yaml::TlsYaml>,
    env_cert: Option<String>,
    env_key: Option<String>,
) -> Option<TlsConfig> {
    let yaml = yaml.unwrap_or_default();
    if yaml.enabled == Some(false) {
        return None;
    }

    let cert = yaml.cert_path.or(env_cert)?;
    let key = yaml.key_path.or(env_key)?;
    Some(TlsConfig {
        cert_path: PathBuf::from(cert),
        key_path: PathBuf::from(key),
    })
}
