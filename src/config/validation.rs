//! Configuration validation logic

use std::collections::HashSet;

use super::{ConfigError, ServerConfig};

/// Validate the merged configuration.
///
/// # Errors
/// Returns `ConfigError::Validation` describing the first problem found.
pub(super) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_api_keys(config)?;
    validate_limits(config)?;
    validate_tls(config)?;
    Ok(())
}

fn validate_api_keys(config: &ServerConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for entry in &config.api_keys {
        if entry.key_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "API key id must not be empty".to_string(),
            ));
        }
        if entry.secret.is_empty() {
            return Err(ConfigError::Validation(format!(
                "API key '{}' has an empty secret",
                entry.key_id
            )));
        }
        if !seen.insert(entry.key_id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "API key '{}' is configured more than once",
                entry.key_id
            )));
        }
    }

    if !config.allow_unsigned_requests && config.api_keys.is_empty() {
        return Err(ConfigError::Validation(
            "Unsigned requests are disabled but no API keys are configured".to_string(),
        ));
    }

    Ok(())
}

fn validate_limits(config: &ServerConfig) -> Result<(), ConfigError> {
    let positive = [
        ("max_signature_age_seconds", config.max_signature_age_seconds),
        ("collaborator_timeout_seconds", config.collaborator_timeout_seconds),
        (
            "rate_limit_requests_per_second",
            u64::from(config.rate_limit_requests_per_second),
        ),
        ("rate_limit_burst_size", u64::from(config.rate_limit_burst_size)),
        ("max_connections_per_ip", u64::from(config.max_connections_per_ip)),
    ];
    for (name, value) in positive {
        if value == 0 {
            return Err(ConfigError::Validation(format!(
                "{name} must be greater than zero"
            )));
        }
    }

    if config.max_websocket_connections == Some(0) {
        return Err(ConfigError::Validation(
            "max_websocket_connections must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_tls(config: &ServerConfig) -> Result<(), ConfigError> {
    let Some(tls) = &config.tls else {
        return Ok(());
    };

    for (label, path) in [("certificate", &tls.cert_path), ("key", &tls.key_path)] {
        if !path.exists() {
            return Err(ConfigError::Validation(format!(
                "TLS {label} file not found: {}",
                path.display()
            )));
        }
    }

    Ok(())
}
