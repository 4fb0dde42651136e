//! Configuration validation.

use crate::config::Config;
use url::Url;

/// Validate a parsed configuration.
///
/// Returns a human-readable description of the first problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let proxy = &config.proxy;

    if proxy.service_name.is_empty() {
        return Err("proxy.service_name must not be empty".to_string());
    }

    let url = Url::parse(&proxy.server_url)
        .map_err(|e| format!("proxy.server_url '{}' is invalid: {e}", proxy.server_url))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(format!(
                "proxy.server_url scheme must be http or https, got '{other}'"
            ));
        }
    }

    if url.host_str().is_none() {
        return Err(format!(
            "proxy.server_url '{}' has no host",
            proxy.server_url
        ));
    }

    if proxy.connect_timeout.is_zero() {
        return Err("proxy.connect_timeout must be greater than zero".to_string());
    }

    if config.global.metrics.enabled && !config.global.metrics.path.starts_with('/') {
        return Err(format!(
            "metrics path '{}' must start with '/'",
            config.global.metrics.path
        ));
    }

    match config.global.log_level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => return Err(format!("unknown log level '{other}'")),
    }

    Ok(())
}
