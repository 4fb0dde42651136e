//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// The local proxy definition
    pub proxy: ProxyConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether metrics endpoint is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// The local load-balancing proxy in front of the control plane.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Logical service name, used for logging, metrics labels, and the
    /// persisted-state file name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Originally configured server URL; the fallback endpoint is derived
    /// from its host and port
    pub server_url: String,

    /// Agent data directory holding the persisted address state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Local loopback port the proxy listens on
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Per-attempt backend dial timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// When false, no local listener is started and consumers dial the
    /// configured server URL directly
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> SocketAddr {
    "127.0.0.1:9090".parse().unwrap()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_service_name() -> String {
    "etcd-server".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/agentlb")
}

fn default_listen_port() -> u16 {
    2379
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let yaml = r#"
proxy:
  server_url: "https://10.0.0.1:2379"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.log_format, LogFormat::Json);
        assert_eq!(config.proxy.service_name, "etcd-server");
        assert_eq!(config.proxy.listen_port, 2379);
        assert_eq!(config.proxy.connect_timeout, Duration::from_secs(5));
        assert!(config.proxy.enabled);
    }

    #[test]
    fn test_humantime_durations() {
        let yaml = r#"
proxy:
  server_url: "https://10.0.0.1:2379"
  connect_timeout: 500ms
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.proxy.connect_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
global:
  log_level: debug
  log_format: pretty
  metrics:
    enabled: false
    address: "127.0.0.1:9100"
proxy:
  service_name: apiserver
  server_url: "https://10.0.0.1:6443"
  data_dir: /tmp/agent
  listen_port: 6444
  connect_timeout: 2s
  enabled: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.global.log_level, "debug");
        assert!(!config.global.metrics.enabled);
        assert_eq!(config.proxy.service_name, "apiserver");
        assert_eq!(config.proxy.listen_port, 6444);
        assert!(!config.proxy.enabled);
    }
}
