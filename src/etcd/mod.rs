//! Stable etcd client endpoint for the rest of the system.
//!
//! Thin specialization of the load balancer: when proxying is enabled the
//! agent dials a loopback address that fans out over the etcd members the
//! watching controller reports; when disabled everything goes straight to
//! the originally configured etcd URL.

use crate::loadbalancer::{LoadBalancer, LoadBalancerError};
use crate::metrics::MetricsCollector;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

/// Service name of the etcd load balancer, also the persisted-state file
/// name under the data directory.
pub const ETCD_SERVER_SERVICE_NAME: &str = "etcd-server";

/// Local proxy for the etcd client endpoint.
///
/// The delegate is optional rather than a trait object: enabled and
/// disabled differ only by a flag check.
pub struct EtcdProxy {
    /// The originally configured etcd client URL.
    initial_etcd_url: String,
    /// Fallback `host:port` derived from the initial URL.
    fallback_address: String,
    lb: Option<Arc<LoadBalancer>>,
}

impl EtcdProxy {
    /// Build the proxy. When `enabled`, a [`LoadBalancer`] for
    /// [`ETCD_SERVER_SERVICE_NAME`] is constructed (seeded from any state
    /// persisted under `data_dir`) and its local address becomes the etcd
    /// URL the rest of the system uses.
    pub fn new(
        enabled: bool,
        data_dir: &Path,
        etcd_url: &str,
        listen_port: u16,
        connect_timeout: Duration,
        metrics: MetricsCollector,
    ) -> Result<Self, LoadBalancerError> {
        let url = Url::parse(etcd_url).map_err(|source| LoadBalancerError::InvalidServerUrl {
            url: etcd_url.to_string(),
            source,
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| LoadBalancerError::MissingHost(etcd_url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| LoadBalancerError::MissingPort(etcd_url.to_string()))?;

        let lb = if enabled {
            Some(Arc::new(LoadBalancer::new(
                data_dir,
                ETCD_SERVER_SERVICE_NAME,
                etcd_url,
                listen_port,
                connect_timeout,
                metrics,
            )?))
        } else {
            None
        };

        Ok(Self {
            initial_etcd_url: etcd_url.to_string(),
            fallback_address: format!("{host}:{port}"),
            lb,
        })
    }

    /// Start the wrapped load balancer's listener, if proxying is enabled.
    pub async fn start(
        &self,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Option<JoinHandle<()>>, LoadBalancerError> {
        match &self.lb {
            Some(lb) => Ok(Some(Arc::clone(lb).start(shutdown).await?)),
            None => Ok(None),
        }
    }

    /// Forward a membership update to the wrapped load balancer; no-op when
    /// proxying is disabled.
    pub fn update(&self, addresses: &[String]) {
        if let Some(lb) = &self.lb {
            lb.update(addresses);
        }
    }

    /// The URL etcd clients should dial: the local proxy address when
    /// enabled, otherwise the configured URL unchanged.
    pub fn etcd_url(&self) -> String {
        match &self.lb {
            Some(lb) => lb.local_server_url(),
            None => self.initial_etcd_url.clone(),
        }
    }

    /// Kept distinct from [`EtcdProxy::etcd_url`] so server-advertised and
    /// client-dialed addresses can diverge later; currently identical.
    pub fn etcd_server_url(&self) -> String {
        self.etcd_url()
    }

    /// Known etcd member addresses. Never empty: falls back to the single
    /// endpoint derived from the configured URL.
    pub fn etcd_addresses(&self) -> Vec<String> {
        match &self.lb {
            Some(lb) => lb.server_addresses(),
            None => vec![self.fallback_address.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_proxy(enabled: bool, dir: &Path) -> EtcdProxy {
        EtcdProxy::new(
            enabled,
            dir,
            "https://10.0.0.7:2379",
            0,
            Duration::from_millis(500),
            MetricsCollector::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_disabled_passes_url_through() {
        let dir = TempDir::new().unwrap();
        let proxy = new_proxy(false, dir.path());

        assert_eq!(proxy.etcd_url(), "https://10.0.0.7:2379");
        assert_eq!(proxy.etcd_server_url(), proxy.etcd_url());
        assert_eq!(proxy.etcd_addresses(), vec!["10.0.0.7:2379"]);
    }

    #[test]
    fn test_disabled_update_is_noop() {
        let dir = TempDir::new().unwrap();
        let proxy = new_proxy(false, dir.path());

        proxy.update(&["a:2379".to_string()]);
        assert_eq!(proxy.etcd_addresses(), vec!["10.0.0.7:2379"]);
    }

    #[test]
    fn test_enabled_exposes_local_url() {
        let dir = TempDir::new().unwrap();
        let proxy = new_proxy(true, dir.path());

        assert!(proxy.etcd_url().starts_with("https://127.0.0.1:"));
    }

    #[test]
    fn test_addresses_never_empty() {
        let dir = TempDir::new().unwrap();
        let proxy = new_proxy(true, dir.path());

        // No membership delivered yet: the fallback host stands in.
        assert_eq!(proxy.etcd_addresses(), vec!["10.0.0.7:2379"]);

        proxy.update(&["a:2379".to_string(), "b:2379".to_string()]);
        assert_eq!(proxy.etcd_addresses(), vec!["a:2379", "b:2379"]);

        // Membership flapping back to empty falls back again.
        proxy.update(&[]);
        assert_eq!(proxy.etcd_addresses(), vec!["10.0.0.7:2379"]);
    }

    #[test]
    fn test_rejects_unparsable_url() {
        let dir = TempDir::new().unwrap();
        let result = EtcdProxy::new(
            true,
            dir.path(),
            "not a url",
            0,
            Duration::from_secs(1),
            MetricsCollector::new(),
        );
        assert!(result.is_err());
    }
}
