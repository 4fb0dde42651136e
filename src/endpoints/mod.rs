//! Translation between Kubernetes `Endpoints` objects and backend
//! addresses.
//!
//! The watching controller itself lives outside this crate; what it needs
//! from us is the data model, the subset-to-`host:port` translation, and a
//! handler that pushes translated membership into a load balancer and
//! produces the JSON payload stored under the well-known cluster key so
//! newly joining agents can seed their own proxy.

use crate::loadbalancer::LoadBalancer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Well-known key in the shared cluster store holding the JSON-encoded
/// current address list.
pub const ADDRESS_KEY: &str = "/agentlb/apiaddresses";

/// Port assumed when an endpoint subset carries no explicit port.
pub const DEFAULT_ENDPOINT_PORT: u16 = 443;

/// Object metadata, reduced to what endpoint filtering needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// A Kubernetes `Endpoints` object for one Service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subsets: Vec<EndpointSubset>,
}

/// One group of addresses sharing a port list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointSubset {
    #[serde(default)]
    pub addresses: Vec<EndpointAddress>,
    #[serde(default)]
    pub ports: Vec<EndpointPort>,
}

/// An address of one backend serving the Service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub ip: String,
}

/// A port exposed by the backends in a subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointPort {
    pub port: u16,
}

/// Extract `host:port` strings from all subsets of an Endpoints object.
///
/// A subset's explicit port wins; subsets without one default to
/// [`DEFAULT_ENDPOINT_PORT`].
pub fn addresses_from_endpoints(endpoints: &Endpoints) -> Vec<String> {
    let mut server_addresses = Vec::new();
    for subset in &endpoints.subsets {
        let port = subset
            .ports
            .first()
            .map(|p| p.port)
            .unwrap_or(DEFAULT_ENDPOINT_PORT);
        for address in &subset.addresses {
            server_addresses.push(format!("{}:{}", address.ip, port));
        }
    }
    server_addresses
}

/// Applies endpoint changes for the `kubernetes` Service to a load
/// balancer and produces the store payload.
pub struct EndpointsHandler {
    lb: Arc<LoadBalancer>,
}

impl EndpointsHandler {
    pub fn new(lb: Arc<LoadBalancer>) -> Self {
        Self { lb }
    }

    /// Handle one change notification.
    ///
    /// A `None` (deleted or transiently missing) object is a no-op rather
    /// than "zero addresses", so a watch glitch never flaps every backend
    /// to the fallback. Objects for other Services are ignored. Returns
    /// the JSON-encoded address list to persist under [`ADDRESS_KEY`]
    /// when an update was applied.
    pub fn sync(&self, endpoints: Option<&Endpoints>) -> Option<String> {
        let endpoints = endpoints?;

        if endpoints.metadata.namespace != "default" || endpoints.metadata.name != "kubernetes" {
            debug!(
                namespace = %endpoints.metadata.namespace,
                name = %endpoints.metadata.name,
                "ignoring endpoints for other service"
            );
            return None;
        }

        let addresses = addresses_from_endpoints(endpoints);
        self.lb.update(&addresses);

        // Best effort: an unencodable list only skips the store write.
        serde_json::to_string(&addresses).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use std::time::Duration;
    use tempfile::TempDir;

    fn kubernetes_endpoints(subsets: Vec<EndpointSubset>) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: "kubernetes".to_string(),
                namespace: "default".to_string(),
            },
            subsets,
        }
    }

    fn subset(ips: &[&str], port: Option<u16>) -> EndpointSubset {
        EndpointSubset {
            addresses: ips
                .iter()
                .map(|ip| EndpointAddress { ip: ip.to_string() })
                .collect(),
            ports: port.map(|port| EndpointPort { port }).into_iter().collect(),
        }
    }

    fn test_lb(dir: &TempDir) -> Arc<LoadBalancer> {
        Arc::new(
            LoadBalancer::new(
                dir.path(),
                "apiserver",
                "https://10.0.0.1:6443",
                0,
                Duration::from_secs(1),
                MetricsCollector::new(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_explicit_port_wins_default_fills_gap() {
        let endpoints = kubernetes_endpoints(vec![
            subset(&["10.0.0.1"], Some(2379)),
            subset(&["10.0.0.2"], None),
        ]);

        assert_eq!(
            addresses_from_endpoints(&endpoints),
            vec!["10.0.0.1:2379", "10.0.0.2:443"]
        );
    }

    #[test]
    fn test_empty_subsets_yield_no_addresses() {
        let endpoints = kubernetes_endpoints(vec![]);
        assert!(addresses_from_endpoints(&endpoints).is_empty());
    }

    #[test]
    fn test_sync_applies_membership() {
        let dir = TempDir::new().unwrap();
        let lb = test_lb(&dir);
        let handler = EndpointsHandler::new(Arc::clone(&lb));

        let endpoints = kubernetes_endpoints(vec![subset(&["10.0.0.8", "10.0.0.9"], Some(6443))]);
        let payload = handler.sync(Some(&endpoints)).unwrap();

        assert_eq!(lb.known_addresses(), vec!["10.0.0.8:6443", "10.0.0.9:6443"]);
        assert_eq!(payload, r#"["10.0.0.8:6443","10.0.0.9:6443"]"#);
    }

    #[test]
    fn test_sync_nil_is_noop() {
        let dir = TempDir::new().unwrap();
        let lb = test_lb(&dir);
        let handler = EndpointsHandler::new(Arc::clone(&lb));

        let endpoints = kubernetes_endpoints(vec![subset(&["10.0.0.8"], Some(6443))]);
        handler.sync(Some(&endpoints));

        // Deleted object must not flap membership to empty.
        assert!(handler.sync(None).is_none());
        assert_eq!(lb.known_addresses(), vec!["10.0.0.8:6443"]);
    }

    #[test]
    fn test_sync_ignores_other_services() {
        let dir = TempDir::new().unwrap();
        let lb = test_lb(&dir);
        let handler = EndpointsHandler::new(Arc::clone(&lb));

        let mut endpoints = kubernetes_endpoints(vec![subset(&["10.0.0.8"], Some(6443))]);
        endpoints.metadata.name = "other".to_string();

        assert!(handler.sync(Some(&endpoints)).is_none());
        assert!(lb.known_addresses().is_empty());
    }

    #[test]
    fn test_sync_ignores_other_namespaces() {
        let dir = TempDir::new().unwrap();
        let lb = test_lb(&dir);
        let handler = EndpointsHandler::new(Arc::clone(&lb));

        // Right name, wrong namespace: a `kubernetes` Endpoints object
        // outside `default` is not the control-plane service.
        let mut endpoints = kubernetes_endpoints(vec![subset(&["10.0.0.8"], Some(6443))]);
        endpoints.metadata.namespace = "kube-system".to_string();

        assert!(handler.sync(Some(&endpoints)).is_none());
        assert!(lb.known_addresses().is_empty());
    }

    #[test]
    fn test_endpoints_deserialize_from_json() {
        let json = r#"{
            "metadata": {"name": "kubernetes", "namespace": "default"},
            "subsets": [
                {"addresses": [{"ip": "10.0.0.1"}], "ports": [{"port": 6443}]}
            ]
        }"#;
        let endpoints: Endpoints = serde_json::from_str(json).unwrap();
        assert_eq!(addresses_from_endpoints(&endpoints), vec!["10.0.0.1:6443"]);
    }
}
