//! Metrics collector using prometheus-client.
//!
//! Tracks proxy sessions, dial attempts, bytes moved, and the size of the
//! known backend membership, labeled by logical service name.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Labels for per-service metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub service: String,
}

/// Labels for per-backend dial metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DialLabels {
    pub service: String,
    pub backend: String,
}

/// Labels for bytes transferred metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BytesLabels {
    pub service: String,
    pub direction: Direction,
}

/// Direction of bytes transfer, from the client's point of view.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Direction {
    ToBackend,
    ToClient,
}

/// Collects and stores all metrics.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

#[derive(Debug)]
struct MetricsCollectorInner {
    /// Completed proxy sessions.
    sessions_total: Family<ServiceLabels, Counter>,
    /// Currently open client connections.
    active_connections: Family<ServiceLabels, Gauge>,
    /// Client connections dropped because every candidate failed.
    rejected_connections_total: Family<ServiceLabels, Counter>,
    /// Dial attempts per backend.
    dial_attempts_total: Family<DialLabels, Counter>,
    /// Failed dial attempts per backend.
    dial_failures_total: Family<DialLabels, Counter>,
    /// Bytes forwarded, by direction.
    bytes_total: Family<BytesLabels, Counter>,
    /// Backend addresses currently known (0 means fallback only).
    known_addresses: Family<ServiceLabels, Gauge>,
    /// Membership updates applied.
    membership_updates_total: Family<ServiceLabels, Counter>,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let sessions_total = Family::<ServiceLabels, Counter>::default();
        let active_connections = Family::<ServiceLabels, Gauge>::default();
        let rejected_connections_total = Family::<ServiceLabels, Counter>::default();
        let dial_attempts_total = Family::<DialLabels, Counter>::default();
        let dial_failures_total = Family::<DialLabels, Counter>::default();
        let bytes_total = Family::<BytesLabels, Counter>::default();
        let known_addresses = Family::<ServiceLabels, Gauge>::default();
        let membership_updates_total = Family::<ServiceLabels, Counter>::default();

        registry.register(
            "agentlb_sessions",
            "Total number of completed proxy sessions",
            sessions_total.clone(),
        );
        registry.register(
            "agentlb_active_connections",
            "Number of currently open client connections",
            active_connections.clone(),
        );
        registry.register(
            "agentlb_rejected_connections",
            "Client connections dropped after all dial candidates failed",
            rejected_connections_total.clone(),
        );
        registry.register(
            "agentlb_dial_attempts",
            "Total backend dial attempts",
            dial_attempts_total.clone(),
        );
        registry.register(
            "agentlb_dial_failures",
            "Total failed backend dial attempts",
            dial_failures_total.clone(),
        );
        registry.register("agentlb_bytes", "Total bytes forwarded", bytes_total.clone());
        registry.register(
            "agentlb_known_addresses",
            "Backend addresses currently known from membership updates",
            known_addresses.clone(),
        );
        registry.register(
            "agentlb_membership_updates",
            "Total membership updates applied",
            membership_updates_total.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                sessions_total,
                active_connections,
                rejected_connections_total,
                dial_attempts_total,
                dial_failures_total,
                bytes_total,
                known_addresses,
                membership_updates_total,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record a client connection being accepted.
    pub fn connection_opened(&self, service: &str) {
        self.inner
            .active_connections
            .get_or_create(&service_labels(service))
            .inc();
    }

    /// Record a client connection closing.
    pub fn connection_closed(&self, service: &str) {
        self.inner
            .active_connections
            .get_or_create(&service_labels(service))
            .dec();
    }

    /// Record a client connection dropped with no reachable backend.
    pub fn connection_rejected(&self, service: &str) {
        self.inner
            .rejected_connections_total
            .get_or_create(&service_labels(service))
            .inc();
    }

    /// Record one dial attempt against a backend.
    pub fn dial_attempt(&self, service: &str, backend: &str) {
        self.inner
            .dial_attempts_total
            .get_or_create(&dial_labels(service, backend))
            .inc();
    }

    /// Record a failed dial attempt against a backend.
    pub fn dial_failure(&self, service: &str, backend: &str) {
        self.inner
            .dial_failures_total
            .get_or_create(&dial_labels(service, backend))
            .inc();
    }

    /// Record a completed proxy session with its byte counts.
    pub fn record_session(&self, service: &str, bytes_to_backend: u64, bytes_to_client: u64) {
        self.inner
            .sessions_total
            .get_or_create(&service_labels(service))
            .inc();
        self.inner
            .bytes_total
            .get_or_create(&BytesLabels {
                service: service.to_string(),
                direction: Direction::ToBackend,
            })
            .inc_by(bytes_to_backend);
        self.inner
            .bytes_total
            .get_or_create(&BytesLabels {
                service: service.to_string(),
                direction: Direction::ToClient,
            })
            .inc_by(bytes_to_client);
    }

    /// Record a membership update and the resulting address count.
    pub fn membership_updated(&self, service: &str, addresses: usize) {
        self.inner
            .membership_updates_total
            .get_or_create(&service_labels(service))
            .inc();
        self.inner
            .known_addresses
            .get_or_create(&service_labels(service))
            .set(addresses as i64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn service_labels(service: &str) -> ServiceLabels {
    ServiceLabels {
        service: service.to_string(),
    }
}

fn dial_labels(service: &str, backend: &str) -> DialLabels {
    DialLabels {
        service: service.to_string(),
        backend: backend.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_encoding() {
        let collector = MetricsCollector::new();

        collector.connection_opened("etcd-server");
        collector.dial_attempt("etcd-server", "10.0.0.1:2379");
        collector.record_session("etcd-server", 128, 256);
        collector.membership_updated("etcd-server", 3);

        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, collector.registry()).unwrap();

        assert!(buffer.contains("agentlb_sessions"));
        assert!(buffer.contains("agentlb_active_connections"));
        assert!(buffer.contains("agentlb_known_addresses"));
    }

    #[test]
    fn test_active_connections_gauge() {
        let collector = MetricsCollector::new();

        collector.connection_opened("etcd-server");
        collector.connection_opened("etcd-server");
        collector.connection_closed("etcd-server");

        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, collector.registry()).unwrap();
        assert!(buffer.contains("agentlb_active_connections{service=\"etcd-server\"} 1"));
    }
}
