//! The local load-balancing proxy.
//!
//! Every agent runs one of these per proxied service: a loopback listener
//! at a stable address, fanning connections out over whatever backend
//! membership the watching controller last delivered. Consumers dial the
//! local address exactly as they would dial the real cluster.

use crate::backend::{AddressSet, Dialer};
use crate::loadbalancer::persist::{self, LoadBalancerState};
use crate::metrics::MetricsCollector;
use crate::proxy::{proxy_bidirectional, ProxyResult};
use crate::util::ConnId;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Fatal construction/startup errors. Anything here is a misconfiguration,
/// not a transient condition, so it is returned and never retried.
#[derive(Debug, thiserror::Error)]
pub enum LoadBalancerError {
    #[error("invalid server URL '{url}': {source}")]
    InvalidServerUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("server URL '{0}' has no host")]
    MissingHost(String),

    #[error("server URL '{0}' has no port")]
    MissingPort(String),

    #[error("failed to bind local listener on {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: io::Error,
    },
}

/// A load balancer proxying a stable loopback address to a dynamic set of
/// backend endpoints.
#[derive(Debug)]
pub struct LoadBalancer {
    /// Logical service name, used in logs, metrics labels, and the state
    /// file name.
    service_name: String,
    /// Scheme of the original server URL, echoed in the local server URL.
    scheme: String,
    /// The originally configured, authoritative endpoint.
    original_server_url: String,
    /// Configured local port; 0 picks an ephemeral port at bind time.
    listen_port: u16,
    /// Persisted membership state file.
    state_path: PathBuf,
    /// Serializes state file writes so an older membership can never land
    /// on disk after a newer one.
    persist_lock: Arc<tokio::sync::Mutex<()>>,
    /// Bumped on every membership change; a writer that is no longer the
    /// newest skips its write.
    persist_generation: Arc<AtomicU64>,
    addresses: AddressSet,
    dialer: Dialer,
    metrics: MetricsCollector,
    /// Actual bound address, available once `start` has bound the listener.
    local_addr: OnceLock<SocketAddr>,
}

impl LoadBalancer {
    /// Create a load balancer for `server_url`, seeding the address set
    /// from the state file left by a previous run when one exists.
    pub fn new(
        data_dir: &Path,
        service_name: impl Into<String>,
        server_url: &str,
        listen_port: u16,
        connect_timeout: Duration,
        metrics: MetricsCollector,
    ) -> Result<Self, LoadBalancerError> {
        let service_name = service_name.into();

        let url = Url::parse(server_url).map_err(|source| LoadBalancerError::InvalidServerUrl {
            url: server_url.to_string(),
            source,
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| LoadBalancerError::MissingHost(server_url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| LoadBalancerError::MissingPort(server_url.to_string()))?;

        let fallback_address = format!("{host}:{port}");
        let addresses = AddressSet::new(fallback_address.clone(), port);

        let state_path = persist::state_file_path(data_dir, &service_name);
        if let Some(seeded) = persist::load_state(&state_path, server_url) {
            addresses.set_addresses(&seeded);
            info!(
                service = %service_name,
                addresses = seeded.len(),
                "seeded membership from previous run"
            );
        }

        info!(
            service = %service_name,
            server_url = %server_url,
            fallback = %fallback_address,
            "load balancer created"
        );

        Ok(Self {
            service_name,
            scheme: url.scheme().to_string(),
            original_server_url: server_url.to_string(),
            listen_port,
            state_path,
            persist_lock: Arc::new(tokio::sync::Mutex::new(())),
            persist_generation: Arc::new(AtomicU64::new(0)),
            addresses,
            dialer: Dialer::new(connect_timeout),
            metrics,
            local_addr: OnceLock::new(),
        })
    }

    /// Bind the loopback listener and spawn the accept loop.
    ///
    /// Binding failures are fatal and returned to the caller; everything
    /// after a successful bind only ever degrades individual connections.
    pub async fn start(
        self: Arc<Self>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<JoinHandle<()>, LoadBalancerError> {
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, self.listen_port));
        let listener =
            TcpListener::bind(address)
                .await
                .map_err(|source| LoadBalancerError::Bind { address, source })?;

        // With a configured port of 0 the kernel picks one; record what we
        // actually got so local_server_url matches.
        let local_addr = listener.local_addr().unwrap_or(address);
        let _ = self.local_addr.set(local_addr);

        info!(
            service = %self.service_name,
            listen = %local_addr,
            "load balancer listening"
        );

        Ok(tokio::spawn(async move {
            self.run(listener, shutdown).await;
        }))
    }

    /// Replace the backend membership.
    ///
    /// Thread-safe and never blocks on I/O: the state file write happens on
    /// a background task once the in-memory swap has committed.
    pub fn update(&self, addresses: &[String]) {
        if !self.addresses.set_addresses(addresses) {
            return;
        }

        let current = self.addresses.known_addresses();
        self.dialer.retain(&current);
        self.metrics
            .membership_updated(&self.service_name, current.len());

        info!(
            service = %self.service_name,
            addresses = ?current,
            "membership updated"
        );

        let state = LoadBalancerState {
            server_url: self.original_server_url.clone(),
            server_addresses: current,
        };
        let path = self.state_path.clone();
        let generation = self.persist_generation.fetch_add(1, Ordering::SeqCst) + 1;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lock = Arc::clone(&self.persist_lock);
                let newest = Arc::clone(&self.persist_generation);
                handle.spawn(async move {
                    let _write = lock.lock().await;
                    // A later membership superseded this one before it
                    // reached disk; its own writer carries the file.
                    if newest.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    persist::save_state(path, state).await;
                });
            }
            // Callers outside a runtime (tests, early startup) write inline.
            Err(_) => persist::save_state_blocking(&path, &state),
        }
    }

    /// The stable URL consumers should dial instead of the real cluster,
    /// using the scheme of the original server URL.
    pub fn local_server_url(&self) -> String {
        let port = self
            .local_addr
            .get()
            .map(|addr| addr.port())
            .unwrap_or(self.listen_port);
        format!("{}://127.0.0.1:{}", self.scheme, port)
    }

    /// Current membership, or the single fallback endpoint when none is
    /// known. Never empty.
    pub fn server_addresses(&self) -> Vec<String> {
        self.addresses.all_addresses()
    }

    /// Raw membership list, possibly empty.
    pub fn known_addresses(&self) -> Vec<String> {
        self.addresses.known_addresses()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Accept loop; runs until the listener errors fatally or shutdown is
    /// signaled.
    async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            Arc::clone(&self).handle_connection(stream, client_addr);
                        }
                        Err(e) => {
                            error!(service = %self.service_name, error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!(service = %self.service_name, "load balancer shutting down");
                    break;
                }
            }
        }
    }

    /// Hand one accepted client connection to its own task.
    fn handle_connection(self: Arc<Self>, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let lb = self;
        let conn_id = ConnId::short();

        tokio::spawn(async move {
            let start = Instant::now();
            lb.metrics.connection_opened(&lb.service_name);

            let result = lb.proxy_connection(stream, client_addr, &conn_id).await;

            lb.metrics.connection_closed(&lb.service_name);
            let duration = start.elapsed();

            match result {
                Some(proxied) => {
                    debug!(
                        service = %lb.service_name,
                        conn_id = %conn_id,
                        client = %client_addr,
                        bytes_to_backend = proxied.bytes_to_backend,
                        bytes_to_client = proxied.bytes_to_client,
                        duration_ms = duration.as_millis(),
                        "proxy session completed"
                    );
                }
                None => {
                    warn!(
                        service = %lb.service_name,
                        conn_id = %conn_id,
                        client = %client_addr,
                        duration_ms = duration.as_millis(),
                        "dropped client connection, no reachable backend"
                    );
                }
            }
        });
    }

    /// Dial through the candidate rotation, bounded by the candidate count,
    /// then pipe bytes until both sides are done. `None` means every
    /// candidate failed and the client was dropped.
    async fn proxy_connection(
        &self,
        client: TcpStream,
        client_addr: SocketAddr,
        conn_id: &ConnId,
    ) -> Option<ProxyResult> {
        let candidates = self.dial_candidates();

        for backend_addr in &candidates {
            self.metrics.dial_attempt(&self.service_name, backend_addr);

            match self.dialer.dial(backend_addr).await {
                Ok(backend) => {
                    debug!(
                        service = %self.service_name,
                        conn_id = %conn_id,
                        client = %client_addr,
                        backend = %backend_addr,
                        "proxy session starting"
                    );

                    let result = proxy_bidirectional(client, backend).await;
                    self.metrics.record_session(
                        &self.service_name,
                        result.bytes_to_backend,
                        result.bytes_to_client,
                    );
                    return Some(result);
                }
                Err(e) => {
                    self.metrics.dial_failure(&self.service_name, backend_addr);
                    warn!(
                        service = %self.service_name,
                        conn_id = %conn_id,
                        backend = %backend_addr,
                        error = %e,
                        "backend dial failed, trying next candidate"
                    );
                }
            }
        }

        self.metrics.connection_rejected(&self.service_name);
        // Signal the outage to the client the way a down backend would:
        // linger(0) turns the close into a reset rather than a clean FIN.
        let _ = client.set_linger(Some(Duration::ZERO));
        drop(client);
        None
    }

    /// Dial candidates for one connection: the address under the shared
    /// cursor first (advancing it by one), then the rest of the membership
    /// in rotation order, so retries walk the full set exactly once.
    /// Suspect addresses are moved to the back; the empty set falls back
    /// to the configured endpoint.
    fn dial_candidates(&self) -> Vec<String> {
        let primary = match self.addresses.next_address() {
            Some(addr) => addr,
            None => return vec![self.addresses.fallback_address().to_string()],
        };

        let snapshot = self.addresses.known_addresses();
        self.dialer.order(rotate_candidates(primary, &snapshot))
    }
}

/// Rotation order for one connection: `primary` first, then the rest of the
/// snapshot starting from the primary's position. The primary may have left
/// the set under a concurrent update; every snapshot member is still visited
/// exactly once.
fn rotate_candidates(primary: String, snapshot: &[String]) -> Vec<String> {
    let start = snapshot.iter().position(|a| *a == primary).unwrap_or(0);

    let mut candidates = Vec::with_capacity(snapshot.len() + 1);
    candidates.push(primary);
    for offset in 0..snapshot.len() {
        let addr = &snapshot[(start + offset) % snapshot.len()];
        if !candidates.contains(addr) {
            candidates.push(addr.clone());
        }
    }
    candidates
}
