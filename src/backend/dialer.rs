//! Backend dialing with per-attempt timeout and health bookkeeping.
//!
//! One dial is one attempt: retry policy lives in the load balancer. The
//! dialer only remembers which addresses recently failed and uses that as an
//! ordering hint for candidate selection; addresses are never removed here,
//! removal only happens through a membership update.

use dashmap::DashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Error from a single dial attempt.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("dial timeout to backend {0}")]
    Timeout(String),

    #[error("failed to connect to backend {0}: {1}")]
    Connect(String, io::Error),
}

/// Per-address dial outcome, kept as an ordering hint only.
#[derive(Default, Debug)]
struct AddressHint {
    suspect: AtomicBool,
}

/// Dials backend endpoints with a bounded per-attempt timeout.
#[derive(Debug)]
pub struct Dialer {
    connect_timeout: Duration,
    hints: DashMap<String, AddressHint>,
}

impl Dialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            hints: DashMap::new(),
        }
    }

    /// Establish a TCP connection to `address`, bounded by the configured
    /// timeout. Marks the address as good or suspect for subsequent
    /// candidate ordering.
    pub async fn dial(&self, address: &str) -> Result<TcpStream, DialError> {
        debug!(backend = %address, "dialing backend");

        match timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                // Lower latency for interactive API traffic.
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(error = %e, backend = %address, "failed to set TCP_NODELAY");
                }
                self.mark(address, false);
                Ok(stream)
            }
            Ok(Err(e)) => {
                self.mark(address, true);
                Err(DialError::Connect(address.to_string(), e))
            }
            Err(_) => {
                self.mark(address, true);
                Err(DialError::Timeout(address.to_string()))
            }
        }
    }

    /// Reorder dial candidates so that addresses whose last dial failed are
    /// tried after the rest. The reorder is stable, so within each group the
    /// round-robin order is preserved.
    pub fn order(&self, candidates: Vec<String>) -> Vec<String> {
        let (good, suspect): (Vec<String>, Vec<String>) = candidates
            .into_iter()
            .partition(|addr| !self.is_suspect(addr));

        let mut ordered = good;
        ordered.extend(suspect);
        ordered
    }

    /// Drop hints for addresses no longer in the membership.
    pub fn retain(&self, addresses: &[String]) {
        self.hints
            .retain(|addr, _| addresses.iter().any(|a| a == addr));
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    fn mark(&self, address: &str, suspect: bool) {
        self.hints
            .entry(address.to_string())
            .or_default()
            .suspect
            .store(suspect, Ordering::Release);
    }

    fn is_suspect(&self, address: &str) -> bool {
        self.hints
            .get(address)
            .map(|h| h.suspect.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}
