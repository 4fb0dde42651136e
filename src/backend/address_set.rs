//! The set of backend addresses a load balancer can dial.
//!
//! Membership is replaced wholesale by controller updates; the round-robin
//! cursor survives replacement so traffic keeps fanning out evenly instead
//! of re-biasing toward the first listed backend after every update.

use parking_lot::Mutex;
use tracing::debug;

/// Ordered, deduplicated collection of backend `host:port` endpoints.
///
/// An empty set is valid: callers fall back to the address derived from the
/// originally configured server URL.
#[derive(Debug)]
pub struct AddressSet {
    /// Endpoint derived from the configured server URL, used when no live
    /// membership is known.
    fallback_address: String,
    /// TCP port shared by the backends, derived once from the server URL.
    port: u16,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    addresses: Vec<String>,
    /// Round-robin cursor; wraps modulo the sequence length.
    index: usize,
}

impl AddressSet {
    /// Create an empty set with the given fallback endpoint.
    pub fn new(fallback_address: impl Into<String>, port: u16) -> Self {
        Self {
            fallback_address: fallback_address.into(),
            port,
            inner: Mutex::new(Inner {
                addresses: Vec::new(),
                index: 0,
            }),
        }
    }

    /// Replace the backing address list in a single observable transition.
    ///
    /// Duplicates are dropped, otherwise the given order is preserved as the
    /// rotation order. The cursor is not reset. Returns `true` if the stored
    /// list actually changed.
    pub fn set_addresses(&self, new_addresses: &[String]) -> bool {
        let mut deduped: Vec<String> = Vec::with_capacity(new_addresses.len());
        for addr in new_addresses {
            if !deduped.contains(addr) {
                deduped.push(addr.clone());
            }
        }

        let mut inner = self.inner.lock();
        if inner.addresses == deduped {
            return false;
        }

        debug!(
            previous = inner.addresses.len(),
            current = deduped.len(),
            "backend address set replaced"
        );
        inner.addresses = deduped;
        true
    }

    /// Return the address under the cursor and advance it, or `None` when
    /// the set is empty and the caller must use the fallback.
    pub fn next_address(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        if inner.addresses.is_empty() {
            return None;
        }
        // An update may have shrunk the list below the cursor.
        let idx = inner.index % inner.addresses.len();
        let address = inner.addresses[idx].clone();
        inner.index = (idx + 1) % inner.addresses.len();
        Some(address)
    }

    /// Snapshot of the current membership, or the single-element fallback
    /// list when no membership is known.
    pub fn all_addresses(&self) -> Vec<String> {
        let inner = self.inner.lock();
        if inner.addresses.is_empty() {
            vec![self.fallback_address.clone()]
        } else {
            inner.addresses.clone()
        }
    }

    /// Snapshot of the raw membership list, which may be empty. Unlike
    /// [`AddressSet::all_addresses`] this never substitutes the fallback,
    /// so it is what gets persisted and reported as live membership.
    pub fn known_addresses(&self) -> Vec<String> {
        self.inner.lock().addresses.clone()
    }

    /// Number of known backend addresses (zero when only the fallback is
    /// available).
    pub fn len(&self) -> usize {
        self.inner.lock().addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The endpoint derived from the originally configured server URL.
    pub fn fallback_address(&self) -> &str {
        &self.fallback_address
    }

    /// The TCP port derived from the originally configured server URL.
    pub fn port(&self) -> u16 {
        self.port
    }
}
