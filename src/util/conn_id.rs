//! Connection ID generation for session tracing.
//!
//! Every proxied connection gets an identifier so one session can be
//! followed through the accept, dial, and forwarding log lines.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Counter for short connection IDs.
static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Connection ID attached to proxy session logs.
#[derive(Clone, Debug)]
pub struct ConnId(String);

impl ConnId {
    /// Globally unique UUID-based ID, for cross-process correlation.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Counter-based ID, unique within this process and cheaper to make.
    /// Format: `conn-{counter}` with the counter in hex.
    pub fn short() -> Self {
        let count = CONN_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn-{count:08x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_short_ids_are_unique() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(ConnId::short().0), "duplicate ID generated");
        }
    }

    #[test]
    fn test_short_id_prefix() {
        assert!(ConnId::short().as_str().starts_with("conn-"));
    }

    #[test]
    fn test_uuid_ids_differ() {
        assert_ne!(ConnId::new().0, ConnId::new().0);
    }
}
