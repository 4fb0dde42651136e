//! Best-effort persistence of the last known membership.
//!
//! The state file is a restart-time optimization, not a correctness
//! requirement: it lets a restarting agent seed its address set with the
//! last known-good membership before the watching controller delivers a
//! fresh update. Write failures are warnings, never errors.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// On-disk state for one load balancer, keyed by service name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerState {
    /// The server URL this membership was recorded against. State written
    /// for a different cluster is discarded on load.
    pub server_url: String,
    /// Last known backend `host:port` list, in rotation order.
    pub server_addresses: Vec<String>,
}

/// Path of the state file for a service under the agent data directory.
pub fn state_file_path(data_dir: &Path, service_name: &str) -> PathBuf {
    data_dir.join("etc").join(format!("{service_name}.json"))
}

/// Load persisted addresses, if present and recorded against the same
/// server URL. Any read or parse failure just means no seed.
pub fn load_state(path: &Path, server_url: &str) -> Option<Vec<String>> {
    let contents = std::fs::read_to_string(path).ok()?;
    let state: LoadBalancerState = match serde_json::from_str(&contents) {
        Ok(state) => state,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable state file");
            return None;
        }
    };

    if state.server_url != server_url {
        warn!(
            path = %path.display(),
            recorded = %state.server_url,
            configured = %server_url,
            "ignoring state file recorded against a different server URL"
        );
        return None;
    }

    debug!(
        path = %path.display(),
        addresses = state.server_addresses.len(),
        "seeded addresses from state file"
    );
    Some(state.server_addresses)
}

/// Write the state file, creating the parent directory as needed. Failures
/// are logged and swallowed so a slow or broken disk can never stall
/// membership propagation.
pub async fn save_state(path: PathBuf, state: LoadBalancerState) {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!(path = %path.display(), error = %e, "failed to create state directory");
            return;
        }
    }

    let contents = match serde_json::to_vec_pretty(&state) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to encode state");
            return;
        }
    };

    if let Err(e) = tokio::fs::write(&path, contents).await {
        warn!(path = %path.display(), error = %e, "failed to write state file");
    }
}

/// Synchronous variant of [`save_state`] for callers outside a runtime.
pub fn save_state_blocking(path: &Path, state: &LoadBalancerState) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %path.display(), error = %e, "failed to create state directory");
            return;
        }
    }

    match serde_json::to_vec_pretty(state) {
        Ok(contents) => {
            if let Err(e) = std::fs::write(path, contents) {
                warn!(path = %path.display(), error = %e, "failed to write state file");
            }
        }
        Err(e) => warn!(path = %path.display(), error = %e, "failed to encode state"),
    }
}
