//! The local load-balancing proxy and its persisted state.

mod persist;
mod server;

pub use persist::LoadBalancerState;
pub use server::{LoadBalancer, LoadBalancerError};
