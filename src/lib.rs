//! agentlb - dynamic local load-balancing proxy for lightweight Kubernetes
//! agents.
//!
//! Every agent runs a small loopback proxy in front of the control
//! plane/etcd so that kubelet, kube-proxy, and the embedded etcd client can
//! keep dialing one stable address while the real backend membership
//! changes. This crate provides:
//! - the load balancer itself (listener, round-robin failover, persistence)
//! - the etcd-specific wrapper presenting a stable etcd client URL
//! - translation from Kubernetes `Endpoints` objects to backend addresses
//! - Prometheus metrics for sessions, dials, and membership

pub mod backend;
pub mod config;
pub mod endpoints;
pub mod etcd;
pub mod loadbalancer;
pub mod metrics;
pub mod proxy;
pub mod util;

pub use config::Config;
