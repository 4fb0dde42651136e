//! TCP byte forwarding between client and backend.

mod tcp;

pub use tcp::{proxy_bidirectional, ProxyResult};
