//! Utility functions and helpers.

mod conn_id;
mod logging;
mod shutdown;

pub use conn_id::ConnId;
pub use logging::init_logging;
pub use shutdown::ShutdownSignal;
