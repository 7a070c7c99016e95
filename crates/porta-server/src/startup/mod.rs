//! Application startup utilities module.

mod logging;
mod shutdown;

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{shutdown_requested, wait_for_shutdown_signal};
