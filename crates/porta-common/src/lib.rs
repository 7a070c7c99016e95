//! Porta Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all Porta components:
//! - Endpoint model shared by the stores and reconcilers
//! - Clock abstraction (wall clock and a manually driven clock for tests)
//! - Caller-owned shutdown signal
//! - Utility functions

pub mod clock;
pub mod model;
pub mod shutdown;
pub mod utils;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock, add_duration};
pub use model::{Endpoint, EndpointPort, PortProtocol, ServiceIdentity};
pub use shutdown::ShutdownSignal;
pub use utils::{local_ip, parse_duration};

/// Default namespace of the front-door service
pub const DEFAULT_SERVICE_NAMESPACE: &str = "default";

/// Default name of the front-door service
pub const DEFAULT_SERVICE_NAME: &str = "porta";

/// Port name published for the secure serving port
pub const HTTPS_PORT_NAME: &str = "https";
