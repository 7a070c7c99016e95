//! Porta Core - Endpoint reconciliation for the front-door service
//!
//! This crate provides:
//! - Lease and endpoints stores shared by all replicas
//! - Lease, master-count and none reconciler strategies
//! - The periodic reconciliation controller
//! - Configuration completion and the assembled instance with its lifecycle hooks
//! - Metric names and descriptions

pub mod config;
pub mod controller;
pub mod error;
pub mod instance;
pub mod metrics;
pub mod model;
pub mod reconciler;
pub mod store;

// Re-export commonly used types
pub use config::{CompletedConfig, Config};
pub use controller::{ControllerConfig, ControllerState, ReconciliationController};
pub use error::{ConfigError, StoreError};
pub use instance::{Instance, POST_START_HOOK, PRE_SHUTDOWN_HOOK};
pub use model::{EndpointsList, LeaseEntry, LeaseRecord, MembershipSnapshot, Version};
pub use reconciler::{EndpointReconciler, ReconcileOutcome, ReconcilerType, RetryPolicy};
pub use store::{EndpointsStore, LeaseStore, StoreClientConfig, Stores};

// Re-export common types
pub use porta_common::{Endpoint, EndpointPort, ServiceIdentity, ShutdownSignal};
