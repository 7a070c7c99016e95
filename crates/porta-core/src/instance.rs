// Assembled endpoint reconciliation subsystem
// The host calls the post-start hook once it begins serving and the
// pre-shutdown hook before it stops accepting connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use porta_common::ShutdownSignal;

use crate::config::{CompletedConfig, Config};
use crate::controller::ReconciliationController;
use crate::error::ConfigError;
use crate::store::Stores;

/// Post-start hook that starts the reconciliation controller
pub const POST_START_HOOK: &str = "start-endpoint-reconciler";

/// Pre-shutdown hook that stops the controller and removes this replica
pub const PRE_SHUTDOWN_HOOK: &str = "stop-endpoint-reconciler";

pub struct Instance {
    config: CompletedConfig,
    controller: Arc<ReconciliationController>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("config", &self.config)
            .field("started", &self.started)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub fn new(config: CompletedConfig, stores: Option<&Stores>) -> Result<Self, ConfigError> {
        let controller = config.create_controller(stores)?;
        Ok(Self {
            config,
            controller: Arc::new(controller),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Complete `config` and assemble an instance from it
    pub fn from_config(config: &Config, stores: Option<&Stores>) -> Result<Self, ConfigError> {
        Self::new(config.complete()?, stores)
    }

    pub fn config(&self) -> &CompletedConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<ReconciliationController> {
        &self.controller
    }

    /// Names of the lifecycle hooks, in invocation order
    pub fn hook_names(&self) -> [&'static str; 2] {
        [POST_START_HOOK, PRE_SHUTDOWN_HOOK]
    }

    /// Run the post-start hook. Only the first call has an effect.
    pub fn post_start(&self, signal: &ShutdownSignal) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Hook {} already ran", POST_START_HOOK);
            return false;
        }
        info!("Running post-start hook {}", POST_START_HOOK);
        self.controller.start(signal)
    }

    /// Run the pre-shutdown hook. Only the first call has an effect.
    pub async fn pre_shutdown(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Hook {} already ran", PRE_SHUTDOWN_HOOK);
            return false;
        }
        info!("Running pre-shutdown hook {}", PRE_SHUTDOWN_HOOK);
        self.controller.stop().await;
        true
    }
}
