//! Endpoint reconciler strategies
//!
//! A reconciler is invoked once per tick by the controller and converges the
//! published endpoints record of the front-door service towards the replicas
//! that are currently alive:
//! - [`LeaseReconciler`]: membership derived from TTL leases, one per replica.
//! - [`MasterCountReconciler`]: a fixed number of replicas register in the
//!   published record itself.
//! - [`NoneReconciler`]: an external load balancer owns the record; no-op.

mod lease;
mod master_count;
mod none;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use porta_common::{Endpoint, ServiceIdentity};

use crate::error::{ConfigError, StoreError};
use crate::metrics;
use crate::model::EndpointsList;
use crate::store::EndpointsStore;

pub use lease::{
    DEFAULT_LEASE_KEY_PREFIX, DEFAULT_LEASE_TTL, DEFAULT_RECONCILE_INTERVAL, LeaseReconciler,
};
pub use master_count::MasterCountReconciler;
pub use none::NoneReconciler;

/// Reconciler strategy trait
#[async_trait]
pub trait EndpointReconciler: Send + Sync {
    fn reconciler_type(&self) -> ReconcilerType;

    /// Run one reconciliation pass for the local endpoint
    async fn reconcile(&self, local: &Endpoint) -> Result<ReconcileOutcome, StoreError>;

    /// Best-effort removal of the local endpoint on graceful shutdown
    async fn remove_endpoints(&self, local: &Endpoint) -> Result<(), StoreError>;

    /// Make every later `reconcile` call a no-op
    fn stop_reconciling(&self);

    /// Undo [`EndpointReconciler::stop_reconciling`] before a restart
    fn resume_reconciling(&self);
}

/// Reconciler strategy selected by configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ReconcilerType {
    MasterCount,
    #[default]
    Lease,
    None,
}

impl ReconcilerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilerType::MasterCount => "master-count",
            ReconcilerType::Lease => "lease",
            ReconcilerType::None => "none",
        }
    }

    /// Whether the strategy reads or writes the shared stores
    pub fn uses_store(&self) -> bool {
        !matches!(self, ReconcilerType::None)
    }
}

impl FromStr for ReconcilerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "lease" => Ok(ReconcilerType::Lease),
            "master-count" => Ok(ReconcilerType::MasterCount),
            "none" => Ok(ReconcilerType::None),
            other => Err(ConfigError::UnknownReconciler(other.to_string())),
        }
    }
}

impl fmt::Display for ReconcilerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one reconciliation pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The published record already matched; nothing was written
    Unchanged,
    /// A new record was written
    Published { members: usize },
    /// Every attempt lost a race or hit a store outage; retried on the next tick
    Deferred { attempts: u32 },
    /// Nothing to publish, or reconciling has been stopped
    Skipped,
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Unchanged => "unchanged",
            ReconcileOutcome::Published { .. } => "published",
            ReconcileOutcome::Deferred { .. } => "deferred",
            ReconcileOutcome::Skipped => "skipped",
        }
    }
}

/// Bounded exponential backoff within one tick, for conflicting writes and
/// for passes that hit a transient store failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run a reconcile pass, repeating it after transient store failures.
    /// Once the attempts are used up the pass is deferred to the next tick.
    pub(crate) async fn retry_transient<F, Fut>(
        &self,
        mut pass: F,
    ) -> Result<ReconcileOutcome, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ReconcileOutcome, StoreError>>,
    {
        let attempts = self.max_attempts.max(1);

        for attempt in 1..=attempts {
            match pass().await {
                Err(e) if e.is_transient() => {
                    if attempt < attempts {
                        debug!("Reconcile attempt {} hit a store failure: {}", attempt, e);
                        tokio::time::sleep(self.backoff(attempt)).await;
                    } else {
                        warn!(
                            "Deferring reconcile to the next tick after {} attempts: {}",
                            attempts, e
                        );
                    }
                }
                other => return other,
            }
        }

        Ok(ReconcileOutcome::Deferred { attempts })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

/// Writes the published endpoints record with a version precondition,
/// re-reading and retrying on lost races.
#[derive(Clone)]
pub(crate) struct Publisher {
    endpoints: Arc<dyn EndpointsStore>,
    service: ServiceIdentity,
    retry: RetryPolicy,
}

impl Publisher {
    pub(crate) fn new(
        endpoints: Arc<dyn EndpointsStore>,
        service: ServiceIdentity,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            endpoints,
            service,
            retry,
        }
    }

    pub(crate) async fn current(&self) -> Result<Option<EndpointsList>, StoreError> {
        self.endpoints.get(&self.service).await
    }

    /// Publish the member set computed by `desired` from the current record.
    ///
    /// `desired` is re-evaluated against a fresh read after every conflict.
    /// An empty member set is never written.
    pub(crate) async fn publish<F>(&self, desired: F) -> Result<ReconcileOutcome, StoreError>
    where
        F: Fn(Option<&EndpointsList>) -> Vec<Endpoint> + Send + Sync,
    {
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            let current = self.current().await?;
            let mut members = desired(current.as_ref());
            members.sort();

            if members.is_empty() {
                warn!(
                    "Refusing to publish an empty endpoints list for {}",
                    self.service
                );
                return Ok(ReconcileOutcome::Skipped);
            }

            if current.as_ref().is_some_and(|c| c.members == members) {
                return Ok(ReconcileOutcome::Unchanged);
            }

            let result = match current {
                Some(mut list) => {
                    list.members = members;
                    self.endpoints.update(&list).await
                }
                None => {
                    self.endpoints
                        .create(&EndpointsList::new(self.service.clone(), members))
                        .await
                }
            };

            match result {
                Ok(stored) => {
                    metrics::record_endpoints_write(stored.members.len());
                    debug!(
                        "Published endpoints for {}: {:?} (version {:?})",
                        self.service,
                        stored.addresses(),
                        stored.version
                    );
                    return Ok(ReconcileOutcome::Published {
                        members: stored.members.len(),
                    });
                }
                Err(e) if e.is_conflict() => {
                    metrics::record_conflict();
                    debug!("Endpoints write attempt {} lost a race: {}", attempt, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            "Deferring endpoints update for {} after {} conflicting attempts",
            self.service, attempts
        );
        Ok(ReconcileOutcome::Deferred { attempts })
    }
}
