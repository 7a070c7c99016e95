// Fixed-size endpoint reconciler
// Replicas register their own address directly in the published endpoints
// record, which is capped at the configured replica count.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};

use porta_common::{Endpoint, ServiceIdentity};

use super::{EndpointReconciler, Publisher, ReconcileOutcome, ReconcilerType, RetryPolicy};
use crate::error::StoreError;
use crate::model::EndpointsList;
use crate::store::Stores;

/// Reconciler for a statically known number of replicas
pub struct MasterCountReconciler {
    publisher: Publisher,
    master_count: usize,
    stopped: AtomicBool,
}

impl MasterCountReconciler {
    pub fn new(stores: &Stores, service: ServiceIdentity, master_count: usize) -> Self {
        Self {
            publisher: Publisher::new(stores.endpoints.clone(), service, RetryPolicy::default()),
            master_count,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.publisher.retry = retry;
        self
    }

    pub fn master_count(&self) -> usize {
        self.master_count
    }
}

/// Add or refresh `local` in the registered members and keep the
/// `master_count` smallest addresses.
pub(crate) fn register(
    current: Option<&EndpointsList>,
    local: &Endpoint,
    master_count: usize,
) -> Vec<Endpoint> {
    let mut members: Vec<Endpoint> = current
        .map(|list| {
            list.members
                .iter()
                .filter(|m| !m.same_address(local))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    members.push(local.clone());
    members.sort();

    if members.len() > master_count {
        let excess = members.split_off(master_count);
        let excess: Vec<String> = excess.iter().map(|m| m.address()).collect();
        warn!(
            "More than {} replicas registered, ignoring excess addresses: {:?}",
            master_count, excess
        );
    }
    members
}

#[async_trait]
impl EndpointReconciler for MasterCountReconciler {
    fn reconciler_type(&self) -> ReconcilerType {
        ReconcilerType::MasterCount
    }

    async fn reconcile(&self, local: &Endpoint) -> Result<ReconcileOutcome, StoreError> {
        let pass = || async move {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(ReconcileOutcome::Skipped);
            }
            self.publisher
                .publish(|current| register(current, local, self.master_count))
                .await
        };
        self.publisher.retry.retry_transient(pass).await
    }

    async fn remove_endpoints(&self, local: &Endpoint) -> Result<(), StoreError> {
        let outcome = self
            .publisher
            .publish(|current| {
                current
                    .map(|list| {
                        list.members
                            .iter()
                            .filter(|m| !m.same_address(local))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .await?;

        match outcome {
            ReconcileOutcome::Published { members } => info!(
                "Removed {} from endpoints, {} members remain",
                local.address(),
                members
            ),
            ReconcileOutcome::Deferred { attempts } => warn!(
                "Could not remove {} from endpoints after {} attempts",
                local.address(),
                attempts
            ),
            ReconcileOutcome::Unchanged | ReconcileOutcome::Skipped => {}
        }
        Ok(())
    }

    fn stop_reconciling(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn resume_reconciling(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }
}
