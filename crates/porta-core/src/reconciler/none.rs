// Reconciler for deployments where an external load balancer owns the
// published endpoints.

use async_trait::async_trait;

use porta_common::Endpoint;

use super::{EndpointReconciler, ReconcileOutcome, ReconcilerType};
use crate::error::StoreError;

#[derive(Clone, Copy, Debug, Default)]
pub struct NoneReconciler;

impl NoneReconciler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EndpointReconciler for NoneReconciler {
    fn reconciler_type(&self) -> ReconcilerType {
        ReconcilerType::None
    }

    async fn reconcile(&self, _local: &Endpoint) -> Result<ReconcileOutcome, StoreError> {
        Ok(ReconcileOutcome::Unchanged)
    }

    async fn remove_endpoints(&self, _local: &Endpoint) -> Result<(), StoreError> {
        Ok(())
    }

    fn stop_reconciling(&self) {}

    fn resume_reconciling(&self) {}
}
