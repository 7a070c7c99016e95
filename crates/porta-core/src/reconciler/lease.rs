// Lease based endpoint reconciler
// Each replica keeps one TTL lease under a shared prefix; the published
// endpoints record is the set of holders whose lease is still live.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use porta_common::{Clock, Endpoint, ServiceIdentity, add_duration};

use super::{EndpointReconciler, Publisher, ReconcileOutcome, ReconcilerType, RetryPolicy};
use crate::error::StoreError;
use crate::metrics;
use crate::model::MembershipSnapshot;
use crate::store::{LeaseStore, Stores};

/// Key prefix under which replica leases are stored
pub const DEFAULT_LEASE_KEY_PREFIX: &str = "/masterleases/";

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15);

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Reconciler publishing the holders of live leases
pub struct LeaseReconciler {
    leases: Arc<dyn LeaseStore>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    ttl: Duration,
    interval: Duration,
    stopped: AtomicBool,
}

impl LeaseReconciler {
    pub fn new(stores: &Stores, service: ServiceIdentity) -> Self {
        Self {
            leases: stores.leases.clone(),
            publisher: Publisher::new(stores.endpoints.clone(), service, RetryPolicy::default()),
            clock: stores.clock.clone(),
            key_prefix: DEFAULT_LEASE_KEY_PREFIX.to_string(),
            ttl: DEFAULT_LEASE_TTL,
            interval: DEFAULT_RECONCILE_INTERVAL,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Interval between ticks, used to renew a lease before it can lapse
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.publisher.retry = retry;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn lease_key(&self, local: &Endpoint) -> String {
        format!("{}{}", self.key_prefix, local.address())
    }

    async fn snapshot(&self) -> Result<MembershipSnapshot, StoreError> {
        let entries = self.leases.list(&self.key_prefix).await?;
        Ok(MembershipSnapshot::new(entries, self.clock.now()))
    }

    /// Create or renew the local lease when it is missing, would lapse before
    /// the next tick, or carries stale ports.
    async fn renew_own(
        &self,
        snapshot: &mut MembershipSnapshot,
        local: &Endpoint,
    ) -> Result<(), StoreError> {
        let key = self.lease_key(local);
        let renew_before = add_duration(snapshot.read_at(), self.interval);

        let existing = snapshot.get(&key).cloned();
        if let Some(entry) = &existing
            && entry.record.expires_at > renew_before
            && entry.record.holder == *local
        {
            return Ok(());
        }

        let result = match &existing {
            Some(entry) => match self.leases.update(&key, local, entry.version, self.ttl).await {
                Err(e) if e.is_not_found() => self.leases.create(&key, local, self.ttl).await,
                other => other,
            },
            None => self.leases.create(&key, local, self.ttl).await,
        };

        match result {
            Ok(entry) => {
                metrics::record_lease_renewal();
                debug!(
                    "Renewed lease {} until {}",
                    entry.key, entry.record.expires_at
                );
                snapshot.upsert(entry);
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                // Another writer for our own key got there first; take its result
                debug!("Lease {} was renewed concurrently: {}", key, e);
                let now = self.clock.now();
                let renewed = self
                    .leases
                    .list(&self.key_prefix)
                    .await?
                    .into_iter()
                    .find(|entry| entry.key == key && entry.record.is_live_at(now));
                if let Some(entry) = renewed {
                    snapshot.upsert(entry);
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn reconcile_once(&self, local: &Endpoint) -> Result<ReconcileOutcome, StoreError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(ReconcileOutcome::Skipped);
        }

        let mut snapshot = self.snapshot().await?;
        self.renew_own(&mut snapshot, local).await?;

        let members = snapshot.members();
        debug!(
            "Live leases under {}: {}",
            self.key_prefix,
            members.len()
        );
        self.publisher.publish(|_| members.clone()).await
    }
}

#[async_trait]
impl EndpointReconciler for LeaseReconciler {
    fn reconciler_type(&self) -> ReconcilerType {
        ReconcilerType::Lease
    }

    async fn reconcile(&self, local: &Endpoint) -> Result<ReconcileOutcome, StoreError> {
        self.publisher
            .retry
            .retry_transient(|| self.reconcile_once(local))
            .await
    }

    async fn remove_endpoints(&self, local: &Endpoint) -> Result<(), StoreError> {
        let key = self.lease_key(local);
        match self.leases.delete(&key).await {
            Ok(()) => info!("Removed lease {}", key),
            Err(e) if e.is_not_found() => debug!("Lease {} already gone", key),
            Err(e) => return Err(e),
        }

        let mut snapshot = self.snapshot().await?;
        snapshot.remove(&key);
        let members = snapshot.members();

        if let ReconcileOutcome::Deferred { attempts } =
            self.publisher.publish(|_| members.clone()).await?
        {
            warn!(
                "Could not republish endpoints without {} after {} attempts",
                local.address(),
                attempts
            );
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
