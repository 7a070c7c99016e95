//! Common test utilities for reconciliation integration tests
//!
//! This module provides:
//! - Cluster: shared in-memory stores plus a manually driven clock
//! - TokioClock: a wall clock that follows tokio's (pausable) time
//! - ContendedEndpointsStore: an endpoints store that loses every write race

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use porta_common::{Clock, Endpoint, EndpointPort, ManualClock, ServiceIdentity, add_duration};
use porta_core::reconciler::{LeaseReconciler, MasterCountReconciler};
use porta_core::store::{MemoryEndpointsStore, MemoryLeaseStore};
use porta_core::{EndpointsList, EndpointsStore, StoreError, Stores};

pub const TTL: Duration = Duration::from_secs(15);
pub const INTERVAL: Duration = Duration::from_secs(10);

pub fn endpoint(ip: &str) -> Endpoint {
    Endpoint::new(ip.parse().unwrap(), [EndpointPort::tcp("https", 6443)])
}

/// Shared stores seen by every replica of a test cluster
pub struct Cluster {
    pub clock: ManualClock,
    pub leases: Arc<MemoryLeaseStore>,
    pub endpoints: Arc<MemoryEndpointsStore>,
    pub stores: Stores,
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_clock(ManualClock::at_epoch())
    }

    pub fn with_clock(clock: ManualClock) -> Self {
        let leases = Arc::new(MemoryLeaseStore::new(Arc::new(clock.clone())));
        let endpoints = Arc::new(MemoryEndpointsStore::new());
        let stores = Stores {
            leases: leases.clone(),
            endpoints: endpoints.clone(),
            clock: Arc::new(clock.clone()),
        };
        Self {
            clock,
            leases,
            endpoints,
            stores,
        }
    }

    pub fn lease_reconciler(&self) -> LeaseReconciler {
        LeaseReconciler::new(&self.stores, ServiceIdentity::default())
            .with_ttl(TTL)
            .with_interval(INTERVAL)
    }

    pub fn master_count_reconciler(&self, count: usize) -> MasterCountReconciler {
        MasterCountReconciler::new(&self.stores, ServiceIdentity::default(), count)
    }

    /// Move the shared clock to `secs` after the epoch
    pub fn at(&self, secs: u64) {
        self.clock
            .set(add_duration(DateTime::UNIX_EPOCH, Duration::from_secs(secs)));
    }

    pub fn published(&self) -> Vec<String> {
        self.endpoints
            .peek(&ServiceIdentity::default())
            .map(|l| l.addresses())
            .unwrap_or_default()
    }
}

/// Wall clock that advances with tokio time, so paused-time tests drive
/// lease expiry and the controller's ticks together.
#[derive(Debug)]
pub struct TokioClock {
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        add_duration(DateTime::UNIX_EPOCH, self.start.elapsed())
    }
}

/// Endpoints store where another writer always bumps the record first
pub struct ContendedEndpointsStore {
    pub inner: Arc<MemoryEndpointsStore>,
}

#[async_trait]
impl EndpointsStore for ContendedEndpointsStore {
    async fn get(&self, service: &ServiceIdentity) -> Result<Option<EndpointsList>, StoreError> {
        self.inner.get(service).await
    }

    async fn create(&self, list: &EndpointsList) -> Result<EndpointsList, StoreError> {
        self.inner.create(list).await
    }

    async fn update(&self, list: &EndpointsList) -> Result<EndpointsList, StoreError> {
        if let Some(current) = self.inner.peek(&list.service) {
            self.inner.update(&current).await?;
        }
        self.inner.update(list).await
    }
}
