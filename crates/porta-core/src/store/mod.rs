//! Shared stores the reconciler replicas coordinate through
//!
//! Two narrow contracts are required from the persistence layer:
//! - [`LeaseStore`]: TTL-keyed records, one per replica, with single-key
//!   compare-and-swap on update.
//! - [`EndpointsStore`]: the versioned published endpoints record.
//!
//! Neither contract needs multi-key transactions. All correctness across
//! replicas comes from the version preconditions.

mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use porta_common::{Clock, Endpoint, ServiceIdentity, SystemClock};

use crate::error::StoreError;
use crate::model::{EndpointsList, LeaseEntry, Version};

pub use memory::{MemoryEndpointsStore, MemoryLeaseStore, StoreStats};

/// Scheme accepted by [`Stores::connect`] for the in-process store
pub const MEMORY_STORE_SCHEME: &str = "memory://";

/// TTL-keyed lease store
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Create a lease; fails with `AlreadyExists` if a live lease holds the key
    async fn create(
        &self,
        key: &str,
        holder: &Endpoint,
        ttl: Duration,
    ) -> Result<LeaseEntry, StoreError>;

    /// Renew a lease; fails with `VersionConflict` if the stored version differs
    async fn update(
        &self,
        key: &str,
        holder: &Endpoint,
        expected: Version,
        ttl: Duration,
    ) -> Result<LeaseEntry, StoreError>;

    /// List every persisted lease under the prefix, ordered by key.
    /// Expired leases may be included; callers filter by their read time.
    async fn list(&self, prefix: &str) -> Result<Vec<LeaseEntry>, StoreError>;

    /// Delete a lease; fails with `NotFound` if absent
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Versioned holder of the published endpoints record
#[async_trait]
pub trait EndpointsStore: Send + Sync {
    async fn get(&self, service: &ServiceIdentity) -> Result<Option<EndpointsList>, StoreError>;

    /// Store a new record; fails with `AlreadyExists` if one is present
    async fn create(&self, list: &EndpointsList) -> Result<EndpointsList, StoreError>;

    /// Replace the record, using `list.version` as the precondition
    async fn update(&self, list: &EndpointsList) -> Result<EndpointsList, StoreError>;
}

/// Client configuration required to reach the shared stores
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreClientConfig {
    pub endpoints: Vec<String>,
    pub request_timeout: Duration,
}

impl StoreClientConfig {
    pub fn in_memory() -> Self {
        Self {
            endpoints: vec![MEMORY_STORE_SCHEME.to_string()],
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Whether at least one non-blank store endpoint is configured
    pub fn has_endpoints(&self) -> bool {
        self.endpoints.iter().any(|e| !e.trim().is_empty())
    }
}

/// Handles to the shared stores used to build reconcilers
#[derive(Clone)]
pub struct Stores {
    pub leases: Arc<dyn LeaseStore>,
    pub endpoints: Arc<dyn EndpointsStore>,
    pub clock: Arc<dyn Clock>,
}

impl Stores {
    /// In-process stores backed by concurrent maps
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: Arc::new(MemoryLeaseStore::new(clock.clone())),
            endpoints: Arc::new(MemoryEndpointsStore::new()),
            clock,
        }
    }

    /// Connect to the stores named by the client configuration.
    ///
    /// Only the in-process `memory://` backend is built in; the returned lease
    /// store runs a background sweep every `gc_period` when one is given.
    pub fn connect(
        config: &StoreClientConfig,
        gc_period: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let endpoint = config
            .endpoints
            .first()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| StoreError::Unavailable("no store endpoints configured".to_string()))?;

        if !endpoint.starts_with(MEMORY_STORE_SCHEME) {
            return Err(StoreError::Unavailable(format!(
                "unsupported store endpoint: {}",
                endpoint
            )));
        }

        info!("Connecting to in-memory store: {}", endpoint);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut leases = MemoryLeaseStore::new(clock.clone());
        if let Some(period) = gc_period {
            leases = leases.with_gc(period);
        }

        Ok(Self {
            leases: Arc::new(leases),
            endpoints: Arc::new(MemoryEndpointsStore::new()),
            clock,
        })
    }

    /// Wrap both stores so that every call fails with `Timeout` after `timeout`
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        Self {
            leases: Arc::new(Deadline::new(self.leases.clone(), timeout)),
            endpoints: Arc::new(Deadline::new(self.endpoints.clone(), timeout)),
            clock: self.clock.clone(),
        }
    }
}

/// Bounds every call to the wrapped store by a request timeout
pub struct Deadline<S: ?Sized> {
    inner: Arc<S>,
    timeout: Duration,
}

impl<S: ?Sized> Deadline<S> {
    pub fn new(inner: Arc<S>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn run<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl LeaseStore for Deadline<dyn LeaseStore> {
    async fn create(
        &self,
        key: &str,
        holder: &Endpoint,
        ttl: Duration,
    ) -> Result<LeaseEntry, StoreError> {
        self.run(self.inner.create(key, holder, ttl)).await
    }

    async fn update(
        &self,
        key: &str,
        holder: &Endpoint,
        expected: Version,
        ttl: Duration,
    ) -> Result<LeaseEntry, StoreError> {
        self.run(self.inner.update(key, holder, expected, ttl)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<LeaseEntry>, StoreError> {
        self.run(self.inner.list(prefix)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.run(self.inner.delete(key)).await
    }
}

#[async_trait]
impl EndpointsStore for Deadline<dyn EndpointsStore> {
    async fn get(&self, service: &ServiceIdentity) -> Result<Option<EndpointsList>, StoreError> {
        self.run(self.inner.get(service)).await
    }

    async fn create(&self, list: &EndpointsList) -> Result<EndpointsList, StoreError> {
        self.run(self.inner.create(list)).await
    }

    async fn update(&self, list: &EndpointsList) -> Result<EndpointsList, StoreError> {
        self.run(self.inner.update(list)).await
    }
}
