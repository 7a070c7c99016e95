// In-memory store implementations
// Lease records live in an ordered map behind a single lock, so `list` is an
// atomic read and every mutation is a single-key compare-and-swap. The
// endpoints record store only ever touches one key per call and uses a
// concurrent map.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use tokio::time::interval;
use tracing::debug;

use porta_common::{Clock, Endpoint, ServiceIdentity, add_duration};

use super::{EndpointsStore, LeaseStore};
use crate::error::StoreError;
use crate::model::{EndpointsList, LeaseEntry, LeaseRecord, Version};

/// Read and write counters of a store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
}

#[derive(Default)]
struct StatsCollector {
    reads: AtomicU64,
    writes: AtomicU64,
}

impl StatsCollector {
    fn read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

/// Injectable faults: simulated outage and per-call latency
#[derive(Default)]
struct Faults {
    unavailable: AtomicBool,
    latency: Mutex<Duration>,
}

impl Faults {
    async fn enter(&self) -> Result<(), StoreError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory lease store
pub struct MemoryLeaseStore {
    leases: Arc<RwLock<BTreeMap<String, LeaseEntry>>>,
    clock: Arc<dyn Clock>,
    next_version: AtomicU64,
    stats: StatsCollector,
    faults: Faults,
    gc_handle: Option<tokio::task::JoinHandle<()>>,
}

impl MemoryLeaseStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: Arc::new(RwLock::new(BTreeMap::new())),
            clock,
            next_version: AtomicU64::new(1),
            stats: StatsCollector::default(),
            faults: Faults::default(),
            gc_handle: None,
        }
    }

    /// Start a background sweep that physically drops expired leases.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_gc(mut self, period: Duration) -> Self {
        let leases = self.leases.clone();
        let clock = self.clock.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = Self::purge(&leases, clock.as_ref());
                if purged > 0 {
                    debug!("Lease GC removed {} expired leases", purged);
                }
            }
        });

        self.gc_handle = Some(handle);
        self
    }

    /// Drop every expired lease now, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        Self::purge(&self.leases, self.clock.as_ref())
    }

    fn purge(leases: &RwLock<BTreeMap<String, LeaseEntry>>, clock: &dyn Clock) -> usize {
        let now = clock.now();
        let mut leases = leases.write();
        let before = leases.len();
        leases.retain(|_, e| e.record.is_live_at(now));
        before - leases.len()
    }

    /// Physically persisted leases, including expired ones
    pub fn len(&self) -> usize {
        self.leases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.read().is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.snapshot()
    }

    pub fn set_available(&self, available: bool) {
        self.faults.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.faults.latency.lock() = latency;
    }

    fn version(&self) -> Version {
        Version::new(self.next_version.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, holder: &Endpoint, ttl: Duration) -> Result<LeaseRecord, StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl(ttl));
        }
        let now = self.clock.now();
        Ok(LeaseRecord {
            holder: holder.clone(),
            renewed_at: now,
            expires_at: add_duration(now, ttl),
        })
    }
}

impl Drop for MemoryLeaseStore {
    fn drop(&mut self) {
        if let Some(handle) = self.gc_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn create(
        &self,
        key: &str,
        holder: &Endpoint,
        ttl: Duration,
    ) -> Result<LeaseEntry, StoreError> {
        self.faults.enter().await?;
        let record = self.record(holder, ttl)?;

        let mut leases = self.leases.write();
        if let Some(existing) = leases.get(key)
            && existing.record.is_live_at(record.renewed_at)
        {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        let entry = LeaseEntry {
            key: key.to_string(),
            record,
            version: self.version(),
        };
        leases.insert(key.to_string(), entry.clone());
        self.stats.write();
        Ok(entry)
    }

    async fn update(
        &self,
        key: &str,
        holder: &Endpoint,
        expected: Version,
        ttl: Duration,
    ) -> Result<LeaseEntry, StoreError> {
        self.faults.enter().await?;
        let record = self.record(holder, ttl)?;

        let mut leases = self.leases.write();
        let existing = leases
            .get_mut(key)
            .filter(|e| e.record.is_live_at(record.renewed_at))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if existing.version != expected {
            return Err(StoreError::VersionConflict {
                key: key.to_string(),
                expected,
                actual: existing.version,
            });
        }

        existing.record = record;
        existing.version = self.version();
        self.stats.write();
        Ok(existing.clone())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<LeaseEntry>, StoreError> {
        self.faults.enter().await?;
        self.stats.read();

        let leases = self.leases.read();
        Ok(leases
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.faults.enter().await?;

        match self.leases.write().remove(key) {
            Some(_) => {
                self.stats.write();
                Ok(())
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }
}

/// In-memory endpoints record store
pub struct MemoryEndpointsStore {
    lists: DashMap<String, EndpointsList>,
    next_version: AtomicU64,
    stats: StatsCollector,
    faults: Faults,
}

impl MemoryEndpointsStore {
    pub fn new() -> Self {
        Self {
            lists: DashMap::new(),
            next_version: AtomicU64::new(1),
            stats: StatsCollector::default(),
            faults: Faults::default(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.snapshot()
    }

    pub fn set_available(&self, available: bool) {
        self.faults.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.faults.latency.lock() = latency;
    }

    /// Read the stored record without touching the counters
    pub fn peek(&self, service: &ServiceIdentity) -> Option<EndpointsList> {
        self.lists.get(&service.key()).map(|e| e.value().clone())
    }

    fn version(&self) -> Version {
        Version::new(self.next_version.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for MemoryEndpointsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointsStore for MemoryEndpointsStore {
    async fn get(&self, service: &ServiceIdentity) -> Result<Option<EndpointsList>, StoreError> {
        self.faults.enter().await?;
        self.stats.read();
        Ok(self.peek(service))
    }

    async fn create(&self, list: &EndpointsList) -> Result<EndpointsList, StoreError> {
        self.faults.enter().await?;

        let key = list.service.key();
        match self.lists.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(key)),
            Entry::Vacant(slot) => {
                let mut stored = list.clone();
                stored.version = Some(self.version());
                slot.insert(stored.clone());
                self.stats.write();
                Ok(stored)
            }
        }
    }

    async fn update(&self, list: &EndpointsList) -> Result<EndpointsList, StoreError> {
        self.faults.enter().await?;

        let key = list.service.key();
        let mut existing = self
            .lists
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        let actual = existing.version.unwrap_or_default();
        let expected = list.version.unwrap_or_default();
        if list.version != existing.version {
            return Err(StoreError::VersionConflict {
                key,
                expected,
                actual,
            });
        }

        let mut stored = list.clone();
        stored.version = Some(self.version());
        *existing = stored.clone();
        self.stats.write();
        Ok(stored)
    }
}
