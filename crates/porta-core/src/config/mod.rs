//! Endpoint reconciliation configuration
//!
//! [`Config`] is the partially specified form gathered from files, environment
//! and flags. [`Config::complete`] fills every unset field with its default,
//! validates the result and returns a [`CompletedConfig`], which exposes no
//! mutators. Reconcilers and the controller are only ever built from the
//! completed form.

mod net;
pub mod settings;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use porta_common::{Endpoint, EndpointPort, HTTPS_PORT_NAME, ServiceIdentity, local_ip};

use crate::controller::{ControllerConfig, ReconciliationController};
use crate::error::{ConfigError, StoreError};
use crate::reconciler::{
    EndpointReconciler, LeaseReconciler, MasterCountReconciler, NoneReconciler, ReconcilerType,
};
use crate::reconciler::{DEFAULT_LEASE_KEY_PREFIX, DEFAULT_LEASE_TTL, DEFAULT_RECONCILE_INTERVAL};
use crate::store::{StoreClientConfig, Stores};

pub use net::{IpNet, PortRange};

pub const DEFAULT_SERVICE_IP_RANGE: &str = "10.0.0.0/24";
pub const DEFAULT_SERVICE_PORT: u16 = 443;
pub const DEFAULT_NODE_PORT_RANGE: &str = "30000-32767";
pub const DEFAULT_PUBLIC_SERVICE_PORT: u16 = 6443;
pub const DEFAULT_REPAIR_SERVICES_INTERVAL: Duration = Duration::from_secs(180);
pub const DEFAULT_LEASE_GC_PERIOD: Duration = Duration::from_secs(3600);
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Below this TTL to interval ratio a single late tick may evict a replica
pub const RECOMMENDED_TTL_RATIO: u32 = 3;

/// Partially specified configuration; `None` means "use the default"
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub service_ip_range: Option<String>,
    pub secondary_service_ip_range: Option<String>,
    pub api_server_service_ip: Option<IpAddr>,
    pub api_server_service_port: Option<u16>,
    pub service_node_port_range: Option<String>,
    /// Node port of the front-door service, if it is exposed on one
    pub service_node_port: Option<u16>,

    pub endpoint_reconciler_type: Option<String>,
    pub master_count: Option<i64>,
    pub endpoint_reconciler_interval: Option<Duration>,
    pub endpoint_reconciler_ttl: Option<Duration>,
    pub repair_services_interval: Option<Duration>,
    pub lease_key_prefix: Option<String>,
    pub lease_gc_period: Option<Duration>,
    pub shutdown_grace_period: Option<Duration>,

    pub public_address: Option<IpAddr>,
    pub public_service_port: Option<u16>,
    pub service: Option<ServiceIdentity>,

    /// Client configuration of the shared stores
    pub store: Option<StoreClientConfig>,
}

/// Fully populated, validated configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedConfig {
    service_ip_range: IpNet,
    secondary_service_ip_range: Option<IpNet>,
    api_server_service_ip: IpAddr,
    api_server_service_port: u16,
    service_node_port_range: PortRange,
    service_node_port: Option<u16>,

    endpoint_reconciler_type: ReconcilerType,
    master_count: Option<i64>,
    endpoint_reconciler_interval: Duration,
    endpoint_reconciler_ttl: Duration,
    repair_services_interval: Duration,
    lease_key_prefix: String,
    lease_gc_period: Duration,
    shutdown_grace_period: Duration,

    public_address: IpAddr,
    public_service_port: u16,
    service: ServiceIdentity,

    store: Option<StoreClientConfig>,
}

impl Config {
    /// Apply defaults and validate.
    ///
    /// Never overwrites a field the caller set. Fails on an unknown
    /// reconciler type, a non-positive master count, a missing store client
    /// configuration or inconsistent network settings.
    pub fn complete(&self) -> Result<CompletedConfig, ConfigError> {
        let reconciler_type: ReconcilerType = self
            .endpoint_reconciler_type
            .as_deref()
            .unwrap_or_default()
            .parse()?;

        let master_count = self.master_count;
        if reconciler_type == ReconcilerType::MasterCount {
            let count = master_count.unwrap_or(0);
            if count <= 0 {
                return Err(ConfigError::InvalidMasterCount(count));
            }
        }

        if reconciler_type.uses_store() {
            match &self.store {
                Some(store) if store.has_endpoints() => {
                    non_zero_duration("store request timeout", store.request_timeout)?
                }
                _ => return Err(ConfigError::MissingDependency("store client configuration")),
            }
        }

        let service_ip_range: IpNet = self
            .service_ip_range
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_IP_RANGE)
            .parse()?;

        let secondary_service_ip_range = match &self.secondary_service_ip_range {
            Some(range) => {
                let secondary: IpNet = range.parse()?;
                if secondary.is_ipv4() == service_ip_range.is_ipv4() {
                    return Err(ConfigError::SecondaryRangeFamily(secondary.to_string()));
                }
                Some(secondary)
            }
            None => None,
        };

        let api_server_service_ip = match self.api_server_service_ip {
            Some(ip) => ip,
            None => service_ip_range.first_host().ok_or_else(|| {
                ConfigError::InvalidIpRange(
                    service_ip_range.to_string(),
                    "no usable host address".to_string(),
                )
            })?,
        };
        if !service_ip_range.contains(&api_server_service_ip) {
            return Err(ConfigError::ServiceIpOutOfRange {
                ip: api_server_service_ip.to_string(),
                range: service_ip_range.to_string(),
            });
        }

        let api_server_service_port = self.api_server_service_port.unwrap_or(DEFAULT_SERVICE_PORT);
        non_zero_port("service port", api_server_service_port)?;

        let service_node_port_range: PortRange = self
            .service_node_port_range
            .as_deref()
            .unwrap_or(DEFAULT_NODE_PORT_RANGE)
            .parse()?;
        if let Some(port) = self.service_node_port
            && !service_node_port_range.contains(port)
        {
            return Err(ConfigError::NodePortOutOfRange {
                port,
                range: service_node_port_range.to_string(),
            });
        }

        let interval = self
            .endpoint_reconciler_interval
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL);
        non_zero_duration("endpoint reconciler interval", interval)?;

        let ttl = self.endpoint_reconciler_ttl.unwrap_or(DEFAULT_LEASE_TTL);
        non_zero_duration("endpoint reconciler ttl", ttl)?;
        // Only leases expire, so the other strategies ignore the ttl
        if reconciler_type == ReconcilerType::Lease && ttl <= interval {
            return Err(ConfigError::TtlNotAboveInterval { ttl, interval });
        }
        if reconciler_type == ReconcilerType::Lease
            && interval
                .checked_mul(RECOMMENDED_TTL_RATIO)
                .is_some_and(|recommended| ttl < recommended)
        {
            warn!(
                "Endpoint reconciler ttl {:?} is less than {} times the interval {:?}; a single late tick may evict a replica",
                ttl, RECOMMENDED_TTL_RATIO, interval
            );
        }

        let repair_services_interval = self
            .repair_services_interval
            .unwrap_or(DEFAULT_REPAIR_SERVICES_INTERVAL);
        non_zero_duration("repair services interval", repair_services_interval)?;

        let lease_key_prefix = self
            .lease_key_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_LEASE_KEY_PREFIX.to_string());
        if lease_key_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "lease key prefix".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let lease_gc_period = self.lease_gc_period.unwrap_or(DEFAULT_LEASE_GC_PERIOD);
        non_zero_duration("lease gc period", lease_gc_period)?;

        let shutdown_grace_period = self
            .shutdown_grace_period
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_PERIOD);

        let public_address = self.public_address.unwrap_or_else(local_ip);
        let public_service_port = self
            .public_service_port
            .unwrap_or(DEFAULT_PUBLIC_SERVICE_PORT);
        non_zero_port("public service port", public_service_port)?;

        Ok(CompletedConfig {
            service_ip_range,
            secondary_service_ip_range,
            api_server_service_ip,
            api_server_service_port,
            service_node_port_range,
            service_node_port: self.service_node_port,
            endpoint_reconciler_type: reconciler_type,
            master_count,
            endpoint_reconciler_interval: interval,
            endpoint_reconciler_ttl: ttl,
            repair_services_interval,
            lease_key_prefix,
            lease_gc_period,
            shutdown_grace_period,
            public_address,
            public_service_port,
            service: self.service.clone().unwrap_or_default(),
            store: self.store.clone(),
        })
    }
}

fn non_zero_duration(key: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

fn non_zero_port(key: &str, value: u16) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "port must be non-zero".to_string(),
        });
    }
    Ok(())
}

impl CompletedConfig {
    pub fn service_ip_range(&self) -> IpNet {
        self.service_ip_range
    }

    pub fn secondary_service_ip_range(&self) -> Option<IpNet> {
        self.secondary_service_ip_range
    }

    pub fn api_server_service_ip(&self) -> IpAddr {
        self.api_server_service_ip
    }

    pub fn api_server_service_port(&self) -> u16 {
        self.api_server_service_port
    }

    pub fn service_node_port_range(&self) -> PortRange {
        self.service_node_port_range
    }

    pub fn service_node_port(&self) -> Option<u16> {
        self.service_node_port
    }

    pub fn endpoint_reconciler_type(&self) -> ReconcilerType {
        self.endpoint_reconciler_type
    }

    /// Expected replica count; only meaningful for the master-count strategy
    pub fn master_count(&self) -> Option<i64> {
        self.master_count
    }

    pub fn endpoint_reconciler_interval(&self) -> Duration {
        self.endpoint_reconciler_interval
    }

    pub fn endpoint_reconciler_ttl(&self) -> Duration {
        self.endpoint_reconciler_ttl
    }

    pub fn repair_services_interval(&self) -> Duration {
        self.repair_services_interval
    }

    pub fn lease_key_prefix(&self) -> &str {
        &self.lease_key_prefix
    }

    pub fn lease_gc_period(&self) -> Duration {
        self.lease_gc_period
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        self.shutdown_grace_period
    }

    pub fn public_address(&self) -> IpAddr {
        self.public_address
    }

    pub fn public_service_port(&self) -> u16 {
        self.public_service_port
    }

    pub fn service(&self) -> &ServiceIdentity {
        &self.service
    }

    pub fn store(&self) -> Option<&StoreClientConfig> {
        self.store.as_ref()
    }

    /// The endpoint this replica publishes
    pub fn local_endpoint(&self) -> Endpoint {
        Endpoint::new(
            self.public_address,
            [EndpointPort::tcp(HTTPS_PORT_NAME, self.public_service_port)],
        )
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            interval: self.endpoint_reconciler_interval,
            shutdown_grace_period: self.shutdown_grace_period,
        }
    }

    /// Connect to the stores named by the store client configuration
    pub fn connect_stores(&self) -> Result<Option<Stores>, StoreError> {
        match &self.store {
            Some(store) if self.endpoint_reconciler_type.uses_store() => {
                Stores::connect(store, Some(self.lease_gc_period)).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Build the configured reconciler.
    ///
    /// Every store call made by the reconciler is bounded by the store
    /// request timeout. `stores` is ignored by the none strategy.
    pub fn create_endpoint_reconciler(
        &self,
        stores: Option<&Stores>,
    ) -> Result<Arc<dyn EndpointReconciler>, ConfigError> {
        let bounded = match (stores, &self.store) {
            (Some(stores), Some(client)) if !client.request_timeout.is_zero() => {
                Some(stores.with_deadline(client.request_timeout))
            }
            (Some(stores), _) => Some(stores.clone()),
            (None, _) => None,
        };

        match self.endpoint_reconciler_type {
            ReconcilerType::MasterCount => {
                let stores = bounded.ok_or(ConfigError::MissingDependency("stores"))?;
                let count = self.master_count.unwrap_or(0);
                let count =
                    usize::try_from(count).map_err(|_| ConfigError::InvalidMasterCount(count))?;
                info!("Using master-count endpoint reconciler for {} replicas", count);
                Ok(Arc::new(MasterCountReconciler::new(
                    &stores,
                    self.service.clone(),
                    count,
                )))
            }
            ReconcilerType::Lease => {
                let stores = bounded.ok_or(ConfigError::MissingDependency("stores"))?;
                info!(
                    "Using lease endpoint reconciler with ttl {:?} under {}",
                    self.endpoint_reconciler_ttl, self.lease_key_prefix
                );
                Ok(Arc::new(
                    LeaseReconciler::new(&stores, self.service.clone())
                        .with_key_prefix(self.lease_key_prefix.clone())
                        .with_ttl(self.endpoint_reconciler_ttl)
                        .with_interval(self.endpoint_reconciler_interval),
                ))
            }
            ReconcilerType::None => {
                info!("Using none endpoint reconciler");
                Ok(Arc::new(NoneReconciler::new()))
            }
        }
    }

    /// Build the reconciler and wrap it in a controller for the local endpoint
    pub fn create_controller(
        &self,
        stores: Option<&Stores>,
    ) -> Result<ReconciliationController, ConfigError> {
        let reconciler = self.create_endpoint_reconciler(stores)?;
        Ok(ReconciliationController::new(
            reconciler,
            self.local_endpoint(),
            self.controller_config(),
        ))
    }
}

impl From<&CompletedConfig> for Config {
    fn from(c: &CompletedConfig) -> Self {
        Config {
            service_ip_range: Some(c.service_ip_range.to_string()),
            secondary_service_ip_range: c.secondary_service_ip_range.map(|r| r.to_string()),
            api_server_service_ip: Some(c.api_server_service_ip),
            api_server_service_port: Some(c.api_server_service_port),
            service_node_port_range: Some(c.service_node_port_range.to_string()),
            service_node_port: c.service_node_port,
            endpoint_reconciler_type: Some(c.endpoint_reconciler_type.to_string()),
            master_count: c.master_count,
            endpoint_reconciler_interval: Some(c.endpoint_reconciler_interval),
            endpoint_reconciler_ttl: Some(c.endpoint_reconciler_ttl),
            repair_services_interval: Some(c.repair_services_interval),
            lease_key_prefix: Some(c.lease_key_prefix.clone()),
            lease_gc_period: Some(c.lease_gc_period),
            shutdown_grace_period: Some(c.shutdown_grace_period),
            public_address: Some(c.public_address),
            public_service_port: Some(c.public_service_port),
            service: Some(c.service.clone()),
            store: c.store.clone(),
        }
    }
}
