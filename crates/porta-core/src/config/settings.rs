// Mapping from layered settings (file, environment, flags) onto `Config`

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use porta_common::{ServiceIdentity, parse_duration};

use super::Config;
use crate::error::ConfigError;
use crate::store::StoreClientConfig;

pub const RECONCILER_TYPE: &str = "porta.endpoint.reconciler.type";
pub const RECONCILER_INTERVAL: &str = "porta.endpoint.reconciler.interval";
pub const RECONCILER_TTL: &str = "porta.endpoint.reconciler.ttl";
pub const RECONCILER_MASTER_COUNT: &str = "porta.endpoint.reconciler.master-count";
pub const LEASE_KEY_PREFIX: &str = "porta.endpoint.lease.key-prefix";
pub const LEASE_GC_PERIOD: &str = "porta.endpoint.lease.gc-period";
pub const SHUTDOWN_GRACE_PERIOD: &str = "porta.endpoint.shutdown-grace-period";
pub const ENDPOINT_SERVICE: &str = "porta.endpoint.service";

pub const SERVICE_IP_RANGE: &str = "porta.service.ip-range";
pub const SERVICE_SECONDARY_IP_RANGE: &str = "porta.service.secondary-ip-range";
pub const SERVICE_IP: &str = "porta.service.ip";
pub const SERVICE_PORT: &str = "porta.service.port";
pub const SERVICE_NODE_PORT_RANGE: &str = "porta.service.node-port-range";
pub const SERVICE_NODE_PORT: &str = "porta.service.node-port";
pub const SERVICE_REPAIR_INTERVAL: &str = "porta.service.repair-interval";

pub const STORE_ENDPOINTS: &str = "porta.store.endpoints";
pub const STORE_REQUEST_TIMEOUT: &str = "porta.store.request-timeout";

pub const PUBLIC_ADDRESS: &str = "porta.public.address";
pub const PUBLIC_PORT: &str = "porta.public.port";

impl Config {
    /// Read every known key from layered settings. Absent keys stay unset.
    pub fn from_settings(settings: &::config::Config) -> Result<Config, ConfigError> {
        let store = match (
            string_list(settings, STORE_ENDPOINTS)?,
            duration(settings, STORE_REQUEST_TIMEOUT)?,
        ) {
            (None, None) => None,
            (endpoints, timeout) => {
                let defaults = StoreClientConfig::in_memory();
                Some(StoreClientConfig {
                    endpoints: endpoints.unwrap_or(defaults.endpoints),
                    request_timeout: timeout.unwrap_or(defaults.request_timeout),
                })
            }
        };

        Ok(Config {
            service_ip_range: string(settings, SERVICE_IP_RANGE)?,
            secondary_service_ip_range: string(settings, SERVICE_SECONDARY_IP_RANGE)?,
            api_server_service_ip: parsed::<IpAddr>(settings, SERVICE_IP)?,
            api_server_service_port: port(settings, SERVICE_PORT)?,
            service_node_port_range: string(settings, SERVICE_NODE_PORT_RANGE)?,
            service_node_port: port(settings, SERVICE_NODE_PORT)?,
            endpoint_reconciler_type: string(settings, RECONCILER_TYPE)?,
            master_count: integer(settings, RECONCILER_MASTER_COUNT)?,
            endpoint_reconciler_interval: duration(settings, RECONCILER_INTERVAL)?,
            endpoint_reconciler_ttl: duration(settings, RECONCILER_TTL)?,
            repair_services_interval: duration(settings, SERVICE_REPAIR_INTERVAL)?,
            lease_key_prefix: string(settings, LEASE_KEY_PREFIX)?,
            lease_gc_period: duration(settings, LEASE_GC_PERIOD)?,
            shutdown_grace_period: duration(settings, SHUTDOWN_GRACE_PERIOD)?,
            public_address: parsed::<IpAddr>(settings, PUBLIC_ADDRESS)?,
            public_service_port: port(settings, PUBLIC_PORT)?,
            service: service(settings)?,
            store,
        })
    }
}

fn invalid(key: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Look a key up as written, then with `_` in place of `-`, since
/// environment variable names cannot carry hyphens.
fn lookup<T>(
    settings: &::config::Config,
    key: &str,
    get: impl Fn(&::config::Config, &str) -> Result<T, ::config::ConfigError>,
) -> Result<Option<T>, ::config::ConfigError> {
    let underscored = key.replace('-', "_");
    for candidate in [key, underscored.as_str()] {
        match get(settings, candidate) {
            Ok(v) => return Ok(Some(v)),
            Err(::config::ConfigError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

fn string(settings: &::config::Config, key: &str) -> Result<Option<String>, ConfigError> {
    lookup(settings, key, |s, k| s.get_string(k)).map_err(|e| invalid(key, e))
}

fn integer(settings: &::config::Config, key: &str) -> Result<Option<i64>, ConfigError> {
    lookup(settings, key, |s, k| s.get_int(k)).map_err(|e| invalid(key, e))
}

fn parsed<T>(settings: &::config::Config, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    string(settings, key)?
        .map(|v| v.trim().parse::<T>().map_err(|e| invalid(key, e)))
        .transpose()
}

fn port(settings: &::config::Config, key: &str) -> Result<Option<u16>, ConfigError> {
    integer(settings, key)?
        .map(|v| u16::try_from(v).map_err(|_| invalid(key, format!("port {} out of range", v))))
        .transpose()
}

fn duration(settings: &::config::Config, key: &str) -> Result<Option<Duration>, ConfigError> {
    string(settings, key)?
        .map(|v| {
            parse_duration(&v).ok_or_else(|| invalid(key, format!("invalid duration '{}'", v)))
        })
        .transpose()
}

/// A list given either as a sequence or as a comma separated string
fn string_list(settings: &::config::Config, key: &str) -> Result<Option<Vec<String>>, ConfigError> {
    let values = match lookup(settings, key, |s, k| s.get_array(k)) {
        Ok(Some(values)) => values
            .into_iter()
            .map(|v| v.into_string().map_err(|e| invalid(key, e)))
            .collect::<Result<Vec<_>, _>>()?,
        Ok(None) => return Ok(None),
        Err(_) => string(settings, key)?
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .collect(),
    };

    Ok(Some(values.into_iter().filter(|v| !v.is_empty()).collect()))
}

/// Front-door service identity written as `namespace/name`
fn service(settings: &::config::Config) -> Result<Option<ServiceIdentity>, ConfigError> {
    string(settings, ENDPOINT_SERVICE)?
        .map(|v| match v.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                Ok(ServiceIdentity::new(ns, name))
            }
            _ => Err(invalid(ENDPOINT_SERVICE, "expected namespace/name")),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::config::{File, FileFormat};

    fn settings(yaml: &str) -> ::config::Config {
        ::config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_settings_leave_everything_unset() {
        let config = Config::from_settings(&settings("{}")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_reads_known_keys() {
        let config = Config::from_settings(&settings(
            r#"
porta:
  endpoint:
    reconciler:
      type: master-count
      interval: 5s
      ttl: 20
      master-count: 3
    service: kube-system/front
  service:
    ip-range: 10.96.0.0/12
    ip: 10.96.0.1
    port: 443
    node-port-range: 30000-32767
  store:
    endpoints: memory://
    request-timeout: 500ms
  public:
    address: 192.168.1.10
    port: 6443
"#,
        ))
        .unwrap();

        assert_eq!(config.endpoint_reconciler_type.as_deref(), Some("master-count"));
        assert_eq!(config.endpoint_reconciler_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.endpoint_reconciler_ttl, Some(Duration::from_secs(20)));
        assert_eq!(config.master_count, Some(3));
        assert_eq!(config.service, Some(ServiceIdentity::new("kube-system", "front")));
        assert_eq!(config.api_server_service_ip, Some("10.96.0.1".parse().unwrap()));
        assert_eq!(config.public_service_port, Some(6443));
        assert_eq!(
            config.store,
            Some(StoreClientConfig {
                endpoints: vec!["memory://".to_string()],
                request_timeout: Duration::from_millis(500),
            })
        );

        let completed = config.complete().unwrap();
        assert_eq!(completed.master_count(), Some(3));
    }

    #[test]
    fn test_underscored_keys_match_hyphenated_names() {
        let config = Config::from_settings(&settings(
            "porta:\n  endpoint:\n    reconciler:\n      master_count: 2\n  store:\n    request_timeout: 2s\n",
        ))
        .unwrap();
        assert_eq!(config.master_count, Some(2));
        assert_eq!(config.store.unwrap().request_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_store_endpoints_as_sequence() {
        let config = Config::from_settings(&settings(
            "porta:\n  store:\n    endpoints: [\"memory://a\", \"memory://b\"]\n",
        ))
        .unwrap();
        let store = config.store.unwrap();
        assert_eq!(store.endpoints, vec!["memory://a", "memory://b"]);
        assert_eq!(store.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let bad_duration = settings("porta:\n  endpoint:\n    reconciler:\n      ttl: soon\n");
        assert!(matches!(
            Config::from_settings(&bad_duration),
            Err(ConfigError::InvalidValue { .. })
        ));

        let bad_port = settings("porta:\n  public:\n    port: 70000\n");
        assert!(Config::from_settings(&bad_port).is_err());

        let bad_ip = settings("porta:\n  public:\n    address: nowhere\n");
        assert!(Config::from_settings(&bad_ip).is_err());
    }
}
