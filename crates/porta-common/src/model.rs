// Shared data model for front-door membership
// Endpoints describe one replica's reachable address; the service identity
// names the published record they are collected into.

use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_NAMESPACE};

/// Transport protocol of a published port
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortProtocol::Tcp => write!(f, "TCP"),
            PortProtocol::Udp => write!(f, "UDP"),
            PortProtocol::Sctp => write!(f, "SCTP"),
        }
    }
}

/// A named port exposed by a replica
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointPort {
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: PortProtocol,
}

impl EndpointPort {
    pub fn tcp(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            protocol: PortProtocol::Tcp,
        }
    }
}

/// One replica's reachable address: an IP plus its set of named ports.
///
/// Ports are kept sorted and unique by name, so two endpoints built from the
/// same ports in a different order compare equal. Endpoints order by the
/// textual form of their address, which is the tie-break used when a
/// membership list has to be truncated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    ip: IpAddr,
    ports: Vec<EndpointPort>,
}

impl Endpoint {
    pub fn new(ip: IpAddr, ports: impl IntoIterator<Item = EndpointPort>) -> Self {
        let mut ports: Vec<EndpointPort> = ports.into_iter().collect();
        ports.sort();
        ports.dedup_by(|a, b| a.name == b.name);
        Self { ip, ports }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn ports(&self) -> &[EndpointPort] {
        &self.ports
    }

    /// Address key used for lease keys and list ordering
    pub fn address(&self) -> String {
        self.ip.to_string()
    }

    /// Whether both endpoints point at the same address, ignoring ports
    pub fn same_address(&self, other: &Endpoint) -> bool {
        self.ip == other.ip
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address()
            .cmp(&other.address())
            .then_with(|| self.ports.cmp(&other.ports))
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ip)?;
        for (i, port) in self.ports.iter().enumerate() {
            let sep = if i == 0 { '[' } else { ',' };
            write!(f, "{}{}:{}/{}", sep, port.name, port.port, port.protocol)?;
        }
        if !self.ports.is_empty() {
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Identity of the front-door service whose endpoints are published
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub namespace: String,
    pub name: String,
}

impl ServiceIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Storage key of the published endpoints record
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAMESPACE, DEFAULT_SERVICE_NAME)
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
