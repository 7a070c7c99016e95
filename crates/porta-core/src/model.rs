// Lease and endpoints records exchanged with the shared stores

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use porta_common::{Endpoint, ServiceIdentity};

/// Store-assigned version token used for compare-and-swap
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version(u64);

impl Version {
    pub fn new(v: u64) -> Self {
        Self(v)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A time-bounded claim of liveness held by one replica
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder: Endpoint,
    pub renewed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    /// A record whose expiry is at or before `at` is logically absent
    pub fn is_live_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at > at
    }
}

/// A lease record as returned by the store: key, value and version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseEntry {
    pub key: String,
    pub record: LeaseRecord,
    pub version: Version,
}

/// Live leases observed by a single store read
#[derive(Clone, Debug)]
pub struct MembershipSnapshot {
    read_at: DateTime<Utc>,
    entries: Vec<LeaseEntry>,
}

impl MembershipSnapshot {
    /// Build a snapshot from a store listing, dropping every record that is
    /// not strictly live at `read_at`.
    pub fn new(entries: Vec<LeaseEntry>, read_at: DateTime<Utc>) -> Self {
        let entries = entries
            .into_iter()
            .filter(|e| e.record.is_live_at(read_at))
            .collect();
        Self { read_at, entries }
    }

    pub fn read_at(&self) -> DateTime<Utc> {
        self.read_at
    }

    pub fn get(&self, key: &str) -> Option<&LeaseEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Replace or add an entry written during this tick
    pub fn upsert(&mut self, entry: LeaseEntry) {
        match self.entries.iter_mut().find(|e| e.key == entry.key) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|e| e.key != key);
    }

    /// Live holders, sorted by address
    pub fn members(&self) -> Vec<Endpoint> {
        let mut members: Vec<Endpoint> = self
            .entries
            .iter()
            .map(|e| e.record.holder.clone())
            .collect();
        members.sort();
        members
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The published endpoints record of the front-door service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointsList {
    pub service: ServiceIdentity,
    pub members: Vec<Endpoint>,
    /// `None` until the record has been stored
    pub version: Option<Version>,
}

impl EndpointsList {
    pub fn new(service: ServiceIdentity, members: Vec<Endpoint>) -> Self {
        let mut members = members;
        members.sort();
        Self {
            service,
            members,
            version: None,
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.members.iter().map(|m| m.address()).collect()
    }

    pub fn contains_address(&self, endpoint: &Endpoint) -> bool {
        self.members.iter().any(|m| m.same_address(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use porta_common::EndpointPort;

    fn entry(ip: &str, expires_secs: i64) -> LeaseEntry {
        let holder = Endpoint::new(ip.parse().unwrap(), [EndpointPort::tcp("https", 6443)]);
        LeaseEntry {
            key: format!("/masterleases/{}", ip),
            record: LeaseRecord {
                holder,
                renewed_at: DateTime::UNIX_EPOCH,
                expires_at: DateTime::UNIX_EPOCH + TimeDelta::seconds(expires_secs),
            },
            version: Version::new(1),
        }
    }

    #[test]
    fn test_snapshot_excludes_records_expiring_at_read_time() {
        let read_at = DateTime::UNIX_EPOCH + TimeDelta::seconds(15);
        let snapshot = MembershipSnapshot::new(
            vec![entry("10.0.0.1", 25), entry("10.0.0.2", 15), entry("10.0.0.3", 10)],
            read_at,
        );

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("/masterleases/10.0.0.1").is_some());
        assert!(snapshot.get("/masterleases/10.0.0.2").is_none());
    }

    #[test]
    fn test_snapshot_members_sorted() {
        let snapshot = MembershipSnapshot::new(
            vec![entry("10.0.0.3", 25), entry("10.0.0.1", 25)],
            DateTime::UNIX_EPOCH,
        );
        let addrs: Vec<String> = snapshot.members().iter().map(|m| m.address()).collect();
        assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.3"]);
    }

    #[test]
    fn test_snapshot_upsert_and_remove() {
        let mut snapshot = MembershipSnapshot::new(vec![entry("10.0.0.1", 25)], DateTime::UNIX_EPOCH);
        snapshot.upsert(entry("10.0.0.2", 30));
        snapshot.upsert(entry("10.0.0.1", 40));
        assert_eq!(snapshot.len(), 2);

        snapshot.remove("/masterleases/10.0.0.1");
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_endpoints_list_sorts_members() {
        let a = entry("10.0.0.2", 1).record.holder;
        let b = entry("10.0.0.1", 1).record.holder;
        let list = EndpointsList::new(ServiceIdentity::default(), vec![a.clone(), b]);
        assert_eq!(list.addresses(), vec!["10.0.0.1", "10.0.0.2"]);
        assert!(list.contains_address(&a));
        assert!(list.version.is_none());
    }
}
