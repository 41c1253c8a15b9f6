//! Shared derived state - routing table, endpoint sets, secret material
//!
//! All three maps live behind a single `RwLock`. Reconcilers are the only
//! writers; the configuration endpoint reads point-in-time snapshots. Each
//! clear-then-rebuild pass happens under one write-lock acquisition, so a
//! snapshot never observes a map with an object's entries half replaced.
//! Consistency across the three maps is not coordinated (each resource kind
//! drains its own queue).

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Identity of a watched object, the unit of reconciliation.
///
/// Queue entries carry only this; the payload is always re-read from the
/// local replica at processing time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub namespace: String,
    pub name: String,
}

impl ObjectId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Key for one named port group of one service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub namespace: String,
    pub name: String,
    pub port_name: String,
}

impl ServiceKey {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        port_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            port_name: port_name.into(),
        }
    }

    fn belongs_to(&self, id: &ObjectId) -> bool {
        self.namespace == id.namespace && self.name == id.name
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.port_name)
    }
}

/// One backend URL (scheme + host:port).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub scheme: &'static str,
    pub host: String,
    pub port: i32,
}

impl Upstream {
    /// Builds a backend URL, choosing `https` for port 443 and `http`
    /// otherwise.
    pub fn for_port(host: impl Into<String>, port: i32) -> Self {
        let scheme = if port == 443 { "https" } else { "http" };
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// One routing entry under a hostname: a path mapped to a service port group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RouteEntry {
    pub path: String,
    pub service: ServiceKey,
}

/// TLS material projected from a Secret (extension seam, unpopulated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

#[derive(Default)]
struct Tables {
    /// hostname -> routing entries with contributor counts. Two objects
    /// may declare the identical entry; it stays visible while any of
    /// them still does.
    routes: HashMap<String, BTreeMap<RouteEntry, usize>>,
    /// ingress object -> (hostname, entry) pairs it contributed, so an
    /// update or delete can retract exactly what the object added
    route_owners: HashMap<ObjectId, Vec<(String, RouteEntry)>>,
    /// service port group -> backend URLs
    endpoints: HashMap<ServiceKey, Vec<Upstream>>,
    /// secret object -> certificate material (seam, never written today)
    secrets: HashMap<ObjectId, TlsMaterial>,
}

/// The aggregate state shared between the three reconcilers (writers) and
/// the configuration endpoint (reader).
#[derive(Default)]
pub struct SharedState {
    tables: RwLock<Tables>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every endpoint entry attributed to `id` (all port names)
    /// with the given sets, in one critical section.
    pub fn apply_endpoints(&self, id: &ObjectId, sets: Vec<(ServiceKey, Vec<Upstream>)>) {
        let mut tables = safe_write(&self.tables);
        tables.endpoints.retain(|key, _| !key.belongs_to(id));
        for (key, upstreams) in sets {
            tables.endpoints.insert(key, upstreams);
        }
    }

    /// Removes every endpoint entry for `id`, regardless of port name.
    pub fn clear_endpoints(&self, id: &ObjectId) {
        let mut tables = safe_write(&self.tables);
        tables.endpoints.retain(|key, _| !key.belongs_to(id));
    }

    /// Replaces every routing entry contributed by `id` with the given
    /// (hostname, entry) pairs, in one critical section.
    pub fn apply_routes(&self, id: &ObjectId, entries: Vec<(String, RouteEntry)>) {
        let mut tables = safe_write(&self.tables);
        remove_contributions(&mut tables, id);
        for (host, entry) in &entries {
            *tables
                .routes
                .entry(host.clone())
                .or_default()
                .entry(entry.clone())
                .or_insert(0) += 1;
        }
        if !entries.is_empty() {
            tables.route_owners.insert(id.clone(), entries);
        }
    }

    /// Removes every routing entry contributed by `id`.
    pub fn clear_routes(&self, id: &ObjectId) {
        let mut tables = safe_write(&self.tables);
        remove_contributions(&mut tables, id);
    }

    /// Copies the three maps under a read lock.
    ///
    /// Per-kind consistency only: the routing table may reference a service
    /// key whose endpoint update has not landed yet.
    pub fn snapshot(&self) -> Snapshot {
        let tables = safe_read(&self.tables);
        Snapshot {
            routes: tables
                .routes
                .iter()
                .map(|(host, entries)| (host.clone(), entries.keys().cloned().collect()))
                .collect(),
            endpoints: tables.endpoints.clone(),
            secrets: tables.secrets.clone(),
        }
    }
}

fn remove_contributions(tables: &mut Tables, id: &ObjectId) {
    if let Some(owned) = tables.route_owners.remove(id) {
        for (host, entry) in owned {
            if let Some(entries) = tables.routes.get_mut(&host) {
                if let Some(count) = entries.get_mut(&entry) {
                    *count -= 1;
                    if *count == 0 {
                        entries.remove(&entry);
                    }
                }
                if entries.is_empty() {
                    tables.routes.remove(&host);
                }
            }
        }
    }
}

/// Point-in-time copy of the derived state, input to the config renderer.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// hostname -> ordered routing entries
    pub routes: BTreeMap<String, Vec<RouteEntry>>,
    pub endpoints: HashMap<ServiceKey, Vec<Upstream>>,
    pub secrets: HashMap<ObjectId, TlsMaterial>,
}

impl Snapshot {
    /// Backend URLs for a service key; absence means "no known backends".
    pub fn upstreams(&self, key: &ServiceKey) -> &[Upstream] {
        self.endpoints.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Safe RwLock read helper that recovers from poisoning
pub(crate) fn safe_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during read, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Safe RwLock write helper that recovers from poisoning
pub(crate) fn safe_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during write, recovering (data is still valid)");
        poisoned.into_inner()
    })
}
