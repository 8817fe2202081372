//! Replica-aware in-memory registry of container handles.
//!
//! The registry is a cache over the persisted [`ProjectState`]: it is
//! hydrated once per orchestrator instance, reads intersect live handles
//! with persisted knowledge, and writes always go through the state store
//! before landing here.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use crate::capability::ContainerHandle;
use crate::state::{ContainerInfo, ProjectState};

/// Derived per-service view for `ps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Service name
    pub name: String,
    /// Whether at least one replica is live right now
    pub is_running: bool,
    /// Whether the project state knows the service at all
    pub is_known: bool,
    /// Live replica count from handle probes
    pub running_replicas: u32,
    /// Replica count the project state (or this process) knows about
    pub known_replicas: u32,
}

/// In-memory registry for one orchestrator instance
#[derive(Default)]
pub struct ServiceRegistry {
    /// Handles for containers this process has created, keyed by service
    /// then replica
    runtime: BTreeMap<String, BTreeMap<u32, Arc<dyn ContainerHandle>>>,
    /// Snapshot of persisted containers, same keying
    known: BTreeMap<String, BTreeMap<u32, ContainerInfo>>,
    /// Addresses recorded on network attach
    service_ips: BTreeMap<String, BTreeMap<u32, IpAddr>>,
    /// Relay pids owned by this process, keyed by forward id
    forward_pids: BTreeMap<String, u32>,
    hydrated: bool,
}

impl ServiceRegistry {
    /// Create an empty, not-yet-hydrated registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`hydrate`](Self::hydrate) has already run
    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    /// Absorb the persisted state once, grouping containers by service
    /// and replica. Legacy records without `service_name` group under
    /// their display name as replica 1.
    pub fn hydrate(&mut self, state: &ProjectState) {
        if self.hydrated {
            return;
        }
        for info in state.containers.values() {
            self.known
                .entry(info.service().to_string())
                .or_default()
                .insert(info.replica(), info.clone());
        }
        for forward in state.port_forwards.values() {
            self.forward_pids.insert(forward.id.clone(), forward.pid);
        }
        self.hydrated = true;
        debug!(
            containers = state.containers.len(),
            forwards = state.port_forwards.len(),
            "registry hydrated"
        );
    }

    /// Record a live handle for a replica
    pub fn insert_handle(&mut self, service: &str, replica: u32, handle: Arc<dyn ContainerHandle>) {
        self.runtime
            .entry(service.to_string())
            .or_default()
            .insert(replica, handle);
    }

    /// The live handle for a replica, when this process has one
    pub fn handle(&self, service: &str, replica: u32) -> Option<Arc<dyn ContainerHandle>> {
        self.runtime
            .get(service)
            .and_then(|replicas| replicas.get(&replica))
            .cloned()
    }

    /// Every live handle of a service in ascending replica order
    pub fn handles(&self, service: &str) -> Vec<(u32, Arc<dyn ContainerHandle>)> {
        self.runtime
            .get(service)
            .map(|replicas| {
                replicas
                    .iter()
                    .map(|(replica, handle)| (*replica, Arc::clone(handle)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record the persisted snapshot entry for a replica
    pub fn insert_known(&mut self, info: ContainerInfo) {
        self.known
            .entry(info.service().to_string())
            .or_default()
            .insert(info.replica(), info);
    }

    /// The persisted snapshot entry for a replica
    pub fn known_info(&self, service: &str, replica: u32) -> Option<&ContainerInfo> {
        self.known
            .get(service)
            .and_then(|replicas| replicas.get(&replica))
    }

    /// Record the address assigned on network attach
    pub fn record_ip(&mut self, service: &str, replica: u32, ip: IpAddr) {
        self.service_ips
            .entry(service.to_string())
            .or_default()
            .insert(replica, ip);
    }

    /// The recorded address of a replica
    pub fn ip(&self, service: &str, replica: u32) -> Option<IpAddr> {
        self.service_ips
            .get(service)
            .and_then(|replicas| replicas.get(&replica))
            .copied()
    }

    /// Every recorded `(service, replica, ip)`, sorted by service then
    /// replica; this is the service-discovery view the hosts table is
    /// built from.
    pub fn all_ips(&self) -> Vec<(String, u32, IpAddr)> {
        self.service_ips
            .iter()
            .flat_map(|(service, replicas)| {
                replicas
                    .iter()
                    .map(|(replica, ip)| (service.clone(), *replica, *ip))
            })
            .collect()
    }

    /// Forget a replica everywhere (handle, address, snapshot)
    pub fn remove_replica(&mut self, service: &str, replica: u32) {
        if let Some(replicas) = self.runtime.get_mut(service) {
            replicas.remove(&replica);
            if replicas.is_empty() {
                self.runtime.remove(service);
            }
        }
        if let Some(replicas) = self.service_ips.get_mut(service) {
            replicas.remove(&replica);
            if replicas.is_empty() {
                self.service_ips.remove(service);
            }
        }
        if let Some(replicas) = self.known.get_mut(service) {
            replicas.remove(&replica);
            if replicas.is_empty() {
                self.known.remove(service);
            }
        }
    }

    /// Record a relay pid under its forward id
    pub fn record_forward_pid(&mut self, id: &str, pid: u32) {
        self.forward_pids.insert(id.to_string(), pid);
    }

    /// Drop a relay pid
    pub fn remove_forward_pid(&mut self, id: &str) {
        self.forward_pids.remove(id);
    }

    /// The replica indices known for a service: union of live handles and
    /// the persisted snapshot
    pub fn known_replica_indices(&self, service: &str) -> BTreeSet<u32> {
        let mut indices = BTreeSet::new();
        if let Some(replicas) = self.runtime.get(service) {
            indices.extend(replicas.keys().copied());
        }
        if let Some(replicas) = self.known.get(service) {
            indices.extend(replicas.keys().copied());
        }
        indices
    }

    /// Live replica count by probing every handle
    pub async fn running_replica_count(&self, service: &str) -> u32 {
        let mut count = 0;
        for (_, handle) in self.handles(service) {
            if handle.is_running().await {
                count += 1;
            }
        }
        count
    }

    /// The lowest-indexed replica that is live right now
    pub async fn lowest_running_replica(&self, service: &str) -> Option<u32> {
        for (replica, handle) in self.handles(service) {
            if handle.is_running().await {
                return Some(replica);
            }
        }
        None
    }

    /// Every service this registry knows about, in name order
    pub fn service_names(&self) -> BTreeSet<String> {
        self.runtime
            .keys()
            .chain(self.known.keys())
            .cloned()
            .collect()
    }

    /// Derive the status view of one service
    pub async fn status(&self, service: &str) -> ServiceStatus {
        let running_replicas = self.running_replica_count(service).await;
        let known_replicas = self.known_replica_indices(service).len() as u32;
        ServiceStatus {
            name: service.to_string(),
            is_running: running_replicas > 0,
            is_known: known_replicas > 0,
            running_replicas,
            known_replicas,
        }
    }
}
