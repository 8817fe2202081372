//! Persistent per-project state.
//!
//! Each project keeps one JSON document under
//! `<user-app-support>/compote/state/<project>.json` recording its
//! containers, networks, volumes and live port forwards. Writes are
//! atomic (write-to-temp then rename) and read-modify-write helpers are
//! serialized by an in-process lock; commands from separate processes are
//! expected to be issued serially by the user.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::Protocol;

/// A container recorded after the runtime confirmed its creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Stable container id (`{project}_{service}_{replica}`)
    pub id: String,
    /// Display name (`service` or `{service}-{replica}`)
    pub name: String,
    /// Image reference, byte-for-byte as the manifest gave it
    pub image_reference: String,
    /// Owning service; legacy records may omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// 1-based replica index; legacy records may omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_index: Option<u32>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ContainerInfo {
    /// The owning service, falling back to the display name for records
    /// persisted before `service_name` existed.
    pub fn service(&self) -> &str {
        self.service_name.as_deref().unwrap_or(&self.name)
    }

    /// The replica index, falling back to 1 for legacy records
    pub fn replica(&self) -> u32 {
        self.replica_index.unwrap_or(1)
    }
}

/// A project network recorded after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Scoped network name (`{project}_{name}`)
    pub name: String,
    /// Network driver
    pub driver: String,
    /// Assigned subnet, when the runtime reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    /// Assigned gateway, when the runtime reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// A project volume recorded after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Scoped volume name (`{project}_{name}`), or the bare name for
    /// external volumes
    pub name: String,
    /// Volume driver
    pub driver: String,
    /// Host path backing the volume
    pub mount_path: PathBuf,
    /// Whether the volume is managed outside the project
    pub is_external: bool,
}

/// A live host port relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardInfo {
    /// Deterministic id (`{service}#{replica}#{proto}#{hostPort}`)
    pub id: String,
    /// Owning service
    pub service_name: String,
    /// Owning 1-based replica
    pub replica_index: u32,
    /// Bound host address
    pub host_ip: IpAddr,
    /// Bound host port
    pub host_port: u16,
    /// Container address the relay targets
    pub target_ip: IpAddr,
    /// Container port the relay targets
    pub target_port: u16,
    /// Relay protocol
    pub protocol: Protocol,
    /// Relay process id; valid only while the recording process lives
    pub pid: u32,
}

/// Everything persisted for one project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    /// Containers keyed by container id
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerInfo>,
    /// Networks keyed by scoped name
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkInfo>,
    /// Volumes keyed by scoped name
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeInfo>,
    /// Port forwards keyed by forward id
    #[serde(default)]
    pub port_forwards: BTreeMap<String, PortForwardInfo>,
}

impl ProjectState {
    /// Whether nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
            && self.networks.is_empty()
            && self.volumes.is_empty()
            && self.port_forwards.is_empty()
    }

    /// Port forwards belonging to one replica
    pub fn forwards_for(&self, service: &str, replica: u32) -> Vec<&PortForwardInfo> {
        self.port_forwards
            .values()
            .filter(|forward| forward.service_name == service && forward.replica_index == replica)
            .collect()
    }
}

/// Atomic JSON store for one project's [`ProjectState`]
pub struct StateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    /// Open the store at the conventional per-user location
    pub fn for_project(project: &str) -> Result<Self> {
        let root = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::at_path(
            root.join("compote")
                .join("state")
                .join(format!("{project}.json")),
        ))
    }

    /// Open a store backed by an explicit file path
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state; a missing file is an empty project
    pub async fn load(&self) -> Result<ProjectState> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| Error::StateParse {
                path: self.path.clone(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(ProjectState::default())
            }
            Err(source) => Err(Error::StateIo {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Persist the whole state atomically
    pub async fn save(&self, state: &ProjectState) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write(state)
    }

    /// Remove the state file entirely
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::StateIo {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Read-modify-write under the store lock
    pub async fn update<F>(&self, mutate: F) -> Result<ProjectState>
    where
        F: FnOnce(&mut ProjectState),
    {
        let _guard = self.lock.lock().await;
        let mut state = match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| Error::StateParse {
                path: self.path.clone(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ProjectState::default(),
            Err(source) => {
                return Err(Error::StateIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        mutate(&mut state);
        self.write(&state)?;
        Ok(state)
    }

    /// Record or replace a container entry
    pub async fn update_container(&self, info: ContainerInfo) -> Result<()> {
        debug!(container = %info.id, "recording container");
        self.update(|state| {
            state.containers.insert(info.id.clone(), info);
        })
        .await
        .map(drop)
    }

    /// Drop a container entry by id
    pub async fn remove_container(&self, id: &str) -> Result<()> {
        debug!(container = %id, "removing container record");
        self.update(|state| {
            state.containers.remove(id);
        })
        .await
        .map(drop)
    }

    /// Record or replace a network entry
    pub async fn update_network(&self, info: NetworkInfo) -> Result<()> {
        self.update(|state| {
            state.networks.insert(info.name.clone(), info);
        })
        .await
        .map(drop)
    }

    /// Drop a network entry by scoped name
    pub async fn remove_network(&self, name: &str) -> Result<()> {
        self.update(|state| {
            state.networks.remove(name);
        })
        .await
        .map(drop)
    }

    /// Record or replace a volume entry
    pub async fn update_volume(&self, info: VolumeInfo) -> Result<()> {
        self.update(|state| {
            state.volumes.insert(info.name.clone(), info);
        })
        .await
        .map(drop)
    }

    /// Drop a volume entry by scoped name
    pub async fn remove_volume(&self, name: &str) -> Result<()> {
        self.update(|state| {
            state.volumes.remove(name);
        })
        .await
        .map(drop)
    }

    /// Record or replace a port-forward entry
    pub async fn update_port_forward(&self, info: PortForwardInfo) -> Result<()> {
        self.update(|state| {
            state.port_forwards.insert(info.id.clone(), info);
        })
        .await
        .map(drop)
    }

    /// Drop a port-forward entry by id
    pub async fn remove_port_forward(&self, id: &str) -> Result<()> {
        self.update(|state| {
            state.port_forwards.remove(id);
        })
        .await
        .map(drop)
    }

    fn write(&self, state: &ProjectState) -> Result<()> {
        let io_err = |source| Error::StateIo {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(state).map_err(|source| Error::StateParse {
            path: self.path.clone(),
            source,
        })?;

        // Torn writes are prevented by the rename, not by locking.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at_path(dir.path().join("demo.json"));
        (dir, store)
    }

    fn container(id: &str, service: &str, replica: u32) -> ContainerInfo {
        ContainerInfo {
            id: id.to_string(),
            name: crate::types::display_name(service, replica),
            image_reference: "nginx".to_string(),
            service_name: Some(service.to_string()),
            replica_index: Some(replica),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let (_dir, store) = store();
        let state = store.load().await.unwrap();
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let (_dir, store) = store();
        let mut state = ProjectState::default();
        state
            .containers
            .insert("demo_web_1".into(), container("demo_web_1", "web", 1));
        state.networks.insert(
            "demo_default".into(),
            NetworkInfo {
                name: "demo_default".into(),
                driver: "bridge".into(),
                subnet: Some("10.0.4.0/24".into()),
                gateway: Some("10.0.4.1".into()),
            },
        );
        state.volumes.insert(
            "demo_data".into(),
            VolumeInfo {
                name: "demo_data".into(),
                driver: "local".into(),
                mount_path: "/tmp/volumes/demo_data".into(),
                is_external: false,
            },
        );
        state.port_forwards.insert(
            "web#1#tcp#18080".into(),
            PortForwardInfo {
                id: "web#1#tcp#18080".into(),
                service_name: "web".into(),
                replica_index: 1,
                host_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                host_port: 18080,
                target_ip: "10.0.4.2".parse().unwrap(),
                target_port: 80,
                protocol: Protocol::Tcp,
                pid: 4242,
            },
        );

        store.save(&state).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_helpers_read_modify_write() {
        let (_dir, store) = store();
        store
            .update_container(container("demo_worker_1", "worker", 1))
            .await
            .unwrap();
        store
            .update_container(container("demo_worker_2", "worker", 2))
            .await
            .unwrap();
        store.remove_container("demo_worker_1").await.unwrap();

        let state = store.load().await.unwrap();
        assert_eq!(state.containers.len(), 1);
        assert!(state.containers.contains_key("demo_worker_2"));
    }

    #[tokio::test]
    async fn test_clear_removes_file() {
        let (_dir, store) = store();
        store
            .update_container(container("demo_web_1", "web", 1))
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert!(!store.path().exists());
        // Clearing again is a no-op.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_parse_error_names_file() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{ not json").unwrap();
        match store.load().await {
            Err(Error::StateParse { path, .. }) => assert_eq!(path, store.path()),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_legacy_record_fallbacks() {
        let legacy = ContainerInfo {
            id: "demo_web_1".into(),
            name: "web".into(),
            image_reference: "nginx".into(),
            service_name: None,
            replica_index: None,
            created_at: Utc::now(),
        };
        assert_eq!(legacy.service(), "web");
        assert_eq!(legacy.replica(), 1);
    }

    #[test]
    fn test_forwards_for_filters_by_replica() {
        let mut state = ProjectState::default();
        for (replica, port) in [(1u32, 18080u16), (2, 18081)] {
            let id = crate::types::forward_id("web", replica, Protocol::Tcp, port);
            state.port_forwards.insert(
                id.clone(),
                PortForwardInfo {
                    id,
                    service_name: "web".into(),
                    replica_index: replica,
                    host_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    host_port: port,
                    target_ip: "10.0.4.2".parse().unwrap(),
                    target_port: 80,
                    protocol: Protocol::Tcp,
                    pid: 1,
                },
            );
        }
        let forwards = state.forwards_for("web", 2);
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0].host_port, 18081);
    }
}
