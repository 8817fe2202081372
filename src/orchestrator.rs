//! The orchestrator: every public command of the compose core.
//!
//! One orchestrator instance drives one project. All mutations of the
//! in-memory registry go through a single lock, so no two command
//! operations interleave on shared state; concurrent public commands on
//! the same instance are not supported. Within `up` and `start` a batch
//! fans out in parallel and batches run strictly in sequence; teardown
//! walks batches in reverse.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::capability::{
    Capabilities, ContainerSpec, HostsEntry, LocalImage, ResolvedMount, DEFAULT_ROOTFS_BYTES,
};
use crate::deps::{self, ServiceGraph};
use crate::env;
use crate::error::{Error, Result};
use crate::forward::PortForwarder;
use crate::health::{HealthMonitor, HealthcheckSettings};
use crate::logs::{multiplex, LogSource};
use crate::manifest::{ComposeFile, Service};
use crate::registry::{ServiceRegistry, ServiceStatus};
use crate::state::{ContainerInfo, NetworkInfo, ProjectState, StateStore, VolumeInfo};
use crate::types::{
    aggregate_selectors, container_id, display_name, log_label, parse_cpus, parse_memory,
    scoped_name, PortMapping, ReplicaSelection, ServiceSelector,
};

/// Grace timeout used when a command tears containers down without a
/// caller-supplied timeout (`down`, `scale`)
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Compose orchestrator for one project
pub struct Orchestrator {
    project: String,
    manifest: ComposeFile,
    caps: Capabilities,
    store: StateStore,
    registry: Mutex<ServiceRegistry>,
    health: HealthMonitor,
    forwarder: PortForwarder,
}

impl Orchestrator {
    /// Create an orchestrator with state at the conventional per-user
    /// location. Validates the manifest before anything runs.
    pub fn new(
        project: impl Into<String>,
        manifest: ComposeFile,
        caps: Capabilities,
    ) -> Result<Self> {
        let project = project.into();
        let store = StateStore::for_project(&project)?;
        Self::with_store(project, manifest, caps, store)
    }

    /// Create an orchestrator over an explicit state store
    pub fn with_store(
        project: impl Into<String>,
        manifest: ComposeFile,
        caps: Capabilities,
        store: StateStore,
    ) -> Result<Self> {
        manifest.validate()?;
        let forwarder = PortForwarder::new(caps.processes.clone());
        Ok(Self {
            project: project.into(),
            manifest,
            caps,
            store,
            registry: Mutex::new(ServiceRegistry::new()),
            health: HealthMonitor::new(),
            forwarder,
        })
    }

    /// The project name
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Bring services up: networks and volumes first, then services in
    /// dependency batches, health-gating between batches. With `detach`
    /// unset, blocks until every started container exits.
    pub async fn up(&self, services: Option<&[String]>, detach: bool) -> Result<()> {
        info!(project = %self.project, "up");
        self.hydrate().await;
        self.ensure_project_resources().await?;

        let graph = self.startup_graph(services)?;
        let batches = graph.startup_batches()?;
        let health_gated = deps::health_dependencies(&self.manifest);

        for batch in &batches {
            debug!(project = %self.project, batch = ?batch, "starting batch");
            let results = join_all(
                batch
                    .iter()
                    .map(|service| self.start_all_replicas(service)),
            )
            .await;
            results.into_iter().collect::<Result<Vec<_>>>()?;

            // Health-gate: anything in this batch that other services
            // wait on must prove healthy before the next batch starts.
            for service in batch {
                if !health_gated.contains_key(service) {
                    continue;
                }
                let Some(check) = self
                    .manifest
                    .services
                    .get(service)
                    .and_then(|s| s.healthcheck.as_ref())
                else {
                    continue;
                };
                let Some(settings) = HealthcheckSettings::resolve(check) else {
                    continue;
                };
                let handle = {
                    let registry = self.registry.lock().await;
                    registry.lowest_running_replica(service).await.and_then(
                        |replica| registry.handle(service, replica),
                    )
                };
                let Some(handle) = handle else {
                    return Err(Error::service_not_running(service));
                };
                self.health.run(service, handle.as_ref(), &settings).await?;
            }
            debug!(project = %self.project, batch = ?batch, "batch complete");
        }

        if !detach {
            self.wait_for_exits().await;
        }
        info!(project = %self.project, "up complete");
        Ok(())
    }

    /// Start known-but-stopped services or replicas, in batch order.
    /// Operations within a batch run sequentially so retries behave
    /// deterministically. No health gating; use `up` for that.
    pub async fn start(&self, selectors: Option<&[ServiceSelector]>) -> Result<()> {
        info!(project = %self.project, "start");
        self.hydrate().await;
        let selected = self.selection(selectors).await?;

        let batches = ServiceGraph::from_manifest(&self.manifest)?.startup_batches()?;
        for batch in &batches {
            for service in batch {
                let Some(selection) = selected.get(service) else {
                    continue;
                };
                for replica in self.replicas_to_start(service, selection).await? {
                    self.start_service(service, replica).await?;
                }
            }
        }
        Ok(())
    }

    /// Stop running services or replicas with a grace timeout, walking
    /// batches in reverse. Handles stay attached so `start` can revive
    /// them; port forwards are torn down.
    pub async fn stop(
        &self,
        selectors: Option<&[ServiceSelector]>,
        timeout: Duration,
    ) -> Result<()> {
        info!(project = %self.project, "stop");
        self.hydrate().await;
        let selected = self.selection(selectors).await?;

        let batches = ServiceGraph::from_manifest(&self.manifest)?.shutdown_batches()?;
        for batch in &batches {
            let results = join_all(batch.iter().filter_map(|service| {
                selected
                    .get(service)
                    .map(|selection| self.stop_selected_replicas(service, selection, timeout))
            }))
            .await;
            results.into_iter().collect::<Result<Vec<_>>>()?;
        }
        Ok(())
    }

    /// `stop` then `start` over the same selection
    pub async fn restart(
        &self,
        selectors: Option<&[ServiceSelector]>,
        timeout: Duration,
    ) -> Result<()> {
        self.stop(selectors, timeout).await?;
        self.start(selectors).await
    }

    /// Tear the project down: containers in reverse batch order, then
    /// orphaned port forwards, then networks, then (optionally) volumes.
    pub async fn down(&self, remove_volumes: bool) -> Result<()> {
        info!(project = %self.project, remove_volumes, "down");
        self.hydrate().await;

        let batches = ServiceGraph::from_manifest(&self.manifest)?.shutdown_batches()?;
        for batch in &batches {
            let results = join_all(
                batch
                    .iter()
                    .map(|service| self.remove_all_replicas(service)),
            )
            .await;
            results.into_iter().collect::<Result<Vec<_>>>()?;
        }

        // Orphan sweep: forwards recorded by any process, including ones
        // whose owning replica is already gone.
        let state = self.store.load().await.unwrap_or_default();
        for forward in state.port_forwards.values() {
            self.forwarder.terminate(forward);
            self.store.remove_port_forward(&forward.id).await?;
            self.registry.lock().await.remove_forward_pid(&forward.id);
        }

        for network in state.networks.values() {
            self.caps.networks.remove(&network.name).await?;
            self.store.remove_network(&network.name).await?;
        }

        if remove_volumes {
            let prefix = format!("{}_", self.project);
            for volume in state.volumes.values() {
                if volume.is_external {
                    // External volumes outlive the project; drop only the record.
                    self.store.remove_volume(&volume.name).await?;
                    continue;
                }
                if !volume.name.starts_with(&prefix) {
                    continue;
                }
                self.caps.volumes.remove(&volume.name).await?;
                self.store.remove_volume(&volume.name).await?;
            }
        }

        info!(project = %self.project, "down complete");
        Ok(())
    }

    /// Scale a service to exactly `replicas` instances. Scale-up creates
    /// missing indices in ascending order; scale-down removes the highest
    /// indices first.
    pub async fn scale(&self, service: &str, replicas: u32) -> Result<()> {
        info!(project = %self.project, service, replicas, "scale");
        self.hydrate().await;
        self.manifest.service(service)?;
        self.ensure_project_resources().await?;

        let current = {
            let registry = self.registry.lock().await;
            registry.known_replica_indices(service)
        };
        let current_max = current.iter().max().copied().unwrap_or(0);

        if replicas as usize > current.len() {
            for index in 1..=replicas {
                if !current.contains(&index) {
                    self.start_service(service, index).await?;
                }
            }
        } else if (replicas as usize) < current.len() {
            for index in (replicas + 1..=current_max).rev() {
                if current.contains(&index) {
                    self.remove_replica(service, index).await?;
                }
            }
        }
        Ok(())
    }

    /// Pull every image-based service's image; services without an image
    /// are skipped.
    pub async fn pull(&self, services: Option<&[String]>) -> Result<()> {
        self.hydrate().await;
        for (name, service) in self.filtered_services(services)? {
            let Some(image) = &service.image else {
                debug!(service = %name, "no image to pull");
                continue;
            };
            info!(project = %self.project, service = %name, image = %image, "pull");
            self.caps.images.pull(image).await?;
        }
        Ok(())
    }

    /// Push every service's image: the manifest reference for image-based
    /// services, the `{project}_{service}:latest` tag for built ones.
    pub async fn push(&self, services: Option<&[String]>) -> Result<()> {
        self.hydrate().await;
        for (name, service) in self.filtered_services(services)? {
            let reference = match (&service.image, &service.build) {
                (Some(image), _) => image.clone(),
                (None, Some(_)) => format!("{}_{}:latest", self.project, name),
                (None, None) => {
                    debug!(service = %name, "nothing to push");
                    continue;
                }
            };
            info!(project = %self.project, service = %name, image = %reference, "push");
            self.caps.images.push(&reference).await?;
        }
        Ok(())
    }

    /// Run a command inside a running replica and return its exit code.
    ///
    /// Without an explicit replica the lowest-indexed running one is
    /// chosen. A service that is known but has nothing running fails
    /// with `ServiceNotRunning`; an unknown service with `ServiceNotFound`.
    pub async fn exec(
        &self,
        service: &str,
        replica: Option<u32>,
        command: &[String],
        env: Option<&BTreeMap<String, String>>,
    ) -> Result<i32> {
        self.hydrate().await;
        let registry = self.registry.lock().await;

        let known = !registry.known_replica_indices(service).is_empty()
            || self.manifest.services.contains_key(service);
        if !known {
            return Err(Error::service_not_found(service));
        }

        let replica = match replica {
            Some(index) => {
                if !registry.known_replica_indices(service).contains(&index) {
                    return Err(Error::ServiceReplicaNotFound {
                        service: service.to_string(),
                        replica: index,
                    });
                }
                index
            }
            None => registry
                .lowest_running_replica(service)
                .await
                .ok_or_else(|| Error::service_not_running(service))?,
        };

        let handle = registry
            .handle(service, replica)
            .ok_or_else(|| Error::service_not_running(service))?;
        if !handle.is_running().await {
            return Err(Error::service_not_running(service));
        }
        drop(registry);

        let empty = BTreeMap::new();
        handle.exec(command, env.unwrap_or(&empty)).await
    }

    /// Stream logs of the selected replicas as one merged, labelled
    /// stream. Only replicas attached in this process can stream; stopped
    /// selections are skipped with a warning.
    pub async fn logs(
        &self,
        selectors: Option<&[ServiceSelector]>,
        include_stderr: bool,
        tail: Option<usize>,
        follow: bool,
    ) -> Result<mpsc::Receiver<String>> {
        self.hydrate().await;
        let selected = self.selection(selectors).await?;

        let mut sources = Vec::new();
        let registry = self.registry.lock().await;
        for (service, selection) in &selected {
            for (replica, handle) in registry.handles(service) {
                if !selection.contains(replica) {
                    continue;
                }
                if !handle.is_running().await {
                    warn!(service = %service, replica, "not running, skipping logs");
                    continue;
                }
                let lines = handle.logs(tail, follow).await?;
                sources.push(LogSource::new(log_label(service, replica), lines));
            }
        }
        drop(registry);

        if sources.is_empty() {
            let service = selected
                .keys()
                .next()
                .cloned()
                .unwrap_or_else(|| self.project.clone());
            return Err(Error::service_not_running(service));
        }
        Ok(multiplex(sources, include_stderr))
    }

    /// Status of every manifest and known service, sorted by name
    pub async fn ps(&self) -> Result<Vec<ServiceStatus>> {
        self.hydrate().await;
        let registry = self.registry.lock().await;
        let mut names: BTreeSet<String> = self.manifest.services.keys().cloned().collect();
        names.extend(registry.service_names());

        let mut statuses = Vec::with_capacity(names.len());
        for name in names {
            statuses.push(registry.status(&name).await);
        }
        Ok(statuses)
    }

    // ---- internal lifecycle -------------------------------------------------

    /// Hydrate the registry from persisted state, once per instance.
    /// Hydration is observational: failures degrade to an empty project.
    async fn hydrate(&self) {
        let mut registry = self.registry.lock().await;
        if registry.is_hydrated() {
            return;
        }
        match self.store.load().await {
            Ok(state) => registry.hydrate(&state),
            Err(err) => {
                warn!(project = %self.project, error = %err, "state hydration failed, starting empty");
                registry.hydrate(&ProjectState::default());
            }
        }
    }

    /// Create the project's networks and named volumes; idempotent
    async fn ensure_project_resources(&self) -> Result<()> {
        let default_network = self.default_network();
        self.caps.networks.create(&default_network, "bridge").await?;
        self.store
            .update_network(NetworkInfo {
                name: default_network,
                driver: "bridge".into(),
                subnet: None,
                gateway: None,
            })
            .await?;

        for (name, network) in &self.manifest.networks {
            if network
                .external
                .as_ref()
                .is_some_and(crate::manifest::External::is_external)
            {
                continue;
            }
            let scoped = scoped_name(&self.project, name);
            self.caps.networks.create(&scoped, network.driver()).await?;
            self.store
                .update_network(NetworkInfo {
                    name: scoped,
                    driver: network.driver().to_string(),
                    subnet: None,
                    gateway: None,
                })
                .await?;
        }

        for (name, volume) in &self.manifest.volumes {
            let external = volume.is_external();
            let effective = if external {
                volume
                    .external
                    .as_ref()
                    .and_then(crate::manifest::External::alias)
                    .or(volume.name.as_deref())
                    .unwrap_or(name)
                    .to_string()
            } else {
                scoped_name(&self.project, name)
            };
            let path = self
                .caps
                .volumes
                .create(&effective, volume.driver(), external)
                .await?;
            self.store
                .update_volume(VolumeInfo {
                    name: effective,
                    driver: volume.driver().to_string(),
                    mount_path: path,
                    is_external: external,
                })
                .await?;
        }
        Ok(())
    }

    /// Start every replica of a service, ascending
    async fn start_all_replicas(&self, service: &str) -> Result<()> {
        let replicas = self.manifest.service(service)?.replicas();
        for replica in 1..=replicas {
            self.start_service(service, replica).await?;
        }
        Ok(())
    }

    /// Bring one replica to `running`, creating it if needed.
    ///
    /// Drives `absent/stopped -> created -> running`; failures wrap into
    /// `FailedToStart` with the capability cause preserved.
    async fn start_service(&self, service: &str, replica: u32) -> Result<()> {
        self.start_service_inner(service, replica)
            .await
            .map_err(|err| match err {
                wrapped @ Error::FailedToStart { .. } => wrapped,
                cause => Error::failed_to_start(service, cause),
            })
    }

    async fn start_service_inner(&self, service: &str, replica: u32) -> Result<()> {
        let definition = self.manifest.service(service)?;

        // Revive path: this process already holds a handle.
        let existing = {
            let registry = self.registry.lock().await;
            registry.handle(service, replica)
        };
        if let Some(handle) = existing {
            if handle.is_running().await {
                debug!(service, replica, "already running");
                return Ok(());
            }
            info!(project = %self.project, service, replica, "restarting service");
            handle.start().await?;
            self.establish_forwards(service, replica, definition).await?;
            return Ok(());
        }

        info!(project = %self.project, service, replica, "starting service");

        let (image, reference) = self.resolve_image(service, definition).await?;
        let environment = self.resolve_environment(definition)?;
        let mounts = self.resolve_mounts(definition).await?;

        let id = container_id(&self.project, service, replica);
        let network = self.default_network();
        let ip = self.caps.networks.connect(&id, &network).await?;

        let extra_hosts = {
            let mut registry = self.registry.lock().await;
            registry.record_ip(service, replica, ip);
            hosts_entries(&registry.all_ips())
        };

        let spec = ContainerSpec {
            image: image.as_str().to_string(),
            hostname: definition
                .hostname
                .clone()
                .unwrap_or_else(|| service.to_string()),
            command: definition.command.as_ref().map(|c| c.as_argv()),
            entrypoint: definition.entrypoint.as_ref().map(|c| c.as_argv()),
            working_dir: definition.working_dir.clone(),
            user: definition.user.clone(),
            environment,
            mounts,
            tmpfs: definition.tmpfs.clone(),
            extra_hosts,
            memory_limit: self.memory_limit(definition)?,
            cpu_limit: self.cpu_limit(definition)?,
            labels: definition.labels.clone(),
        };

        let handle = self
            .caps
            .runtime
            .create(&id, spec, DEFAULT_ROOTFS_BYTES, false)
            .await?;
        handle.start().await?;

        let info = ContainerInfo {
            id: id.clone(),
            name: display_name(service, replica),
            image_reference: reference,
            service_name: Some(service.to_string()),
            replica_index: Some(replica),
            created_at: Utc::now(),
        };
        self.store.update_container(info.clone()).await?;
        {
            let mut registry = self.registry.lock().await;
            registry.insert_handle(service, replica, handle);
            registry.insert_known(info);
        }

        self.establish_forwards(service, replica, definition).await?;
        Ok(())
    }

    /// Spawn one relay per published port of a replica
    async fn establish_forwards(
        &self,
        service: &str,
        replica: u32,
        definition: &Service,
    ) -> Result<()> {
        if definition.ports.is_empty() {
            return Ok(());
        }
        let target_ip = {
            let registry = self.registry.lock().await;
            registry.ip(service, replica)
        };
        let Some(target_ip) = target_ip else {
            return Err(Error::port_forwarding(format!(
                "no address recorded for `{service}` replica {replica}"
            )));
        };

        for spec in &definition.ports {
            let mapping: PortMapping = spec.parse()?;
            let forward = self
                .forwarder
                .establish(service, replica, &mapping, target_ip)?;
            self.registry
                .lock()
                .await
                .record_forward_pid(&forward.id, forward.pid);
            self.store.update_port_forward(forward).await?;
        }
        Ok(())
    }

    /// Terminate and forget every forward of one replica
    async fn remove_forwards(&self, service: &str, replica: u32) -> Result<()> {
        let state = self.store.load().await.unwrap_or_default();
        for forward in state.forwards_for(service, replica) {
            self.forwarder.terminate(forward);
            self.store.remove_port_forward(&forward.id).await?;
            self.registry.lock().await.remove_forward_pid(&forward.id);
        }
        Ok(())
    }

    /// Stop the selected running replicas of one service
    async fn stop_selected_replicas(
        &self,
        service: &str,
        selection: &ReplicaSelection,
        timeout: Duration,
    ) -> Result<()> {
        let handles = {
            let registry = self.registry.lock().await;
            registry.handles(service)
        };
        for (replica, handle) in handles {
            if !selection.contains(replica) || !handle.is_running().await {
                continue;
            }
            info!(project = %self.project, service, replica, "stopping service");
            handle
                .stop(timeout)
                .await
                .map_err(|cause| Error::failed_to_stop(service, cause))?;
            self.remove_forwards(service, replica).await?;
        }
        Ok(())
    }

    /// Remove every replica of a service: stop (best effort), delete,
    /// drop state and forwards. Used by `down`.
    async fn remove_all_replicas(&self, service: &str) -> Result<()> {
        let replicas = {
            let registry = self.registry.lock().await;
            registry.known_replica_indices(service)
        };
        for replica in replicas.into_iter().rev() {
            self.remove_replica(service, replica).await?;
        }
        Ok(())
    }

    /// Drive one replica to `deleted` and forget it everywhere
    async fn remove_replica(&self, service: &str, replica: u32) -> Result<()> {
        let (handle, id) = {
            let registry = self.registry.lock().await;
            let id = registry
                .known_info(service, replica)
                .map(|info| info.id.clone())
                .unwrap_or_else(|| container_id(&self.project, service, replica));
            (registry.handle(service, replica), id)
        };

        if let Some(handle) = &handle {
            if let Err(err) = handle.stop(DEFAULT_STOP_TIMEOUT).await {
                warn!(service, replica, error = %err, "stop before delete failed");
            }
            handle
                .delete()
                .await
                .map_err(|cause| Error::failed_to_stop(service, cause))?;
        } else {
            // Created by another process; nothing to drive, just forget.
            debug!(service, replica, "no handle attached, dropping records only");
        }

        info!(project = %self.project, service, replica, "removed replica");
        self.remove_forwards(service, replica).await?;
        self.store.remove_container(&id).await?;
        self.registry.lock().await.remove_replica(service, replica);
        Ok(())
    }

    // ---- resolution helpers -------------------------------------------------

    fn default_network(&self) -> String {
        scoped_name(&self.project, "default")
    }

    /// The graph `up` operates on: an explicit filter, or every service
    /// not gated behind a profile. Either way dependencies are pulled in
    /// transitively.
    fn startup_graph(&self, filter: Option<&[String]>) -> Result<ServiceGraph> {
        match filter {
            Some(roots) => ServiceGraph::filtered(&self.manifest, roots),
            None => {
                let roots: Vec<String> = self
                    .manifest
                    .services
                    .iter()
                    .filter(|(_, service)| !service.has_profiles())
                    .map(|(name, _)| name.clone())
                    .collect();
                ServiceGraph::filtered(&self.manifest, &roots)
            }
        }
    }

    /// Manifest services restricted to a filter, sorted by name
    fn filtered_services(
        &self,
        filter: Option<&[String]>,
    ) -> Result<Vec<(&String, &Service)>> {
        match filter {
            None => Ok(self.manifest.services.iter().collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.manifest
                        .services
                        .get_key_value(name)
                        .ok_or_else(|| Error::service_not_found(name))
                })
                .collect(),
        }
    }

    /// Aggregate selectors (or select everything) and reject selectors
    /// naming services that are neither in the manifest nor known.
    async fn selection(
        &self,
        selectors: Option<&[ServiceSelector]>,
    ) -> Result<BTreeMap<String, ReplicaSelection>> {
        let selected = match selectors {
            Some(selectors) => aggregate_selectors(selectors),
            None => self
                .manifest
                .services
                .keys()
                .map(|name| (name.clone(), ReplicaSelection::All))
                .collect(),
        };
        let registry = self.registry.lock().await;
        for service in selected.keys() {
            if !self.manifest.services.contains_key(service)
                && registry.known_replica_indices(service).is_empty()
            {
                return Err(Error::service_not_found(service));
            }
        }
        Ok(selected)
    }

    /// Replica indices `start` should touch: known, selected, not running
    async fn replicas_to_start(
        &self,
        service: &str,
        selection: &ReplicaSelection,
    ) -> Result<Vec<u32>> {
        let registry = self.registry.lock().await;
        let known = registry.known_replica_indices(service);
        if let ReplicaSelection::Indices(indices) = selection {
            for index in indices {
                if !known.contains(index) {
                    return Err(Error::ServiceReplicaNotFound {
                        service: service.to_string(),
                        replica: *index,
                    });
                }
            }
        }

        let mut to_start = Vec::new();
        for replica in known {
            if !selection.contains(replica) {
                continue;
            }
            let running = match registry.handle(service, replica) {
                Some(handle) => handle.is_running().await,
                None => false,
            };
            if !running {
                to_start.push(replica);
            }
        }
        Ok(to_start)
    }

    async fn resolve_image(
        &self,
        service: &str,
        definition: &Service,
    ) -> Result<(LocalImage, String)> {
        if let Some(image) = &definition.image {
            let local = self.caps.images.pull(image).await?;
            return Ok((local, image.clone()));
        }
        if let Some(build) = &definition.build {
            let tag = format!("{}_{}:latest", self.project, service);
            let local = self
                .caps
                .images
                .build(
                    Path::new(&build.context),
                    build.dockerfile.as_deref(),
                    &tag,
                    &build.args,
                )
                .await?;
            return Ok((local, tag));
        }
        Err(Error::capability(
            "image resolve",
            format!("service `{service}` has neither image nor build"),
        ))
    }

    /// Env files first, manifest `environment` on top, every value
    /// interpolated against the process environment.
    fn resolve_environment(&self, definition: &Service) -> Result<env::EnvMap> {
        let host = env::process_env();
        let mut merged = env::EnvMap::new();
        if let Some(files) = &definition.env_files {
            for path in files.paths() {
                merged.extend(env::load_env_file(path)?);
            }
        }
        if let Some(environment) = &definition.environment {
            merged.extend(environment.as_map());
        }
        Ok(merged
            .into_iter()
            .map(|(key, value)| (key, env::interpolate(&value, &host)))
            .collect())
    }

    /// Expand volume, config and secret references into resolved mounts
    async fn resolve_mounts(&self, definition: &Service) -> Result<Vec<ResolvedMount>> {
        let mut mounts = Vec::new();
        for spec in &definition.volumes {
            let parsed = self.caps.volumes.parse_mount(spec)?;
            match parsed.source {
                crate::types::MountSource::Bind(path) => mounts.push(ResolvedMount {
                    host_path: path.into(),
                    target: parsed.target,
                    read_only: parsed.read_only,
                }),
                crate::types::MountSource::Named(name) => {
                    let scoped = scoped_name(&self.project, &name);
                    let path = self.caps.volumes.create(&scoped, "local", false).await?;
                    self.store
                        .update_volume(VolumeInfo {
                            name: scoped,
                            driver: "local".into(),
                            mount_path: path.clone(),
                            is_external: false,
                        })
                        .await?;
                    mounts.push(ResolvedMount {
                        host_path: path,
                        target: parsed.target,
                        read_only: parsed.read_only,
                    });
                }
            }
        }

        for reference in &definition.configs {
            mounts.push(self.file_mount(reference, &self.manifest.configs, |name| {
                format!("/{name}")
            })?);
        }
        for reference in &definition.secrets {
            mounts.push(self.file_mount(reference, &self.manifest.secrets, |name| {
                format!("/run/secrets/{name}")
            })?);
        }
        Ok(mounts)
    }

    fn file_mount(
        &self,
        reference: &crate::manifest::FileReference,
        definitions: &BTreeMap<String, crate::manifest::FileDefinition>,
        default_target: impl Fn(&str) -> String,
    ) -> Result<ResolvedMount> {
        let name = reference.source();
        let definition = definitions
            .get(name)
            .ok_or_else(|| Error::capability("mount resolve", format!("undefined `{name}`")))?;
        let file = definition.file.as_ref().ok_or_else(|| {
            Error::capability("mount resolve", format!("`{name}` has no backing file"))
        })?;
        Ok(ResolvedMount {
            host_path: file.into(),
            target: reference
                .target()
                .map(str::to_string)
                .unwrap_or_else(|| default_target(name)),
            read_only: true,
        })
    }

    fn memory_limit(&self, definition: &Service) -> Result<Option<u64>> {
        definition
            .deploy
            .as_ref()
            .and_then(|deploy| deploy.resources.as_ref())
            .and_then(|resources| resources.limits.as_ref())
            .and_then(|limits| limits.memory.as_deref())
            .map(parse_memory)
            .transpose()
    }

    fn cpu_limit(&self, definition: &Service) -> Result<Option<u32>> {
        definition
            .deploy
            .as_ref()
            .and_then(|deploy| deploy.resources.as_ref())
            .and_then(|resources| resources.limits.as_ref())
            .and_then(|limits| limits.cpus.as_deref())
            .map(parse_cpus)
            .transpose()
    }

    /// Block until every attached container exits, logging each exit code
    async fn wait_for_exits(&self) {
        let handles = {
            let registry = self.registry.lock().await;
            let mut all = Vec::new();
            for service in registry.service_names() {
                for (replica, handle) in registry.handles(&service) {
                    all.push((service.clone(), replica, handle));
                }
            }
            all
        };

        join_all(handles.into_iter().map(|(service, replica, handle)| {
            let project = self.project.clone();
            async move {
                match handle.wait().await {
                    Ok(code) => {
                        info!(project = %project, service = %service, replica, code, "container exited");
                    }
                    Err(err) => {
                        warn!(project = %project, service = %service, replica, error = %err, "wait failed");
                    }
                }
            }
        }))
        .await;
    }
}

/// Build the hosts table from the service-discovery view: replica 1 maps
/// the bare service name, later replicas `{service}-{replica}`.
fn hosts_entries(ips: &[(String, u32, std::net::IpAddr)]) -> Vec<HostsEntry> {
    let mut entries: Vec<HostsEntry> = ips
        .iter()
        .map(|(service, replica, ip)| HostsEntry {
            name: display_name(service, *replica),
            ip: *ip,
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}
