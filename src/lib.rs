//! # compote-core
//!
//! Compose orchestration core for a single-host container runtime backed
//! by a Linux VM.
//!
//! The crate consumes a parsed compose manifest and drives services
//! through their full lifecycle: create, health-gate, scale, stop,
//! restart, tear down. Project state persists across process invocations,
//! and host-side relay processes publish container ports.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use compote_core::{ComposeFile, Orchestrator, Capabilities};
//!
//! # async fn example(manifest: ComposeFile, caps: Capabilities) -> compote_core::Result<()> {
//! let orchestrator = Orchestrator::new("myproject", manifest, caps)?;
//!
//! // Bring everything up, health-gating dependencies, and detach.
//! orchestrator.up(None, true).await?;
//!
//! // Scale a worker out and back.
//! orchestrator.scale("worker", 3).await?;
//! orchestrator.scale("worker", 1).await?;
//!
//! // Tear the project down, keeping named volumes.
//! orchestrator.down(false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`manifest`] - typed compose model with sum-type fields
//! - [`env`] - environment interpolation and env-file loading
//! - [`deps`] - batched, health-gated startup ordering
//! - [`state`] - atomic per-project state store
//! - [`registry`] - replica-aware container registry
//! - [`capability`] - injected runtime interfaces
//! - [`forward`] - host port-relay supervision
//! - [`health`] - healthcheck loops and `service_healthy` waiters
//! - [`logs`] - multiplexed log streaming
//! - [`orchestrator`] - the command surface
//!
//! All runtime access goes through the capability traits in
//! [`capability`]; the core never touches the VM, image registry or
//! kernel directly.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub use capability::{
    Capabilities, ContainerHandle, ContainerRuntime, ContainerSpec, HostProcessSupervisor,
    HostsEntry, ImageCapability, LocalImage, LogLine, NetworkCapability, ProcessSupervisor,
    ResolvedMount, VolumeCapability, DEFAULT_ROOTFS_BYTES,
};
pub use error::{Error, Result};
pub use health::{HealthMonitor, HealthState, HealthcheckSettings};
pub use manifest::{
    BuildConfig, Command, ComposeFile, Condition, DependsOn, DependsOnEntry, EnvFiles,
    Environment, External, FileDefinition, FileReference, Healthcheck, Network, Service, Volume,
};
pub use orchestrator::Orchestrator;
pub use registry::{ServiceRegistry, ServiceStatus};
pub use state::{
    ContainerInfo, NetworkInfo, PortForwardInfo, ProjectState, StateStore, VolumeInfo,
};
pub use types::{
    MountSource, MountSpec, PortMapping, Protocol, ReplicaSelection, ScaleTarget,
    ServiceSelector,
};

pub mod capability;
pub mod deps;
pub mod env;
pub mod error;
pub mod forward;
pub mod health;
pub mod logs;
pub mod manifest;
pub mod orchestrator;
pub mod registry;
pub mod state;
pub mod types;

/// The version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
