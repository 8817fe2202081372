//! Capability interfaces the core consumes.
//!
//! The orchestrator never touches the VM, image registry or kernel
//! directly; everything goes through these narrow async traits. Real
//! implementations wrap the container runtime, tests inject in-memory
//! fakes.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::types::MountSpec;

/// Default root filesystem size handed to container create
pub const DEFAULT_ROOTFS_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Handle to an image present in the local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImage(pub String);

impl LocalImage {
    /// The local reference as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocalImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Image store operations
#[async_trait]
pub trait ImageCapability: Send + Sync {
    /// Ensure `reference` is available locally; idempotent.
    ///
    /// The reference is taken as-is: short-name normalization, if any,
    /// happens inside the capability so that `pull` and `push` agree
    /// byte-for-byte on the stored reference.
    async fn pull(&self, reference: &str) -> Result<LocalImage>;

    /// Build an image from a context directory and tag it
    async fn build(
        &self,
        context: &Path,
        dockerfile: Option<&str>,
        tag: &str,
        build_args: &BTreeMap<String, String>,
    ) -> Result<LocalImage>;

    /// Push a reference to its registry
    async fn push(&self, reference: &str) -> Result<()>;
}

/// Volume store operations
#[async_trait]
pub trait VolumeCapability: Send + Sync {
    /// Create a volume if absent and return its host path; idempotent
    async fn create(&self, name: &str, driver: &str, external: bool) -> Result<PathBuf>;

    /// Remove a volume; a no-op when absent, skipped for external volumes
    async fn remove(&self, name: &str) -> Result<()>;

    /// Parse a `src[:dst[:ro]]` mount spec
    fn parse_mount(&self, spec: &str) -> Result<MountSpec> {
        spec.parse()
    }
}

/// Network operations
#[async_trait]
pub trait NetworkCapability: Send + Sync {
    /// Create a network if absent; idempotent
    async fn create(&self, name: &str, driver: &str) -> Result<()>;

    /// Attach a container and return its assigned address
    async fn connect(&self, container_id: &str, network: &str) -> Result<IpAddr>;

    /// Remove a network; warns (does not fail) when still populated
    async fn remove(&self, name: &str) -> Result<()>;
}

/// Everything the runtime needs to create one container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Image to boot from
    pub image: String,
    /// Container hostname
    pub hostname: String,
    /// Command override
    pub command: Option<Vec<String>>,
    /// Entrypoint override
    pub entrypoint: Option<Vec<String>>,
    /// Working directory
    pub working_dir: Option<String>,
    /// User to run as
    pub user: Option<String>,
    /// Resolved environment
    pub environment: BTreeMap<String, String>,
    /// Bind and named-volume mounts, already resolved to host paths
    pub mounts: Vec<ResolvedMount>,
    /// Tmpfs mount points
    pub tmpfs: Vec<String>,
    /// Static hosts table entries (`ip -> name`), sorted by name
    pub extra_hosts: Vec<HostsEntry>,
    /// Memory limit in bytes
    pub memory_limit: Option<u64>,
    /// CPU count limit
    pub cpu_limit: Option<u32>,
    /// Free-form labels
    pub labels: BTreeMap<String, String>,
}

/// A mount with its source resolved to a concrete host path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    /// Host path to expose
    pub host_path: PathBuf,
    /// Mount point inside the container
    pub target: String,
    /// Whether the mount is read-only
    pub read_only: bool,
}

/// One static hosts-table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostsEntry {
    /// Name resolvable inside the container
    pub name: String,
    /// Address the name resolves to
    pub ip: IpAddr,
}

/// One line captured from a container's log buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// The line text, without trailing newline
    pub message: String,
    /// Whether the line came from stderr
    pub stderr: bool,
}

impl LogLine {
    /// A stdout line
    pub fn stdout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stderr: false,
        }
    }

    /// A stderr line
    pub fn stderr(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stderr: true,
        }
    }
}

/// Container factory
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container and return its handle.
    ///
    /// The handle is recorded by the registry only after this returns, so
    /// implementations must not leave half-created containers behind on
    /// error.
    async fn create(
        &self,
        id: &str,
        spec: ContainerSpec,
        rootfs_bytes: u64,
        read_only: bool,
    ) -> Result<Arc<dyn ContainerHandle>>;
}

/// A created container
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    /// Start the container
    async fn start(&self) -> Result<()>;

    /// Stop with a grace timeout
    async fn stop(&self, timeout: Duration) -> Result<()>;

    /// Delete the container
    async fn delete(&self) -> Result<()>;

    /// Block until exit and return the exit code
    async fn wait(&self) -> Result<i32>;

    /// Run a command inside the container; output goes to the log buffer
    async fn exec(&self, argv: &[String], env: &BTreeMap<String, String>) -> Result<i32>;

    /// Stream buffered log lines.
    ///
    /// `tail` limits the stream to the last N buffered lines; `follow`
    /// keeps the stream open for lines arriving after the buffer.
    async fn logs(&self, tail: Option<usize>, follow: bool) -> Result<mpsc::Receiver<LogLine>>;

    /// Probe container liveness
    async fn is_running(&self) -> bool;
}

/// Host process supervision for port relays
pub trait ProcessSupervisor: Send + Sync {
    /// Spawn a detached child with null stdio and return its pid
    fn spawn(&self, argv: &[String]) -> Result<u32>;

    /// Send a graceful termination signal; best-effort
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Whether `tool` is resolvable on the host PATH
    fn which(&self, tool: &str) -> bool;
}

/// [`ProcessSupervisor`] backed by real host processes
#[derive(Debug, Default)]
pub struct HostProcessSupervisor;

impl ProcessSupervisor for HostProcessSupervisor {
    fn spawn(&self, argv: &[String]) -> Result<u32> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::port_forwarding("empty relay command"))?;
        let child = std::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|err| {
                Error::capability("process spawn", format!("{program}: {err}"))
            })?;
        Ok(child.id())
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        // SIGTERM via the host `kill`; a dead pid is not an error here,
        // callers treat termination as best-effort.
        let status = std::process::Command::new("kill")
            .arg(pid.to_string())
            .status()
            .map_err(|err| Error::capability("process terminate", err.to_string()))?;
        if !status.success() {
            tracing::debug!(pid, "terminate signal not delivered");
        }
        Ok(())
    }

    fn which(&self, tool: &str) -> bool {
        which::which(tool).is_ok()
    }
}

/// The full capability set handed to an orchestrator
#[derive(Clone)]
pub struct Capabilities {
    /// Image store
    pub images: Arc<dyn ImageCapability>,
    /// Volume store
    pub volumes: Arc<dyn VolumeCapability>,
    /// Network manager
    pub networks: Arc<dyn NetworkCapability>,
    /// Container factory
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Host process supervision
    pub processes: Arc<dyn ProcessSupervisor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MountSource;

    struct NoopVolumes;

    #[async_trait]
    impl VolumeCapability for NoopVolumes {
        async fn create(&self, name: &str, _driver: &str, _external: bool) -> Result<PathBuf> {
            Ok(PathBuf::from("/volumes").join(name))
        }

        async fn remove(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_rootfs_is_two_gib() {
        assert_eq!(DEFAULT_ROOTFS_BYTES, 2_147_483_648);
    }

    #[test]
    fn test_parse_mount_provided_method() {
        let volumes = NoopVolumes;
        let mount = volumes.parse_mount("data:/var/lib/data:ro").unwrap();
        assert_eq!(mount.source, MountSource::Named("data".into()));
        assert!(mount.read_only);
        assert!(volumes.parse_mount(":broken").is_err());
    }

    #[test]
    fn test_host_supervisor_which() {
        let supervisor = HostProcessSupervisor;
        // `sh` exists on any host these tests run on; an unlikely name
        // does not.
        assert!(supervisor.which("sh"));
        assert!(!supervisor.which("definitely-not-a-real-tool-42"));
    }

    #[test]
    fn test_host_supervisor_rejects_empty_argv() {
        let supervisor = HostProcessSupervisor;
        assert!(matches!(
            supervisor.spawn(&[]),
            Err(Error::PortForwardingFailed { .. })
        ));
    }
}
