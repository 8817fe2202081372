//! Error types for the compote orchestration core.
//!
//! Every failure the core can surface is a variant here, grouped by the
//! taxonomy the orchestrator works with: manifest validation, capability
//! calls, persisted state, lifecycle misuse, and healthchecks.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for compote-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for all compote-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Compose file defines no services
    #[error("compose file defines no services")]
    EmptyManifest,

    /// A `depends_on` entry names a service that does not exist
    #[error("service `{service}` depends on unknown service `{dependency}`")]
    MissingDependency {
        /// The service carrying the dependency
        service: String,
        /// The unknown dependency name
        dependency: String,
    },

    /// The dependency graph contains a cycle
    #[error("circular service dependency: {}", path.join(" -> "))]
    CircularDependency {
        /// One full walk of the offending cycle
        path: Vec<String>,
    },

    /// A service references a config or secret with no top-level definition
    #[error("service `{service}` references undefined {kind} `{name}`")]
    UnknownFileReference {
        /// The referencing service
        service: String,
        /// Either `config` or `secret`
        kind: &'static str,
        /// The unresolved reference
        name: String,
    },

    /// External configs and secrets are not supported
    #[error("{kind} `{name}` is external; external {kind}s are not supported")]
    ExternalFileDefinition {
        /// Either `config` or `secret`
        kind: &'static str,
        /// The offending definition name
        name: String,
    },

    /// A port mapping string did not match `[hostIP:]hostPort:containerPort[/proto]`
    #[error("invalid port mapping `{mapping}`")]
    InvalidPortMapping {
        /// The offending mapping string
        mapping: String,
    },

    /// A port mapping used a protocol other than tcp or udp
    #[error("unsupported protocol `{proto}` (expected tcp or udp)")]
    UnsupportedProtocol {
        /// The offending protocol token
        proto: String,
    },

    /// A volume mount string did not match `src[:dst[:ro]]`
    #[error("invalid volume mount `{spec}`")]
    InvalidMount {
        /// The offending mount string
        spec: String,
    },

    /// A service selector did not match `service[#replica]`
    #[error("invalid service selector `{selector}`")]
    InvalidServiceSelector {
        /// The offending selector string
        selector: String,
    },

    /// A scale target did not match `service=replicas`
    #[error("invalid scale target `{target}` (expected service=replicas)")]
    InvalidScale {
        /// The offending target string
        target: String,
    },

    /// An environment file could not be parsed
    #[error("malformed environment file {}: line {line}", path.display())]
    EnvFileParse {
        /// The offending file
        path: PathBuf,
        /// 1-based line number of the first malformed entry
        line: usize,
    },

    /// A file referenced by the manifest could not be read
    #[error("failed to read {}", path.display())]
    Io {
        /// The unreadable file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A runtime capability call failed
    #[error("{operation} failed: {message}")]
    Capability {
        /// The capability operation that failed (e.g. `image pull`)
        operation: String,
        /// Failure detail from the capability
        message: String,
    },

    /// A service could not be brought up
    #[error("service `{service}` failed to start")]
    FailedToStart {
        /// The service that failed
        service: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A service could not be brought down
    #[error("service `{service}` failed to stop")]
    FailedToStop {
        /// The service that failed
        service: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A host port relay could not be established
    #[error("port forwarding failed: {detail}")]
    PortForwardingFailed {
        /// What went wrong with the relay
        detail: String,
    },

    /// The relay tool backing port forwards is missing from the host
    #[error("port relay tool `{tool}` not found on PATH; install it to publish ports")]
    RelayToolMissing {
        /// The missing executable name
        tool: String,
    },

    /// Reading or writing the project state file failed
    #[error("state store I/O error at {}", path.display())]
    StateIo {
        /// The state file involved
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The project state file could not be decoded
    #[error("state store parse error at {}", path.display())]
    StateParse {
        /// The state file involved
        path: PathBuf,
        /// The underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// The named service is not part of the manifest or persisted state
    #[error("service not found: {service}")]
    ServiceNotFound {
        /// The unknown service name
        service: String,
    },

    /// The named service exists but has no running replicas
    #[error("service `{service}` is not running")]
    ServiceNotRunning {
        /// The stopped service name
        service: String,
    },

    /// The requested replica of a service does not exist
    #[error("service `{service}` has no replica {replica}; scale up to create it")]
    ServiceReplicaNotFound {
        /// The service name
        service: String,
        /// The missing 1-based replica index
        replica: u32,
    },

    /// A healthcheck exhausted its retries without passing
    #[error("service `{service}` is unhealthy")]
    Unhealthy {
        /// The unhealthy service
        service: String,
    },

    /// A `service_healthy` waiter gave up before the dependency reported in
    #[error("timed out waiting for service `{service}` to become healthy")]
    HealthcheckTimeout {
        /// The service that never reported healthy
        service: String,
    },
}

impl Error {
    /// Create a new capability error
    pub fn capability(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capability {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Wrap a failure in the start path of a service
    pub fn failed_to_start(service: impl Into<String>, source: Error) -> Self {
        Self::FailedToStart {
            service: service.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a failure in the stop path of a service
    pub fn failed_to_stop(service: impl Into<String>, source: Error) -> Self {
        Self::FailedToStop {
            service: service.into(),
            source: Box::new(source),
        }
    }

    /// Create a new port forwarding error
    pub fn port_forwarding(detail: impl Into<String>) -> Self {
        Self::PortForwardingFailed {
            detail: detail.into(),
        }
    }

    /// Create a new service-not-found error
    pub fn service_not_found(service: impl Into<String>) -> Self {
        Self::ServiceNotFound {
            service: service.into(),
        }
    }

    /// Create a new service-not-running error
    pub fn service_not_running(service: impl Into<String>) -> Self {
        Self::ServiceNotRunning {
            service: service.into(),
        }
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::EmptyManifest
            | Self::MissingDependency { .. }
            | Self::CircularDependency { .. }
            | Self::UnknownFileReference { .. }
            | Self::ExternalFileDefinition { .. }
            | Self::InvalidPortMapping { .. }
            | Self::UnsupportedProtocol { .. }
            | Self::InvalidMount { .. }
            | Self::InvalidServiceSelector { .. }
            | Self::InvalidScale { .. }
            | Self::EnvFileParse { .. }
            | Self::Io { .. } => "manifest",
            Self::Capability { .. }
            | Self::FailedToStart { .. }
            | Self::FailedToStop { .. }
            | Self::PortForwardingFailed { .. }
            | Self::RelayToolMissing { .. } => "capability",
            Self::StateIo { .. } | Self::StateParse { .. } => "state",
            Self::ServiceNotFound { .. }
            | Self::ServiceNotRunning { .. }
            | Self::ServiceReplicaNotFound { .. } => "lifecycle",
            Self::Unhealthy { .. } | Self::HealthcheckTimeout { .. } => "health",
        }
    }

    /// Check whether the failure is fail-fast manifest validation
    pub fn is_manifest_error(&self) -> bool {
        self.category() == "manifest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::EmptyManifest.category(), "manifest");
        assert_eq!(
            Error::capability("image pull", "registry unreachable").category(),
            "capability"
        );
        assert_eq!(Error::service_not_found("web").category(), "lifecycle");
        assert_eq!(
            Error::Unhealthy {
                service: "db".into()
            }
            .category(),
            "health"
        );
        assert_eq!(
            Error::StateParse {
                path: PathBuf::from("/tmp/p.json"),
                source: serde_json::from_str::<serde_json::Value>("nope").unwrap_err(),
            }
            .category(),
            "state"
        );
    }

    #[test]
    fn test_cycle_message_includes_path() {
        let err = Error::CircularDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "circular service dependency: a -> b -> a");
    }

    #[test]
    fn test_failed_to_start_preserves_cause() {
        let cause = Error::capability("container create", "vm not booted");
        let err = Error::failed_to_start("web", cause);
        assert_eq!(err.to_string(), "service `web` failed to start");
        let source = std::error::Error::source(&err).expect("source preserved");
        assert!(source.to_string().contains("vm not booted"));
    }

    #[test]
    fn test_not_running_vs_not_found() {
        // The two must stay distinct so callers can tell a stopped service
        // from an unknown one.
        assert!(matches!(
            Error::service_not_running("web"),
            Error::ServiceNotRunning { .. }
        ));
        assert!(matches!(
            Error::service_not_found("web"),
            Error::ServiceNotFound { .. }
        ));
    }

    #[test]
    fn test_replica_hint() {
        let err = Error::ServiceReplicaNotFound {
            service: "worker".into(),
            replica: 3,
        };
        assert!(err.to_string().contains("scale up"));
    }
}
