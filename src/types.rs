//! Core types and grammars for the compote orchestration core.
//!
//! This module holds the small, bit-exact grammars the orchestrator accepts
//! from manifests and command lines (port mappings, service selectors,
//! scale targets, mount specs) together with the unit parsers for memory,
//! CPU and duration values, and the naming scheme for project resources.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Transport protocol of a published port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP relay with one handler per accepted connection
    Tcp,
    /// UDP relay over a single shared socket
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(Error::UnsupportedProtocol {
                proto: other.to_string(),
            }),
        }
    }
}

/// A published port parsed from `[hostIP:]hostPort:containerPort[/proto]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    /// Host address to bind, `0.0.0.0` when omitted
    pub host_ip: IpAddr,
    /// Host port in `[1,65535]`
    pub host_port: u16,
    /// Container port in `[1,65535]`
    pub container_port: u16,
    /// Transport protocol, `tcp` when omitted
    pub protocol: Protocol,
}

impl PortMapping {
    fn invalid(mapping: &str) -> Error {
        Error::InvalidPortMapping {
            mapping: mapping.to_string(),
        }
    }
}

impl FromStr for PortMapping {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ports, protocol) = match s.split_once('/') {
            Some((ports, proto)) => (ports, proto.parse::<Protocol>()?),
            None => (s, Protocol::Tcp),
        };

        let parts: Vec<&str> = ports.split(':').collect();
        let (host_ip, host_part, container_part) = match parts.as_slice() {
            [host, container] => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), *host, *container),
            [ip, host, container] => {
                let ip = ip.parse::<IpAddr>().map_err(|_| Self::invalid(s))?;
                (ip, *host, *container)
            }
            _ => return Err(Self::invalid(s)),
        };

        let host_port: u16 = host_part.parse().map_err(|_| Self::invalid(s))?;
        let container_port: u16 = container_part.parse().map_err(|_| Self::invalid(s))?;
        if host_port == 0 || container_port == 0 {
            return Err(Self::invalid(s));
        }

        Ok(Self {
            host_ip,
            host_port,
            container_port,
            protocol,
        })
    }
}

impl fmt::Display for PortMapping {
    /// Canonical form: `host_ip:host_port:container_port/proto`. Parsing
    /// the canonical form yields the same mapping back.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}/{}",
            self.host_ip, self.host_port, self.container_port, self.protocol
        )
    }
}

/// A `service[#replica]` selector from the command line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceSelector {
    /// Selected service name
    pub service: String,
    /// Specific 1-based replica, or every replica when `None`
    pub replica: Option<u32>,
}

impl ServiceSelector {
    /// Select every replica of a service
    pub fn all(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            replica: None,
        }
    }

    /// Select a single replica of a service
    pub fn replica(service: impl Into<String>, replica: u32) -> Self {
        Self {
            service: service.into(),
            replica: Some(replica),
        }
    }
}

impl FromStr for ServiceSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidServiceSelector {
            selector: s.to_string(),
        };

        match s.split_once('#') {
            None => {
                if s.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::all(s))
            }
            Some((service, replica)) => {
                if service.is_empty() {
                    return Err(invalid());
                }
                let replica: u32 = replica.parse().map_err(|_| invalid())?;
                if replica == 0 {
                    return Err(invalid());
                }
                Ok(Self::replica(service, replica))
            }
        }
    }
}

impl fmt::Display for ServiceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.replica {
            Some(replica) => write!(f, "{}#{}", self.service, replica),
            None => write!(f, "{}", self.service),
        }
    }
}

/// Aggregated replica selection for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaSelection {
    /// Every replica of the service
    All,
    /// Only the listed 1-based replica indices
    Indices(BTreeSet<u32>),
}

impl ReplicaSelection {
    /// Check whether the selection covers the given replica index
    pub fn contains(&self, replica: u32) -> bool {
        match self {
            Self::All => true,
            Self::Indices(indices) => indices.contains(&replica),
        }
    }
}

/// Aggregate selectors into a per-service selection.
///
/// A bare `service` selector widens the aggregate to every replica; with
/// only indexed selectors the aggregate is the union of the indices.
pub fn aggregate_selectors(
    selectors: &[ServiceSelector],
) -> BTreeMap<String, ReplicaSelection> {
    let mut aggregated: BTreeMap<String, ReplicaSelection> = BTreeMap::new();
    for selector in selectors {
        match selector.replica {
            None => {
                aggregated.insert(selector.service.clone(), ReplicaSelection::All);
            }
            Some(replica) => {
                let entry = aggregated
                    .entry(selector.service.clone())
                    .or_insert_with(|| ReplicaSelection::Indices(BTreeSet::new()));
                if let ReplicaSelection::Indices(indices) = entry {
                    indices.insert(replica);
                }
            }
        }
    }
    aggregated
}

/// A `service=replicas` scale target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleTarget {
    /// The service to scale
    pub service: String,
    /// Desired replica count, zero removes every replica
    pub replicas: u32,
}

impl FromStr for ScaleTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidScale {
            target: s.to_string(),
        };
        let (service, replicas) = s.split_once('=').ok_or_else(invalid)?;
        if service.is_empty() {
            return Err(invalid());
        }
        let replicas: u32 = replicas.parse().map_err(|_| invalid())?;
        Ok(Self {
            service: service.to_string(),
            replicas,
        })
    }
}

/// Where a mount's data comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// Bind mount of a host path (`/...`, `./...` or `~/...`)
    Bind(String),
    /// Named volume, scoped to the project at materialization time
    Named(String),
}

/// A parsed `src[:dst[:ro]]` mount spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Bind path or volume name
    pub source: MountSource,
    /// Mount point inside the container
    pub target: String,
    /// Whether the mount is read-only
    pub read_only: bool,
}

impl FromStr for MountSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidMount {
            spec: s.to_string(),
        };

        let parts: Vec<&str> = s.split(':').collect();
        let (source, target, read_only) = match parts.as_slice() {
            [source] if !source.is_empty() => (*source, *source, false),
            [source, target] if !source.is_empty() && !target.is_empty() => {
                (*source, *target, false)
            }
            [source, target, "ro"] if !source.is_empty() && !target.is_empty() => {
                (*source, *target, true)
            }
            _ => return Err(invalid()),
        };

        let source = if source.starts_with('/') || source.starts_with('.') || source.starts_with('~')
        {
            MountSource::Bind(source.to_string())
        } else {
            MountSource::Named(source.to_string())
        };

        Ok(Self {
            source,
            target: target.to_string(),
            read_only,
        })
    }
}

/// Stable container id: `{project}_{service}_{replica}`
pub fn container_id(project: &str, service: &str, replica: u32) -> String {
    format!("{project}_{service}_{replica}")
}

/// Display name: the bare service name for replica 1, `{service}-{replica}` otherwise
pub fn display_name(service: &str, replica: u32) -> String {
    if replica == 1 {
        service.to_string()
    } else {
        format!("{service}-{replica}")
    }
}

/// Log label: the bare service name for replica 1, `{service}#{replica}` otherwise
pub fn log_label(service: &str, replica: u32) -> String {
    if replica == 1 {
        service.to_string()
    } else {
        format!("{service}#{replica}")
    }
}

/// Per-project resource name for networks and named volumes
pub fn scoped_name(project: &str, name: &str) -> String {
    format!("{project}_{name}")
}

/// Deterministic port-forward id: `{service}#{replica}#{proto}#{hostPort}`
pub fn forward_id(service: &str, replica: u32, protocol: Protocol, host_port: u16) -> String {
    format!("{service}#{replica}#{protocol}#{host_port}")
}

/// Parse a memory limit with `k`/`m`/`g` suffixes into bytes.
///
/// A bare number is taken as bytes. Units are case-insensitive.
pub fn parse_memory(s: &str) -> crate::error::Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::capability("memory parse", "empty memory value"));
    }

    let (number_part, multiplier) = match s.chars().last() {
        Some('k' | 'K') => (&s[..s.len() - 1], 1_024),
        Some('m' | 'M') => (&s[..s.len() - 1], 1_024 * 1_024),
        Some('g' | 'G') => (&s[..s.len() - 1], 1_024 * 1_024 * 1_024),
        _ => (s, 1),
    };

    let number: f64 = number_part.parse().map_err(|_| {
        Error::capability("memory parse", format!("invalid memory value `{s}`"))
    })?;
    Ok((number * multiplier as f64) as u64)
}

/// Parse a CPU limit, flooring fractional counts to whole CPUs
pub fn parse_cpus(s: &str) -> crate::error::Result<u32> {
    let cpus: f64 = s
        .trim()
        .parse()
        .map_err(|_| Error::capability("cpu parse", format!("invalid cpu value `{s}`")))?;
    Ok(cpus.floor() as u32)
}

/// Default applied by [`parse_duration`] when a value cannot be understood
pub const DEFAULT_DURATION: Duration = Duration::from_secs(30);

/// Parse a `<int><s|m|h>` duration.
///
/// The healthcheck grammar is forgiving: an unknown unit or an unparsable
/// value falls back to 30 seconds rather than failing the manifest.
pub fn parse_duration(s: &str) -> Duration {
    let s = s.trim();
    let Some(unit) = s.chars().last() else {
        return DEFAULT_DURATION;
    };
    let Ok(count) = s[..s.len() - unit.len_utf8()].parse::<u64>() else {
        return DEFAULT_DURATION;
    };
    match unit {
        's' => Duration::from_secs(count),
        'm' => Duration::from_secs(count * 60),
        'h' => Duration::from_secs(count * 3600),
        _ => DEFAULT_DURATION,
    }
}
