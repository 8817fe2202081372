//! Typed in-memory model of a compose manifest.
//!
//! The model is decoder-agnostic: every type derives `Deserialize`, so any
//! YAML or JSON front end can deliver it. Polymorphic compose fields
//! (string-or-list, string-or-map, bool-or-object) are tagged unions with
//! normalization accessors rather than loosely typed values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A complete compose document
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ComposeFile {
    /// Optional schema version carried by legacy files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Services keyed by name
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    /// Top-level network definitions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Network>,
    /// Top-level volume definitions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Volume>,
    /// Top-level config file definitions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<String, FileDefinition>,
    /// Top-level secret file definitions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, FileDefinition>,
}

impl ComposeFile {
    /// Validate the manifest invariants.
    ///
    /// Checks that services exist, every `depends_on` referent is defined,
    /// the dependency graph is acyclic, and every config/secret reference
    /// resolves to a non-external top-level definition.
    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(Error::EmptyManifest);
        }

        for (name, service) in &self.services {
            for dependency in service.depends_on.names() {
                if !self.services.contains_key(dependency) {
                    return Err(Error::MissingDependency {
                        service: name.clone(),
                        dependency: dependency.to_string(),
                    });
                }
            }
            for reference in &service.configs {
                self.check_file_reference(name, "config", reference.source(), &self.configs)?;
            }
            for reference in &service.secrets {
                self.check_file_reference(name, "secret", reference.source(), &self.secrets)?;
            }
        }

        if let Some(path) = crate::deps::find_cycle(&self.services) {
            return Err(Error::CircularDependency { path });
        }

        Ok(())
    }

    /// Look up a service, failing with [`Error::ServiceNotFound`]
    pub fn service(&self, name: &str) -> Result<&Service> {
        self.services
            .get(name)
            .ok_or_else(|| Error::service_not_found(name))
    }

    fn check_file_reference(
        &self,
        service: &str,
        kind: &'static str,
        name: &str,
        definitions: &BTreeMap<String, FileDefinition>,
    ) -> Result<()> {
        let Some(definition) = definitions.get(name) else {
            return Err(Error::UnknownFileReference {
                service: service.to_string(),
                kind,
                name: name.to_string(),
            });
        };
        if definition.external.as_ref().is_some_and(External::is_external) {
            return Err(Error::ExternalFileDefinition {
                kind,
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// One named unit of work in the manifest
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Service {
    /// Image reference, taken verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Build instructions used when `image` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    /// Container hostname, defaults to the service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Working directory inside the container
    #[serde(default, rename = "working_dir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// User to run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Command override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    /// Entrypoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Command>,
    /// Environment variables, map or `KEY=V` list form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    /// One or many env files loaded before `environment`
    #[serde(default, rename = "env_file", skip_serializing_if = "Option::is_none")]
    pub env_files: Option<EnvFiles>,
    /// Published ports (`[hostIP:]hostPort:containerPort[/proto]`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Mount specs (`src[:dst[:ro]]`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Tmpfs mount points
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tmpfs: Vec<String>,
    /// Config references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<FileReference>,
    /// Secret references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<FileReference>,
    /// Startup dependencies
    #[serde(default, rename = "depends_on", skip_serializing_if = "DependsOn::is_empty")]
    pub depends_on: DependsOn,
    /// Container healthcheck
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    /// Deployment settings (replicas, resource limits)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,
    /// Container restart policy name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Free-form labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Profiles gating this service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    /// Logging driver settings, passed through to the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Logging>,
}

impl Service {
    /// Desired replica count, defaulting to one
    pub fn replicas(&self) -> u32 {
        self.deploy
            .as_ref()
            .and_then(|deploy| deploy.replicas)
            .unwrap_or(1)
    }

    /// Whether the service is gated behind any profile
    pub fn has_profiles(&self) -> bool {
        !self.profiles.is_empty()
    }
}

/// Build instructions for a service without a pre-built image
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BuildConfig {
    /// Build context directory
    #[serde(default = "BuildConfig::default_context")]
    pub context: String,
    /// Dockerfile path relative to the context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Build arguments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    /// Target build stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl BuildConfig {
    fn default_context() -> String {
        ".".to_string()
    }
}

/// A command given either as one shell-ish string or as explicit argv
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Command {
    /// Single string, split on spaces when an argv is needed
    Shell(String),
    /// Explicit argv, used verbatim
    Argv(Vec<String>),
}

impl Command {
    /// Normalize to an argv
    pub fn as_argv(&self) -> Vec<String> {
        match self {
            Self::Shell(line) => line.split_whitespace().map(str::to_string).collect(),
            Self::Argv(argv) => argv.clone(),
        }
    }
}

/// Environment variables in map or `KEY=V` list form
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Environment {
    /// Map form
    Map(BTreeMap<String, String>),
    /// `KEY=V` list form; entries without `=` become empty values
    List(Vec<String>),
}

impl Environment {
    /// Normalize to a map
    pub fn as_map(&self) -> BTreeMap<String, String> {
        match self {
            Self::Map(map) => map.clone(),
            Self::List(entries) => entries
                .iter()
                .map(|entry| match entry.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (entry.clone(), String::new()),
                })
                .collect(),
        }
    }
}

/// One env file path or several
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EnvFiles {
    /// A single path
    One(String),
    /// Several paths, loaded in order with later files overriding
    Many(Vec<String>),
}

impl EnvFiles {
    /// Normalize to a path list
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::One(path) => vec![path.as_str()],
            Self::Many(paths) => paths.iter().map(String::as_str).collect(),
        }
    }
}

/// Startup condition required of a dependency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The dependency's container has started
    #[default]
    ServiceStarted,
    /// The dependency's healthcheck has passed
    ServiceHealthy,
}

/// Options attached to one `depends_on` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DependsOnEntry {
    /// Required condition, `service_started` when omitted
    #[serde(default)]
    pub condition: Condition,
    /// Whether the dependent should restart when the dependency does
    #[serde(default)]
    pub restart: bool,
}

/// Startup dependencies in list or map form
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DependsOn {
    /// Bare list of service names, all `service_started`
    List(Vec<String>),
    /// Map of service name to per-entry options
    Map(BTreeMap<String, DependsOnEntry>),
}

impl Default for DependsOn {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl DependsOn {
    /// Whether no dependencies are declared
    pub fn is_empty(&self) -> bool {
        match self {
            Self::List(names) => names.is_empty(),
            Self::Map(entries) => entries.is_empty(),
        }
    }

    /// The dependency names, in declaration order for lists and sorted for maps
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::List(names) => names.iter().map(String::as_str).collect(),
            Self::Map(entries) => entries.keys().map(String::as_str).collect(),
        }
    }

    /// Normalize to a name-to-condition map
    pub fn conditions(&self) -> BTreeMap<String, Condition> {
        match self {
            Self::List(names) => names
                .iter()
                .map(|name| (name.clone(), Condition::ServiceStarted))
                .collect(),
            Self::Map(entries) => entries
                .iter()
                .map(|(name, entry)| (name.clone(), entry.condition))
                .collect(),
        }
    }
}

/// Container healthcheck settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Healthcheck {
    /// Test command; string form is split on spaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<Command>,
    /// Delay between attempts (`<int><s|m|h>`, default 30s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Per-attempt timeout (`<int><s|m|h>`, default 30s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Attempts before the service is declared unhealthy, default 3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Grace period before the first attempt, default 0s
    #[serde(default, rename = "start_period", skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
    /// Disable the check entirely
    #[serde(default)]
    pub disable: bool,
}

/// Deployment settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Deploy {
    /// Desired replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    /// Resource constraints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    /// Restart policy
    #[serde(default, rename = "restart_policy", skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
}

/// Resource constraints under `deploy`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Resources {
    /// Upper bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceLimits>,
}

/// Resource upper bounds
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResourceLimits {
    /// CPU count, fractional values floor to whole CPUs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    /// Memory limit with `k`/`m`/`g` suffixes or bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Restart policy under `deploy`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RestartPolicy {
    /// Restart condition (`none`, `on-failure`, `any`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Logging driver settings, opaque to the core
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Logging {
    /// Driver name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Driver options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// A config or secret reference from a service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FileReference {
    /// Bare reference by definition name
    Name(String),
    /// Reference with an explicit mount target
    Detailed {
        /// The top-level definition name
        source: String,
        /// Mount path inside the container
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
}

impl FileReference {
    /// The referenced definition name
    pub fn source(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Detailed { source, .. } => source,
        }
    }

    /// The explicit mount target, when one was given
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Name(_) => None,
            Self::Detailed { target, .. } => target.as_deref(),
        }
    }
}

/// A top-level config or secret definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileDefinition {
    /// Host file backing the definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// External marker; unsupported by the core and rejected at validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<External>,
    /// Explicit runtime name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `external` in bool or `{ name }` form
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum External {
    /// Plain flag
    Flag(bool),
    /// Object form carrying an optional alias
    Aliased {
        /// Pre-existing resource name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl External {
    /// Whether the resource is managed outside the project
    pub fn is_external(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Aliased { .. } => true,
        }
    }

    /// The alias of the pre-existing resource, when given
    pub fn alias(&self) -> Option<&str> {
        match self {
            Self::Flag(_) => None,
            Self::Aliased { name } => name.as_deref(),
        }
    }
}

/// A top-level network definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Network {
    /// Network driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Driver options
    #[serde(default, rename = "driver_opts", skip_serializing_if = "BTreeMap::is_empty")]
    pub driver_opts: BTreeMap<String, String>,
    /// Address management settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<Ipam>,
    /// External marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<External>,
    /// Whether the network is host-isolated
    #[serde(default)]
    pub internal: bool,
    /// Whether standalone containers may attach
    #[serde(default)]
    pub attachable: bool,
    /// Free-form labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Explicit runtime name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Network {
    /// Driver name, `bridge` when omitted
    pub fn driver(&self) -> &str {
        self.driver.as_deref().unwrap_or("bridge")
    }
}

/// IP address management settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Ipam {
    /// IPAM driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Address pools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<IpamPool>,
}

/// One IPAM address pool
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IpamPool {
    /// Pool subnet in CIDR form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    /// Pool gateway address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// A top-level volume definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Volume {
    /// Volume driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Driver options
    #[serde(default, rename = "driver_opts", skip_serializing_if = "BTreeMap::is_empty")]
    pub driver_opts: BTreeMap<String, String>,
    /// External marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<External>,
    /// Free-form labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Explicit runtime name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Volume {
    /// Driver name, `local` when omitted
    pub fn driver(&self) -> &str {
        self.driver.as_deref().unwrap_or("local")
    }

    /// Whether the volume is managed outside the project
    pub fn is_external(&self) -> bool {
        self.external.as_ref().is_some_and(External::is_external)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_image(image: &str) -> Service {
        Service {
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    fn manifest(services: &[(&str, Service)]) -> ComposeFile {
        ComposeFile {
            services: services
                .iter()
                .map(|(name, service)| (name.to_string(), service.clone()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_manifest_rejected() {
        let file = ComposeFile::default();
        assert!(matches!(file.validate(), Err(Error::EmptyManifest)));
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let mut web = service_with_image("nginx");
        web.depends_on = DependsOn::List(vec!["db".into()]);
        let file = manifest(&[("web", web)]);
        match file.validate() {
            Err(Error::MissingDependency {
                service,
                dependency,
            }) => {
                assert_eq!(service, "web");
                assert_eq!(dependency, "db");
            }
            other => panic!("expected missing dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let mut app = service_with_image("app");
        app.depends_on = DependsOn::List(vec!["app".into()]);
        let file = manifest(&[("app", app)]);
        assert!(matches!(
            file.validate(),
            Err(Error::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_config_reference_rejected() {
        let mut app = service_with_image("app");
        app.configs = vec![FileReference::Name("settings".into())];
        let file = manifest(&[("app", app)]);
        assert!(matches!(
            file.validate(),
            Err(Error::UnknownFileReference { kind: "config", .. })
        ));
    }

    #[test]
    fn test_external_secret_rejected() {
        let mut app = service_with_image("app");
        app.secrets = vec![FileReference::Name("token".into())];
        let mut file = manifest(&[("app", app)]);
        file.secrets.insert(
            "token".into(),
            FileDefinition {
                external: Some(External::Flag(true)),
                ..Default::default()
            },
        );
        assert!(matches!(
            file.validate(),
            Err(Error::ExternalFileDefinition { kind: "secret", .. })
        ));
    }

    #[test]
    fn test_command_normalization() {
        let shell = Command::Shell("sh -c true".into());
        assert_eq!(shell.as_argv(), vec!["sh", "-c", "true"]);
        let argv = Command::Argv(vec!["sh".into(), "-c".into(), "sleep 1".into()]);
        assert_eq!(argv.as_argv(), vec!["sh", "-c", "sleep 1"]);
    }

    #[test]
    fn test_environment_normalization() {
        let list = Environment::List(vec!["A=1".into(), "FLAG".into()]);
        let map = list.as_map();
        assert_eq!(map["A"], "1");
        assert_eq!(map["FLAG"], "");
    }

    #[test]
    fn test_depends_on_conditions() {
        let json = r#"{ "db": { "condition": "service_healthy" }, "cache": {} }"#;
        let depends: DependsOn = serde_json::from_str(json).unwrap();
        let conditions = depends.conditions();
        assert_eq!(conditions["db"], Condition::ServiceHealthy);
        assert_eq!(conditions["cache"], Condition::ServiceStarted);

        let list: DependsOn = serde_json::from_str(r#"["db", "cache"]"#).unwrap();
        assert!(list
            .conditions()
            .values()
            .all(|condition| *condition == Condition::ServiceStarted));
    }

    #[test]
    fn test_external_polymorphism() {
        let flag: External = serde_json::from_str("true").unwrap();
        assert!(flag.is_external());
        assert_eq!(flag.alias(), None);

        let aliased: External = serde_json::from_str(r#"{ "name": "shared-net" }"#).unwrap();
        assert!(aliased.is_external());
        assert_eq!(aliased.alias(), Some("shared-net"));

        let disabled: External = serde_json::from_str("false").unwrap();
        assert!(!disabled.is_external());
    }

    #[test]
    fn test_file_reference_forms() {
        let bare: FileReference = serde_json::from_str(r#""settings""#).unwrap();
        assert_eq!(bare.source(), "settings");
        assert_eq!(bare.target(), None);

        let detailed: FileReference =
            serde_json::from_str(r#"{ "source": "settings", "target": "/etc/app.conf" }"#).unwrap();
        assert_eq!(detailed.source(), "settings");
        assert_eq!(detailed.target(), Some("/etc/app.conf"));
    }

    #[test]
    fn test_default_drivers() {
        assert_eq!(Network::default().driver(), "bridge");
        assert_eq!(Volume::default().driver(), "local");
    }

    #[test]
    fn test_replicas_default() {
        let service = service_with_image("worker");
        assert_eq!(service.replicas(), 1);

        let scaled = Service {
            deploy: Some(Deploy {
                replicas: Some(3),
                ..Default::default()
            }),
            ..service_with_image("worker")
        };
        assert_eq!(scaled.replicas(), 3);
    }

    #[test]
    fn test_service_decodes_from_json() {
        let json = r#"{
            "image": "nginx",
            "command": "nginx -g daemon off;",
            "environment": ["MODE=prod"],
            "env_file": ".env",
            "ports": ["18080:80"],
            "depends_on": ["app"],
            "deploy": { "resources": { "limits": { "cpus": "1.5", "memory": "512m" } } }
        }"#;
        let service: Service = serde_json::from_str(json).unwrap();
        assert_eq!(service.image.as_deref(), Some("nginx"));
        assert_eq!(service.env_files, Some(EnvFiles::One(".env".into())));
        assert_eq!(service.ports, vec!["18080:80"]);
        assert_eq!(service.depends_on.names(), vec!["app"]);
        let limits = service.deploy.unwrap().resources.unwrap().limits.unwrap();
        assert_eq!(limits.cpus.as_deref(), Some("1.5"));
        assert_eq!(limits.memory.as_deref(), Some("512m"));
    }
}
