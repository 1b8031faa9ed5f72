//! Deployment topology model.
//!
//! A topology is the declarative description of every deployable service,
//! the networks and named volumes they use, and the dependency edges between
//! them. It is pure data; rendering to a manifest lives in
//! `services::manifest`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::domain::env_file::EnvironmentFile;
use crate::error::{BootstrapError, Result};

/// Where a service's image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceSource {
    /// Built locally from a Dockerfile and tagged as `image`.
    Build {
        context: String,
        dockerfile: String,
        image: String,
    },
    /// Pulled from a registry.
    Image(String),
}

impl ServiceSource {
    /// Image reference the service runs, built or pulled.
    pub fn image_ref(&self) -> &str {
        match self {
            Self::Build { image, .. } => image,
            Self::Image(reference) => reference,
        }
    }
}

/// Host to container port mapping.
///
/// The host side is substituted from the environment file and kept opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: String,
    pub container: u16,
}

impl PortMapping {
    pub fn new(host: impl Into<String>, container: u16) -> Self {
        Self {
            host: host.into(),
            container,
        }
    }

    /// Compose short syntax (`host:container`).
    pub fn as_compose_str(&self) -> String {
        format!("{}:{}", self.host, self.container)
    }
}

/// Source side of a volume mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountSource {
    /// Path on the host filesystem.
    HostPath(String),
    /// Named volume declared in the topology.
    Named(String),
}

/// Volume mount configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: MountSource,
    pub target: String,
    pub read_only: bool,
}

impl VolumeMount {
    /// Creates a bind mount from a host path.
    pub fn bind(host_path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::HostPath(host_path.into()),
            target: target.into(),
            read_only: false,
        }
    }

    /// Creates a named volume mount.
    pub fn named(volume: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Named(volume.into()),
            target: target.into(),
            read_only: false,
        }
    }

    /// Sets the mount to read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Named volume referenced by this mount, if any.
    pub fn volume_name(&self) -> Option<&str> {
        match &self.source {
            MountSource::Named(name) => Some(name),
            MountSource::HostPath(_) => None,
        }
    }

    /// Compose short syntax (`source:target[:ro]`).
    pub fn as_compose_str(&self) -> String {
        let source = match &self.source {
            MountSource::HostPath(path) | MountSource::Named(path) => path,
        };
        if self.read_only {
            format!("{}:{}:ro", source, self.target)
        } else {
            format!("{}:{}", source, self.target)
        }
    }
}

/// Container restart policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    Never,
    OnFailure,
    Always,
    UnlessStopped,
}

impl RestartPolicy {
    /// Returns the Docker Compose restart policy string.
    pub fn as_compose_str(&self) -> &'static str {
        match self {
            Self::Never => "no",
            Self::OnFailure => "on-failure",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Command, in compose `test` form (`CMD`/`CMD-SHELL` first).
    pub test: Vec<String>,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub retries: u32,
    pub start_period_secs: u32,
}

impl HealthCheck {
    /// Creates a shell-command health check with the given timings.
    pub fn shell(command: impl Into<String>, interval_secs: u32, timeout_secs: u32, retries: u32) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), command.into()],
            interval_secs,
            timeout_secs,
            retries,
            start_period_secs: 0,
        }
    }

    /// Sets the start grace period.
    pub fn start_period(mut self, secs: u32) -> Self {
        self.start_period_secs = secs;
        self
    }
}

/// One deployable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub source: ServiceSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    pub ports: Vec<PortMapping>,
    pub environment: BTreeMap<String, String>,
    pub volumes: Vec<VolumeMount>,
    pub networks: BTreeSet<String>,
    pub depends_on: BTreeSet<String>,
    pub restart: RestartPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    /// Reverse-proxy routing annotations.
    pub labels: BTreeMap<String, String>,
}

impl ServiceDefinition {
    /// Creates a service builder.
    pub fn builder(name: impl Into<String>, source: ServiceSource) -> ServiceDefinitionBuilder {
        ServiceDefinitionBuilder::new(name, source)
    }
}

/// Builder for `ServiceDefinition`.
#[derive(Debug)]
pub struct ServiceDefinitionBuilder {
    service: ServiceDefinition,
}

impl ServiceDefinitionBuilder {
    pub fn new(name: impl Into<String>, source: ServiceSource) -> Self {
        Self {
            service: ServiceDefinition {
                name: name.into(),
                source,
                command: None,
                ports: Vec::new(),
                environment: BTreeMap::new(),
                volumes: Vec::new(),
                networks: BTreeSet::new(),
                depends_on: BTreeSet::new(),
                restart: RestartPolicy::default(),
                health_check: None,
                labels: BTreeMap::new(),
            },
        }
    }

    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service.command = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn port(mut self, mapping: PortMapping) -> Self {
        self.service.ports.push(mapping);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.service.environment.insert(key.into(), value.into());
        self
    }

    pub fn volume(mut self, mount: VolumeMount) -> Self {
        self.service.volumes.push(mount);
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.service.networks.insert(network.into());
        self
    }

    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.service.depends_on.insert(service.into());
        self
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.service.restart = policy;
        self
    }

    pub fn health_check(mut self, check: HealthCheck) -> Self {
        self.service.health_check = Some(check);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.service.labels.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> ServiceDefinition {
        self.service
    }
}

/// The complete deployment topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDescription {
    /// Compose project name.
    pub project: String,
    /// Services in declaration order.
    pub services: Vec<ServiceDefinition>,
    pub networks: BTreeSet<String>,
    pub volumes: BTreeSet<String>,
}

impl TopologyDescription {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            services: Vec::new(),
            networks: BTreeSet::new(),
            volumes: BTreeSet::new(),
        }
    }

    pub fn with_network(mut self, name: impl Into<String>) -> Self {
        self.networks.insert(name.into());
        self
    }

    pub fn with_volume(mut self, name: impl Into<String>) -> Self {
        self.volumes.insert(name.into());
        self
    }

    pub fn with_service(mut self, service: ServiceDefinition) -> Self {
        self.services.push(service);
        self
    }

    /// Gets a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Checks reference closure and acyclicity.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for service in &self.services {
            if !names.insert(service.name.as_str()) {
                return Err(BootstrapError::invalid_topology(format!(
                    "service `{}` is declared more than once",
                    service.name
                )));
            }
        }

        for service in &self.services {
            for dep in &service.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(BootstrapError::invalid_topology(format!(
                        "service `{}` depends on undeclared service `{}`",
                        service.name, dep
                    )));
                }
            }
            for network in &service.networks {
                if !self.networks.contains(network) {
                    return Err(BootstrapError::invalid_topology(format!(
                        "service `{}` joins undeclared network `{}`",
                        service.name, network
                    )));
                }
            }
            for volume in service.volumes.iter().filter_map(VolumeMount::volume_name) {
                if !self.volumes.contains(volume) {
                    return Err(BootstrapError::invalid_topology(format!(
                        "service `{}` mounts undeclared volume `{}`",
                        service.name, volume
                    )));
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(BootstrapError::invalid_topology(format!(
                "dependency cycle: {}",
                cycle.join(" -> ")
            )));
        }

        Ok(())
    }

    /// Returns services in dependency order (dependencies first).
    ///
    /// Ties keep declaration order. Assumes `validate` passed; services caught
    /// in a cycle are appended in declaration order.
    pub fn startup_order(&self) -> Vec<&ServiceDefinition> {
        let mut result = Vec::with_capacity(self.services.len());
        let mut placed: HashSet<&str> = HashSet::new();

        while result.len() < self.services.len() {
            let next = self.services.iter().find(|s| {
                !placed.contains(s.name.as_str())
                    && s.depends_on.iter().all(|d| placed.contains(d.as_str()) || self.service(d).is_none())
            });

            match next {
                Some(service) => {
                    placed.insert(service.name.as_str());
                    result.push(service);
                }
                None => {
                    for service in &self.services {
                        if placed.insert(service.name.as_str()) {
                            result.push(service);
                        }
                    }
                }
            }
        }

        result
    }

    /// Image references used by the whole topology or a single service.
    pub fn image_refs(&self, service: Option<&str>) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        for s in self.services.iter().filter(|s| service.map_or(true, |n| s.name == n)) {
            let image = s.source.image_ref().to_string();
            if !refs.contains(&image) {
                refs.push(image);
            }
        }
        refs
    }

    /// Copy with sensitive environment values masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for service in &mut copy.services {
            for (key, value) in service.environment.iter_mut() {
                *value = EnvironmentFile::display_value(key, value).to_string();
            }
        }
        copy
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            name: &'a str,
            topology: &'a TopologyDescription,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            match marks.get(name) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| *n == name).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(name.to_string());
                    return Some(cycle);
                }
                None => {}
            }

            marks.insert(name, Mark::Visiting);
            path.push(name);
            if let Some(service) = topology.service(name) {
                for dep in &service.depends_on {
                    if let Some(cycle) = visit(dep, topology, marks, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            marks.insert(name, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        self.services
            .iter()
            .find_map(|s| visit(&s.name, self, &mut marks, &mut path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str) -> ServiceDefinitionBuilder {
        ServiceDefinition::builder(name, ServiceSource::Image(format!("{}:latest", name))).network("net")
    }

    fn topology(services: Vec<ServiceDefinition>) -> TopologyDescription {
        services
            .into_iter()
            .fold(TopologyDescription::new("test").with_network("net").with_volume("data"), |t, s| {
                t.with_service(s)
            })
    }

    #[test]
    fn test_restart_policy() {
        assert_eq!(RestartPolicy::Never.as_compose_str(), "no");
        assert_eq!(RestartPolicy::OnFailure.as_compose_str(), "on-failure");
        assert_eq!(RestartPolicy::Always.as_compose_str(), "always");
        assert_eq!(RestartPolicy::UnlessStopped.as_compose_str(), "unless-stopped");
    }

    #[test]
    fn test_mount_compose_strings() {
        assert_eq!(VolumeMount::named("data", "/var/lib/data").as_compose_str(), "data:/var/lib/data");
        assert_eq!(
            VolumeMount::bind("/var/run/docker.sock", "/var/run/docker.sock").read_only().as_compose_str(),
            "/var/run/docker.sock:/var/run/docker.sock:ro"
        );
        assert_eq!(PortMapping::new("8080", 8000).as_compose_str(), "8080:8000");
    }

    #[test]
    fn test_validate_accepts_closed_acyclic_topology() {
        let t = topology(vec![
            service("db").volume(VolumeMount::named("data", "/data")).build(),
            service("api").depends_on("db").build(),
            service("proxy").depends_on("api").build(),
        ]);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unresolved_references() {
        let t = topology(vec![service("api").depends_on("db").build()]);
        assert!(matches!(t.validate(), Err(BootstrapError::InvalidTopology(m)) if m.contains("undeclared service `db`")));

        let t = topology(vec![service("api").network("other").build()]);
        assert!(matches!(t.validate(), Err(BootstrapError::InvalidTopology(m)) if m.contains("undeclared network `other`")));

        let t = topology(vec![service("db").volume(VolumeMount::named("missing", "/x")).build()]);
        assert!(matches!(t.validate(), Err(BootstrapError::InvalidTopology(m)) if m.contains("undeclared volume `missing`")));

        // bind mounts are not declared volumes
        let t = topology(vec![service("db").volume(VolumeMount::bind("./data", "/x")).build()]);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_cycles() {
        let t = topology(vec![service("api").build(), service("api").build()]);
        assert!(matches!(t.validate(), Err(BootstrapError::InvalidTopology(m)) if m.contains("more than once")));

        let t = topology(vec![
            service("a").depends_on("c").build(),
            service("b").depends_on("a").build(),
            service("c").depends_on("b").build(),
        ]);
        match t.validate() {
            Err(BootstrapError::InvalidTopology(m)) => assert_eq!(m, "dependency cycle: a -> c -> b -> a"),
            other => panic!("expected cycle error, got {:?}", other),
        }

        let t = topology(vec![service("self").depends_on("self").build()]);
        assert!(matches!(t.validate(), Err(BootstrapError::InvalidTopology(m)) if m == "dependency cycle: self -> self"));
    }

    #[test]
    fn test_startup_order() {
        let t = topology(vec![
            service("proxy").depends_on("api").depends_on("admin").build(),
            service("api").depends_on("db").build(),
            service("admin").depends_on("db").build(),
            service("db").build(),
        ]);
        let order: Vec<&str> = t.startup_order().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["db", "api", "admin", "proxy"]);
    }

    #[test]
    fn test_image_refs() {
        let t = topology(vec![
            ServiceDefinition::builder(
                "api",
                ServiceSource::Build {
                    context: ".".into(),
                    dockerfile: "Dockerfile".into(),
                    image: "website-api:latest".into(),
                },
            )
            .build(),
            service("db").build(),
            ServiceDefinition::builder("db2", ServiceSource::Image("db:latest".into())).build(),
        ]);
        assert_eq!(t.image_refs(None), vec!["website-api:latest", "db:latest"]);
        assert_eq!(t.image_refs(Some("api")), vec!["website-api:latest"]);
        assert!(t.image_refs(Some("nope")).is_empty());
    }

    #[test]
    fn test_redacted_masks_secrets_only() {
        let t = topology(vec![service("db")
            .env("POSTGRES_PASSWORD", "s3cret")
            .env("POSTGRES_DB", "website_db")
            .build()]);
        let redacted = t.redacted();
        let env = &redacted.services[0].environment;
        assert_eq!(env["POSTGRES_PASSWORD"], crate::domain::env_file::REDACTED);
        assert_eq!(env["POSTGRES_DB"], "website_db");
        assert_eq!(t.services[0].environment["POSTGRES_PASSWORD"], "s3cret");
    }
}
