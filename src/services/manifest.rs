//! Compose manifest generation.
//!
//! Renders a `TopologyDescription` into a docker-compose.yml document the
//! external orchestrator can parse. This module only generates; it never
//! reads manifests back.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use crate::config::env::constants::VERSION;
use crate::domain::topology::{ServiceDefinition, ServiceSource, TopologyDescription};
use crate::error::Result;

/// Render the manifest text, header comment included.
pub fn render(topology: &TopologyDescription) -> Result<String> {
    let compose = ComposeFile::from_topology(topology);
    let body = serde_yaml::to_string(&compose)?;
    Ok(format!(
        "# Generated by website-stack {} from the environment file.\n# Regenerated on every deploy; edit the environment file instead.\n{}",
        VERSION, body
    ))
}

// Docker Compose YAML types

#[derive(Debug, Serialize)]
struct ComposeFile {
    name: String,
    #[serde(serialize_with = "ordered_map")]
    services: Vec<(String, ComposeService)>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    networks: BTreeMap<String, ComposeNetwork>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<String, ComposeVolume>,
}

impl ComposeFile {
    fn from_topology(topology: &TopologyDescription) -> Self {
        Self {
            name: topology.project.clone(),
            services: topology
                .services
                .iter()
                .map(|s| (s.name.clone(), ComposeService::from_definition(s, topology)))
                .collect(),
            networks: topology
                .networks
                .iter()
                .map(|n| {
                    (
                        n.clone(),
                        ComposeNetwork {
                            driver: "bridge".to_string(),
                        },
                    )
                })
                .collect(),
            volumes: topology
                .volumes
                .iter()
                .map(|v| (v.clone(), ComposeVolume::default()))
                .collect(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct ComposeService {
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<ComposeBuild>,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    networks: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    depends_on: BTreeMap<String, ComposeDependency>,
    restart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthcheck: Option<ComposeHealthcheck>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

impl ComposeService {
    fn from_definition(service: &ServiceDefinition, topology: &TopologyDescription) -> Self {
        let build = match &service.source {
            ServiceSource::Build {
                context, dockerfile, ..
            } => Some(ComposeBuild {
                context: escape(context),
                dockerfile: escape(dockerfile),
            }),
            ServiceSource::Image(_) => None,
        };

        let depends_on = service
            .depends_on
            .iter()
            .map(|dep| {
                let healthy = topology
                    .service(dep)
                    .map_or(false, |d| d.health_check.is_some());
                let condition = if healthy { "service_healthy" } else { "service_started" };
                (
                    dep.clone(),
                    ComposeDependency {
                        condition: condition.to_string(),
                    },
                )
            })
            .collect();

        Self {
            build,
            image: escape(service.source.image_ref()),
            command: service
                .command
                .as_ref()
                .map(|args| args.iter().map(|a| escape(a)).collect()),
            ports: service.ports.iter().map(|p| escape(&p.as_compose_str())).collect(),
            environment: escape_values(&service.environment),
            volumes: service.volumes.iter().map(|v| escape(&v.as_compose_str())).collect(),
            networks: service.networks.iter().cloned().collect(),
            depends_on,
            restart: service.restart.as_compose_str().to_string(),
            healthcheck: service.health_check.as_ref().map(|h| ComposeHealthcheck {
                test: h.test.iter().map(|t| escape(t)).collect(),
                interval: format!("{}s", h.interval_secs),
                timeout: format!("{}s", h.timeout_secs),
                retries: h.retries,
                start_period: format!("{}s", h.start_period_secs),
            }),
            labels: escape_values(&service.labels),
        }
    }
}

#[derive(Debug, Serialize)]
struct ComposeBuild {
    context: String,
    dockerfile: String,
}

#[derive(Debug, Serialize)]
struct ComposeDependency {
    condition: String,
}

#[derive(Debug, Serialize)]
struct ComposeNetwork {
    driver: String,
}

#[derive(Debug, Default, Serialize)]
struct ComposeVolume {}

#[derive(Debug, Serialize)]
struct ComposeHealthcheck {
    test: Vec<String>,
    interval: String,
    timeout: String,
    retries: u32,
    start_period: String,
}

/// Compose interpolates `$VAR` in every string; `$$` is a literal `$`.
fn escape(value: &str) -> String {
    value.replace('$', "$$")
}

fn escape_values(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), escape(v))).collect()
}

/// Serialize `(key, value)` pairs as a map, keeping their order.
fn ordered_map<S>(entries: &[(String, ComposeService)], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(entries.iter().map(|(k, v)| (k, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::env_file::EnvironmentFile;
    use crate::services::composer::compose;
    use serde_yaml::Value;

    fn rendered() -> (String, Value) {
        let topology = compose(&EnvironmentFile::defaults(), "website").unwrap();
        let text = render(&topology).unwrap();
        let value: Value = serde_yaml::from_str(&text).unwrap();
        (text, value)
    }

    #[test]
    fn test_render_has_header_and_sections() {
        let (text, value) = rendered();
        assert!(text.starts_with("# Generated by website-stack"));
        assert_eq!(value["name"].as_str(), Some("website"));
        assert!(value["networks"]["website_network"].is_mapping());
        assert!(value["volumes"]["postgres_data"].is_mapping());
        assert!(value["volumes"]["pgadmin_data"].is_mapping());
    }

    #[test]
    fn test_services_keep_topology_order() {
        let (_, value) = rendered();
        let names: Vec<&str> = value["services"]
            .as_mapping()
            .unwrap()
            .keys()
            .filter_map(|k| k.as_str())
            .collect();
        assert_eq!(names, vec!["db", "api", "pgadmin", "proxy"]);
    }

    #[test]
    fn test_service_fields() {
        let (_, value) = rendered();
        let api = &value["services"]["api"];
        assert_eq!(api["build"]["context"].as_str(), Some("."));
        assert_eq!(api["image"].as_str(), Some("website-api:latest"));
        assert_eq!(api["ports"][0].as_str(), Some("8000:8000"));
        assert_eq!(api["depends_on"]["db"]["condition"].as_str(), Some("service_healthy"));
        assert_eq!(api["restart"].as_str(), Some("unless-stopped"));

        let proxy = &value["services"]["proxy"];
        assert!(proxy.get("build").is_none());
        assert_eq!(proxy["depends_on"]["pgadmin"]["condition"].as_str(), Some("service_started"));
        assert_eq!(
            proxy["volumes"][0].as_str(),
            Some("/var/run/docker.sock:/var/run/docker.sock:ro")
        );

        let db = &value["services"]["db"];
        assert_eq!(db["environment"]["POSTGRES_DB"].as_str(), Some("website_db"));
        assert_eq!(db["healthcheck"]["interval"].as_str(), Some("10s"));
        assert_eq!(db["healthcheck"]["test"][0].as_str(), Some("CMD-SHELL"));
    }

    #[test]
    fn test_dollar_signs_are_not_interpolated() {
        let mut env = EnvironmentFile::defaults();
        env.set("POSTGRES_PASSWORD", "pa$word$$x");
        env.set("DOMAIN", "${HOST}");
        let topology = compose(&env, "website").unwrap();

        let text = render(&topology).unwrap();
        let value: Value = serde_yaml::from_str(&text).unwrap();

        assert!(text.contains("pa$$word$$$$x"));
        assert_eq!(
            value["services"]["db"]["environment"]["POSTGRES_PASSWORD"].as_str(),
            Some("pa$$word$$$$x")
        );
        assert_eq!(
            value["services"]["api"]["labels"]["traefik.http.routers.api.rule"].as_str(),
            Some("Host(`api.$${HOST}`)")
        );
        assert!(value["services"]["db"]["healthcheck"]["test"][1]
            .as_str()
            .unwrap()
            .starts_with("pg_isready"));
        // the topology itself keeps the raw values
        assert_eq!(
            topology.service("db").unwrap().environment["POSTGRES_PASSWORD"],
            "pa$word$$x"
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        let topology = compose(&EnvironmentFile::defaults(), "website").unwrap();
        assert_eq!(render(&topology).unwrap(), render(&topology).unwrap());
    }
}
