//! Topology composer
//!
//! Builds the fixed website topology (API, database, admin UI, reverse proxy)
//! and substitutes every environment reference from the environment file.
//! A referenced key that is absent fails the whole composition with
//! `MissingVariable`; nothing partial is returned.

use tracing::debug;

use crate::config::env::constants::{ADMIN_UI_PORT, API_CONTAINER_PORT, DB_CONTAINER_PORT};
use crate::domain::env_file::EnvironmentFile;
use crate::domain::topology::{
    HealthCheck, PortMapping, RestartPolicy, ServiceDefinition, ServiceSource, TopologyDescription,
    VolumeMount,
};
use crate::error::Result;

pub const NETWORK: &str = "website_network";
pub const POSTGRES_VOLUME: &str = "postgres_data";
pub const PGADMIN_VOLUME: &str = "pgadmin_data";

pub const API_SERVICE: &str = "api";
pub const DB_SERVICE: &str = "db";
pub const ADMIN_SERVICE: &str = "pgadmin";
pub const PROXY_SERVICE: &str = "proxy";

const POSTGRES_IMAGE: &str = "postgres:15-alpine";
const PGADMIN_IMAGE: &str = "dpage/pgadmin4:latest";
const PROXY_IMAGE: &str = "traefik:v2.11";

/// Environment lookups scoped to the service being composed, so a missing
/// key names the service that needed it.
struct Resolver<'a> {
    env: &'a EnvironmentFile,
    service: &'static str,
}

impl<'a> Resolver<'a> {
    fn new(env: &'a EnvironmentFile, service: &'static str) -> Self {
        Self { env, service }
    }

    fn var(&self, key: &str) -> Result<&'a str> {
        self.env.require(key, self.service)
    }
}

/// Compose the website topology from an environment file.
pub fn compose(env: &EnvironmentFile, project: &str) -> Result<TopologyDescription> {
    let topology = TopologyDescription::new(project)
        .with_network(NETWORK)
        .with_volume(POSTGRES_VOLUME)
        .with_volume(PGADMIN_VOLUME)
        .with_service(database(&Resolver::new(env, DB_SERVICE))?)
        .with_service(api(&Resolver::new(env, API_SERVICE), project)?)
        .with_service(admin_ui(&Resolver::new(env, ADMIN_SERVICE))?)
        .with_service(proxy(&Resolver::new(env, PROXY_SERVICE))?);

    topology.validate()?;

    debug!(
        project = %project,
        services = topology.services.len(),
        "Composed topology"
    );
    Ok(topology)
}

fn database(r: &Resolver) -> Result<ServiceDefinition> {
    let user = r.var("POSTGRES_USER")?;
    let password = r.var("POSTGRES_PASSWORD")?;
    let db = r.var("POSTGRES_DB")?;
    let port = r.var("POSTGRES_PORT")?;

    Ok(ServiceDefinition::builder(DB_SERVICE, ServiceSource::Image(POSTGRES_IMAGE.to_string()))
        .env("POSTGRES_USER", user)
        .env("POSTGRES_PASSWORD", password)
        .env("POSTGRES_DB", db)
        .port(PortMapping::new(port, DB_CONTAINER_PORT))
        .volume(VolumeMount::named(POSTGRES_VOLUME, "/var/lib/postgresql/data"))
        .network(NETWORK)
        .restart(RestartPolicy::UnlessStopped)
        .health_check(
            HealthCheck::shell(format!("pg_isready -U {} -d {}", user, db), 10, 5, 5).start_period(10),
        )
        .build())
}

fn api(r: &Resolver, project: &str) -> Result<ServiceDefinition> {
    let domain = r.var("DOMAIN")?;
    let source = ServiceSource::Build {
        context: ".".to_string(),
        dockerfile: "Dockerfile".to_string(),
        image: format!("{}-api:latest", project),
    };

    let mut builder = ServiceDefinition::builder(API_SERVICE, source);
    for key in [
        "POSTGRES_USER",
        "POSTGRES_PASSWORD",
        "POSTGRES_SERVER",
        "POSTGRES_DB",
        "APP_ENV",
        "DEBUG",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_REGION",
        "S3_BUCKET_NAME",
    ] {
        builder = builder.env(key, r.var(key)?);
    }

    // POSTGRES_PORT is the published host port; over the stack network the
    // bundled database is reached on its container port.
    let server = r.var("POSTGRES_SERVER")?;
    let db_port = if server == DB_SERVICE {
        DB_CONTAINER_PORT.to_string()
    } else {
        r.var("POSTGRES_PORT")?.to_string()
    };

    Ok(builder
        .env("POSTGRES_PORT", db_port)
        .port(PortMapping::new(r.var("API_PORT")?, API_CONTAINER_PORT))
        .network(NETWORK)
        .depends_on(DB_SERVICE)
        .restart(RestartPolicy::UnlessStopped)
        .health_check(
            HealthCheck::shell(
                format!(
                    "python -c \"import urllib.request; urllib.request.urlopen('http://localhost:{}/health')\"",
                    API_CONTAINER_PORT
                ),
                30,
                10,
                3,
            )
            .start_period(20),
        )
        .label("traefik.enable", "true")
        .label("traefik.http.routers.api.rule", format!("Host(`api.{}`)", domain))
        .label("traefik.http.routers.api.entrypoints", "web")
        .label(
            "traefik.http.services.api.loadbalancer.server.port",
            API_CONTAINER_PORT.to_string(),
        )
        .build())
}

fn admin_ui(r: &Resolver) -> Result<ServiceDefinition> {
    let domain = r.var("DOMAIN")?;

    Ok(ServiceDefinition::builder(ADMIN_SERVICE, ServiceSource::Image(PGADMIN_IMAGE.to_string()))
        .env("PGADMIN_DEFAULT_EMAIL", r.var("PGADMIN_DEFAULT_EMAIL")?)
        .env("PGADMIN_DEFAULT_PASSWORD", r.var("PGADMIN_DEFAULT_PASSWORD")?)
        .port(PortMapping::new(ADMIN_UI_PORT.to_string(), 80))
        .volume(VolumeMount::named(PGADMIN_VOLUME, "/var/lib/pgadmin"))
        .network(NETWORK)
        .depends_on(DB_SERVICE)
        .restart(RestartPolicy::UnlessStopped)
        .label("traefik.enable", "true")
        .label("traefik.http.routers.pgadmin.rule", format!("Host(`pgadmin.{}`)", domain))
        .label("traefik.http.routers.pgadmin.entrypoints", "web")
        .label("traefik.http.services.pgadmin.loadbalancer.server.port", "80")
        .build())
}

fn proxy(r: &Resolver) -> Result<ServiceDefinition> {
    // Routing rules come from the other services' labels; only the domain is
    // checked here so a missing DOMAIN is reported against the proxy too.
    r.var("DOMAIN")?;

    Ok(ServiceDefinition::builder(PROXY_SERVICE, ServiceSource::Image(PROXY_IMAGE.to_string()))
        .command([
            "--providers.docker=true",
            "--providers.docker.exposedbydefault=false",
            "--entrypoints.web.address=:80",
            "--entrypoints.websecure.address=:443",
        ])
        .port(PortMapping::new("80", 80))
        .port(PortMapping::new("443", 443))
        .volume(VolumeMount::bind("/var/run/docker.sock", "/var/run/docker.sock").read_only())
        .network(NETWORK)
        .depends_on(API_SERVICE)
        .depends_on(ADMIN_SERVICE)
        .restart(RestartPolicy::UnlessStopped)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BootstrapError;

    #[test]
    fn test_compose_database_bindings() {
        let mut env = EnvironmentFile::defaults();
        env.set("POSTGRES_USER", "postgres");
        env.set("POSTGRES_PASSWORD", "postgres");
        env.set("POSTGRES_DB", "website_db");

        let topology = compose(&env, "website").unwrap();
        let db = topology.service(DB_SERVICE).unwrap();

        let bindings: Vec<(&str, &str)> = db
            .environment
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            bindings,
            vec![
                ("POSTGRES_DB", "website_db"),
                ("POSTGRES_PASSWORD", "postgres"),
                ("POSTGRES_USER", "postgres"),
            ]
        );
        assert!(topology.volumes.contains(POSTGRES_VOLUME));
        assert_eq!(db.volumes[0].volume_name(), Some(POSTGRES_VOLUME));
    }

    #[test]
    fn test_compose_substitutes_ports_and_labels() {
        let mut env = EnvironmentFile::defaults();
        env.set("API_PORT", "9000");
        env.set("DOMAIN", "example.org");

        let topology = compose(&env, "website").unwrap();
        let api = topology.service(API_SERVICE).unwrap();

        assert_eq!(api.ports, vec![PortMapping::new("9000", 8000)]);
        assert_eq!(api.labels["traefik.http.routers.api.rule"], "Host(`api.example.org`)");
        assert_eq!(api.source.image_ref(), "website-api:latest");
        assert_eq!(api.environment["POSTGRES_SERVER"], "db");

        let admin = topology.service(ADMIN_SERVICE).unwrap();
        assert_eq!(admin.ports, vec![PortMapping::new("5050", 80)]);
    }

    #[test]
    fn test_api_reaches_database_on_container_port() {
        let mut env = EnvironmentFile::defaults();
        env.set("POSTGRES_PORT", "5433");

        let topology = compose(&env, "website").unwrap();
        let db = topology.service(DB_SERVICE).unwrap();
        let api = topology.service(API_SERVICE).unwrap();

        assert_eq!(db.ports, vec![PortMapping::new("5433", 5432)]);
        assert_eq!(api.environment["POSTGRES_SERVER"], DB_SERVICE);
        assert_eq!(api.environment["POSTGRES_PORT"], db.ports[0].container.to_string());
    }

    #[test]
    fn test_external_database_keeps_configured_port() {
        let mut env = EnvironmentFile::defaults();
        env.set("POSTGRES_SERVER", "db.internal.example.org");
        env.set("POSTGRES_PORT", "6432");

        let topology = compose(&env, "website").unwrap();
        let api = topology.service(API_SERVICE).unwrap();

        assert_eq!(api.environment["POSTGRES_PORT"], "6432");
    }

    #[test]
    fn test_compose_fails_fast_on_missing_variable() {
        let mut env = EnvironmentFile::defaults();
        env.remove("POSTGRES_DB");

        match compose(&env, "website") {
            Err(BootstrapError::MissingVariable { key, service }) => {
                assert_eq!(key, "POSTGRES_DB");
                assert_eq!(service, DB_SERVICE);
            }
            other => panic!("expected MissingVariable, got {:?}", other),
        }

        let mut env = EnvironmentFile::defaults();
        env.remove("S3_BUCKET_NAME");
        assert!(matches!(
            compose(&env, "website"),
            Err(BootstrapError::MissingVariable { ref key, ref service }) if key == "S3_BUCKET_NAME" && service == API_SERVICE
        ));
    }

    #[test]
    fn test_composed_topology_is_closed_and_acyclic() {
        let topology = compose(&EnvironmentFile::defaults(), "website").unwrap();
        assert!(topology.validate().is_ok());

        let order: Vec<&str> = topology.startup_order().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec![DB_SERVICE, API_SERVICE, ADMIN_SERVICE, PROXY_SERVICE]);

        for service in &topology.services {
            assert!(service.networks.iter().all(|n| topology.networks.contains(n)));
            assert!(service
                .volumes
                .iter()
                .filter_map(|v| v.volume_name())
                .all(|v| topology.volumes.contains(v)));
        }
    }

    #[test]
    fn test_image_refs_are_tracked_from_topology() {
        let topology = compose(&EnvironmentFile::defaults(), "shop").unwrap();
        assert_eq!(
            topology.image_refs(None),
            vec![POSTGRES_IMAGE, "shop-api:latest", PGADMIN_IMAGE, PROXY_IMAGE]
        );
    }
}
