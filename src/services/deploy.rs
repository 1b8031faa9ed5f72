//! Deploy workflow
//!
//! ensure environment file -> compose topology -> write manifest -> build + start.
//! Stops at the first error; nothing reaches the runtime when composition fails.

use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::env::constants::ADMIN_UI_PORT;
use crate::config::BootstrapConfig;
use crate::domain::env_file::{EnvironmentFile, DEFAULT_ENV_TEMPLATE};
use crate::domain::runtime::RuntimeAction;
use crate::domain::topology::TopologyDescription;
use crate::error::Result;
use crate::infra::command::CommandInvoker;
use crate::services::composer::{self, ADMIN_SERVICE, API_SERVICE, DB_SERVICE};
use crate::services::config_writer::{self, EnsureOutcome};
use crate::services::manifest;
use crate::services::runtime::RuntimeInvoker;

/// Inputs resolved and files written, runtime not yet touched.
#[derive(Debug)]
pub struct Prepared {
    pub env: EnvironmentFile,
    pub topology: TopologyDescription,
    /// `None` when the environment file was not ensured.
    pub env_outcome: Option<EnsureOutcome>,
    pub manifest_path: PathBuf,
}

/// A reachable address printed after a successful deploy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub name: String,
    pub address: String,
}

impl Endpoint {
    fn new(name: &str, address: String) -> Self {
        Self {
            name: name.to_string(),
            address,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeploySummary {
    pub project: String,
    pub env_created: bool,
    pub manifest_path: PathBuf,
    pub endpoints: Vec<Endpoint>,
}

/// Resolve the environment, compose the topology and write the manifest.
///
/// With `create_env` false a missing environment file is replaced by the
/// built-in defaults in memory and nothing is written for it.
pub async fn prepare(config: &BootstrapConfig, create_env: bool) -> Result<Prepared> {
    let (env, env_outcome) = if create_env {
        let outcome = config_writer::ensure(&config.env_file, DEFAULT_ENV_TEMPLATE).await?;
        if outcome == EnsureOutcome::Created {
            info!(path = %config.env_file.display(), "Created environment file with defaults, review it before going live");
        }
        let content = config_writer::read(&config.env_file).await?;
        (EnvironmentFile::parse(&content), Some(outcome))
    } else if config.env_file.exists() {
        let content = config_writer::read(&config.env_file).await?;
        (EnvironmentFile::parse(&content), None)
    } else {
        info!(path = %config.env_file.display(), "Environment file not found, using defaults");
        (EnvironmentFile::defaults(), None)
    };

    write_manifest(config, env, env_outcome).await
}

/// Prepare for stop/remove. Keys missing from the environment file fall back
/// to the defaults, since tearing down needs only the project and the images.
pub async fn prepare_for_cleanup(config: &BootstrapConfig) -> Result<Prepared> {
    let mut env = if config.env_file.exists() {
        EnvironmentFile::parse(&config_writer::read(&config.env_file).await?)
    } else {
        EnvironmentFile::new()
    };

    let filled = env.fill_missing(&EnvironmentFile::defaults());
    if !filled.is_empty() {
        warn!(
            path = %config.env_file.display(),
            keys = %filled.join(","),
            "Environment keys missing, using defaults for cleanup"
        );
    }

    write_manifest(config, env, None).await
}

async fn write_manifest(
    config: &BootstrapConfig,
    env: EnvironmentFile,
    env_outcome: Option<EnsureOutcome>,
) -> Result<Prepared> {
    let topology = composer::compose(&env, &config.project_name)?;
    let rendered = manifest::render(&topology)?;
    config_writer::write_derived(&config.manifest_file, &rendered).await?;

    Ok(Prepared {
        env,
        topology,
        env_outcome,
        manifest_path: config.manifest_file.clone(),
    })
}

/// Prepare, then build and start the whole topology.
pub async fn deploy<I: CommandInvoker>(config: &BootstrapConfig, runtime: &RuntimeInvoker<I>) -> Result<DeploySummary> {
    let prepared = prepare(config, true).await?;

    runtime.apply(&RuntimeAction::build(), &prepared.topology).await?;
    runtime.apply(&RuntimeAction::start(), &prepared.topology).await?;

    let endpoints = endpoints(&prepared.env)?;
    info!(project = %config.project_name, endpoints = endpoints.len(), "Deploy finished");

    Ok(DeploySummary {
        project: config.project_name.clone(),
        env_created: prepared.env_outcome == Some(EnsureOutcome::Created),
        manifest_path: prepared.manifest_path,
        endpoints,
    })
}

fn endpoints(env: &EnvironmentFile) -> Result<Vec<Endpoint>> {
    let api_port = env.require("API_PORT", API_SERVICE)?;
    let db_port = env.require("POSTGRES_PORT", DB_SERVICE)?;
    let domain = env.require("DOMAIN", ADMIN_SERVICE)?;

    Ok(vec![
        Endpoint::new("API", format!("http://localhost:{}", api_port)),
        Endpoint::new("API docs", format!("http://localhost:{}/api/docs", api_port)),
        Endpoint::new("Admin UI", format!("http://localhost:{}", ADMIN_UI_PORT)),
        Endpoint::new("Database", format!("localhost:{}", db_port)),
        Endpoint::new("API (proxy)", format!("http://api.{}", domain)),
        Endpoint::new("Admin UI (proxy)", format!("http://pgadmin.{}", domain)),
    ])
}
