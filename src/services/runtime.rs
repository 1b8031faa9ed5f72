//! Container runtime invoker
//!
//! Translates `RuntimeAction`s into docker / docker compose invocations and
//! runs them one at a time. Every action is single-shot: a non-zero exit is
//! surfaced as `RuntimeActionFailed`, never retried or rolled back.
//!
//! Destructive actions (anything that deletes named volumes) are preceded by
//! a liveness probe of the runtime daemon.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::BootstrapConfig;
use crate::domain::runtime::{
    ActionKind, ActionRecord, CleanupMode, InvocationState, RuntimeAction, RuntimeResult,
};
use crate::domain::topology::TopologyDescription;
use crate::error::{BootstrapError, Result};
use crate::infra::command::{display_command, CommandError, CommandInvoker};

const STANDALONE_COMPOSE: &str = "docker-compose";

/// Which compose front-end to call.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ComposeCommand {
    program: String,
    prefix: Vec<String>,
}

/// Drives the external runtime for one project and keeps the action history.
pub struct RuntimeInvoker<I: CommandInvoker> {
    invoker: I,
    program: String,
    manifest: PathBuf,
    work_dir: PathBuf,
    project: String,
    probe_timeout: Duration,
    compose: OnceCell<ComposeCommand>,
    history: Mutex<Vec<ActionRecord>>,
}

impl<I: CommandInvoker> RuntimeInvoker<I> {
    pub fn new(invoker: I, config: &BootstrapConfig) -> Self {
        Self {
            invoker,
            program: config.runtime_program.clone(),
            manifest: config.manifest_file.clone(),
            work_dir: config.work_dir.clone(),
            project: config.project_name.clone(),
            probe_timeout: config.probe_timeout,
            compose: OnceCell::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Apply one action to the topology.
    ///
    /// Destructive actions probe the runtime first and fail with
    /// `RuntimeUnavailable` before anything is dispatched.
    pub async fn apply(&self, action: &RuntimeAction, topology: &TopologyDescription) -> Result<RuntimeResult> {
        if action.is_destructive() {
            if let Err(e) = self.preflight().await {
                self.record_aborted(action);
                return Err(e);
            }
        }
        self.run(action, topology).await
    }

    /// Run every action of a cleanup mode in order, stopping at the first failure.
    ///
    /// The runtime is always probed first, whatever the mode.
    pub async fn cleanup(&self, mode: CleanupMode, topology: &TopologyDescription) -> Result<Vec<RuntimeResult>> {
        info!(mode = mode.as_str(), project = %self.project, "Starting cleanup");

        let actions = mode.actions();
        if let Err(e) = self.preflight().await {
            for action in &actions {
                self.record_aborted(action);
            }
            return Err(e);
        }

        let mut results = Vec::with_capacity(actions.len());
        for action in &actions {
            results.push(self.run(action, topology).await?);
        }

        info!(mode = mode.as_str(), "Cleanup finished");
        Ok(results)
    }

    /// Liveness probe: ask the daemon for its version within the probe timeout.
    pub async fn preflight(&self) -> Result<String> {
        let args = to_args(&["info", "--format", "{{.ServerVersion}}"]);
        let probe = timeout(self.probe_timeout, self.invoker.invoke_quiet(&self.program, &args)).await;

        match probe {
            Err(_) => Err(BootstrapError::runtime_unavailable(format!(
                "`{} info` did not answer within {}s",
                self.program,
                self.probe_timeout.as_secs()
            ))),
            Ok(Err(e)) => Err(BootstrapError::runtime_unavailable(e.to_string())),
            Ok(Ok(result)) if !result.success() => {
                let stderr = result.stderr.trim();
                Err(BootstrapError::runtime_unavailable(if stderr.is_empty() {
                    format!("`{} info` exited with code {}", self.program, result.exit_code)
                } else {
                    stderr.to_string()
                }))
            }
            Ok(Ok(result)) => {
                let version = result.stdout.trim().to_string();
                debug!(program = %self.program, version = %version, "Runtime is reachable");
                Ok(version)
            }
        }
    }

    /// Snapshot of every action handled so far.
    pub fn records(&self) -> Vec<ActionRecord> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// One line per recorded action, for the operator.
    pub fn summary_lines(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|record| {
                let icon = match record.state {
                    InvocationState::Succeeded => "✓",
                    InvocationState::Failed => "✗",
                    InvocationState::Dispatched => "⟳",
                    InvocationState::NotStarted => "○",
                };
                let duration = record
                    .duration_ms
                    .map(|d| format!("{}ms", d))
                    .unwrap_or_else(|| "-".to_string());
                format!("{} {} ({})", icon, record.action, duration)
            })
            .collect()
    }

    async fn run(&self, action: &RuntimeAction, topology: &TopologyDescription) -> Result<RuntimeResult> {
        if let Some(service) = action.scope.service() {
            if topology.service(service).is_none() {
                return Err(BootstrapError::UnknownService(service.to_string()));
            }
        }

        let mut record = ActionRecord::new(action.clone());
        record.dispatch();
        info!(action = %action, project = %self.project, "Dispatching runtime action");

        let outcome = self.dispatch(action, topology).await;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                record.abort();
                self.push(record);
                return Err(BootstrapError::runtime_unavailable(e.to_string()));
            }
        };

        record.finish(result.exit_code);
        self.push(record);

        if !result.success() {
            error!(action = %action, exit_code = result.exit_code, "Runtime action failed");
            return Err(BootstrapError::action_failed(
                action.to_string(),
                result.exit_code,
                result.stderr,
            ));
        }

        info!(action = %action, "Runtime action succeeded");
        Ok(result)
    }

    async fn dispatch(
        &self,
        action: &RuntimeAction,
        topology: &TopologyDescription,
    ) -> std::result::Result<RuntimeResult, CommandError> {
        let service = action.scope.service();

        let sub: Vec<&str> = match (action.kind, service) {
            (ActionKind::Prune, _) => return self.prune(action.include_volumes).await,
            (ActionKind::Build, _) => vec!["build"],
            (ActionKind::Start, _) => vec!["up", "-d", "--remove-orphans"],
            (ActionKind::Stop, _) => vec!["stop"],
            (ActionKind::Remove, None) if action.include_volumes => vec!["down", "--volumes", "--remove-orphans"],
            (ActionKind::Remove, None) => vec!["down", "--remove-orphans"],
            (ActionKind::Remove, Some(_)) if action.include_volumes => vec!["rm", "--stop", "--force", "-v"],
            (ActionKind::Remove, Some(_)) => vec!["rm", "--stop", "--force"],
        };

        let mut args = to_args(&sub);
        if let Some(service) = service {
            args.push(service.to_string());
        }

        let mut result = self.compose_call(args).await?;
        if action.kind == ActionKind::Remove && action.include_volumes && result.success() {
            let images = self.remove_images(topology, service).await?;
            result.absorb(images);
        }
        Ok(result)
    }

    async fn compose_call(&self, sub: Vec<String>) -> std::result::Result<RuntimeResult, CommandError> {
        let compose = self.compose_command().await;

        let mut args = compose.prefix.clone();
        args.extend([
            "-f".to_string(),
            self.manifest.to_string_lossy().into_owned(),
            "-p".to_string(),
            self.project.clone(),
            // relative paths in the manifest (build context) resolve here,
            // not next to the manifest
            "--project-directory".to_string(),
            self.work_dir.to_string_lossy().into_owned(),
        ]);
        args.extend(sub);

        debug!(command = %display_command(&compose.program, &args), "Running compose");
        self.invoker.invoke(&compose.program, &args).await
    }

    async fn compose_command(&self) -> &ComposeCommand {
        self.compose
            .get_or_init(|| async {
                let probe = self
                    .invoker
                    .invoke_quiet(&self.program, &to_args(&["compose", "version"]))
                    .await;

                if probe.map(|r| r.success()).unwrap_or(false) {
                    debug!(program = %self.program, "Using compose plugin");
                    ComposeCommand {
                        program: self.program.clone(),
                        prefix: vec!["compose".to_string()],
                    }
                } else {
                    info!("Compose plugin not available, falling back to {}", STANDALONE_COMPOSE);
                    ComposeCommand {
                        program: STANDALONE_COMPOSE.to_string(),
                        prefix: Vec::new(),
                    }
                }
            })
            .await
    }

    /// Remove the images referenced by the topology (or one service).
    async fn remove_images(
        &self,
        topology: &TopologyDescription,
        service: Option<&str>,
    ) -> std::result::Result<RuntimeResult, CommandError> {
        let mut ids: Vec<String> = Vec::new();

        for image in topology.image_refs(service) {
            let mut args = to_args(&["image", "ls", "--quiet", "--filter"]);
            args.push(format!("reference={}", image));

            let listed = self.invoker.invoke_quiet(&self.program, &args).await?;
            if !listed.success() {
                return Ok(listed);
            }
            for id in listed.stdout.split_whitespace() {
                if !ids.iter().any(|known| known == id) {
                    ids.push(id.to_string());
                }
            }
        }

        if ids.is_empty() {
            debug!("No local images to remove");
            return Ok(RuntimeResult::default());
        }

        info!(count = ids.len(), "Removing images");
        let mut args = to_args(&["image", "rm", "-f"]);
        args.extend(ids);
        self.invoker.invoke(&self.program, &args).await
    }

    async fn prune(&self, include_volumes: bool) -> std::result::Result<RuntimeResult, CommandError> {
        warn!(
            volumes = include_volumes,
            "System prune removes unused resources of every project on this host"
        );

        let mut args = to_args(&["system", "prune", "--all", "--force"]);
        if include_volumes {
            args.push("--volumes".to_string());
        }
        self.invoker.invoke(&self.program, &args).await
    }

    fn record_aborted(&self, action: &RuntimeAction) {
        let mut record = ActionRecord::new(action.clone());
        record.abort();
        self.push(record);
    }

    fn push(&self, record: ActionRecord) {
        if let Ok(mut history) = self.history.lock() {
            history.push(record);
        }
    }
}

fn to_args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
