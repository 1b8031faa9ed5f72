//! Container runtime installation
//!
//! Host detection picks one entry from a strategy table; each entry knows how
//! to install the Docker engine with its compose plugin and how to verify it.
//! Adding a platform means adding a table entry.

use std::path::Path;
use tracing::{debug, info};

use crate::domain::env_file::EnvironmentFile;
use crate::error::{BootstrapError, Result};
use crate::infra::command::{display_command, CommandInvoker};

const ENGINE_PACKAGES: [&str; 5] = [
    "docker-ce",
    "docker-ce-cli",
    "containerd.io",
    "docker-buildx-plugin",
    "docker-compose-plugin",
];

/// What we know about the machine we are installing on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostInfo {
    /// `std::env::consts::OS`
    pub os: String,
    /// os-release `ID`
    pub id: String,
    /// os-release `ID_LIKE`
    pub id_like: Vec<String>,
    pub version_codename: Option<String>,
    pub pretty_name: Option<String>,
    pub is_root: bool,
    pub has_sudo: bool,
}

impl HostInfo {
    /// Parse an os-release document. Privilege fields start out false.
    pub fn from_os_release(os: &str, content: &str) -> Self {
        let release = EnvironmentFile::parse(content);
        let field = |key: &str| {
            release
                .get(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            os: os.to_string(),
            id: field("ID").map(|v| v.to_lowercase()).unwrap_or_default(),
            id_like: field("ID_LIKE")
                .map(|v| v.split_whitespace().map(str::to_lowercase).collect())
                .unwrap_or_default(),
            version_codename: field("VERSION_CODENAME"),
            pretty_name: field("PRETTY_NAME"),
            is_root: false,
            has_sudo: false,
        }
    }

    /// Inspect the running host.
    pub async fn detect<I: CommandInvoker>(invoker: &I, os_release: &Path) -> Self {
        let content = tokio::fs::read_to_string(os_release).await.unwrap_or_else(|e| {
            debug!(path = %os_release.display(), error = %e, "No os-release file");
            String::new()
        });
        let mut host = Self::from_os_release(std::env::consts::OS, &content);

        host.is_root = match invoker.invoke_quiet("id", &["-u".to_string()]).await {
            Ok(result) => result.success() && result.stdout.trim() == "0",
            Err(_) => false,
        };
        host.has_sudo = invoker
            .invoke_quiet("sudo", &["--version".to_string()])
            .await
            .map(|r| r.success())
            .unwrap_or(false);

        debug!(
            os = %host.os,
            id = %host.id,
            root = host.is_root,
            sudo = host.has_sudo,
            "Detected host"
        );
        host
    }

    /// `ID` or any `ID_LIKE` entry equals `family`.
    pub fn is_like(&self, family: &str) -> bool {
        self.id == family || self.id_like.iter().any(|f| f == family)
    }

    fn describe(&self) -> String {
        match &self.pretty_name {
            Some(name) => format!("{} ({})", name, self.os),
            None if !self.id.is_empty() => format!("{} ({})", self.id, self.os),
            None => self.os.clone(),
        }
    }
}

/// One command of an install or verify sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallStep {
    pub description: String,
    pub program: String,
    pub args: Vec<String>,
    /// Needs root; prefixed with `sudo` for non-root users.
    pub privileged: bool,
}

impl InstallStep {
    fn root(description: &str, program: &str, args: &[&str]) -> Self {
        Self {
            description: description.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            privileged: true,
        }
    }

    fn user(description: &str, program: &str, args: &[&str]) -> Self {
        Self {
            privileged: false,
            ..Self::root(description, program, args)
        }
    }

    /// Program and arguments as they will actually be run on `host`.
    pub fn command_for(&self, host: &HostInfo) -> (String, Vec<String>) {
        if self.privileged && !host.is_root {
            let mut args = vec![self.program.clone()];
            args.extend(self.args.iter().cloned());
            ("sudo".to_string(), args)
        } else {
            (self.program.clone(), self.args.clone())
        }
    }
}

/// A table entry: how to recognise a platform, install and verify Docker on it.
pub struct PlatformStrategy {
    pub name: &'static str,
    matches: fn(&HostInfo) -> bool,
    install: fn(&HostInfo) -> Vec<InstallStep>,
    verify: fn(&HostInfo) -> Vec<InstallStep>,
}

impl PlatformStrategy {
    pub fn install_steps(&self, host: &HostInfo) -> Vec<InstallStep> {
        (self.install)(host)
    }

    pub fn verify_steps(&self, host: &HostInfo) -> Vec<InstallStep> {
        (self.verify)(host)
    }
}

/// Checked in order; the first match wins. RHEL derivatives list `fedora`
/// in `ID_LIKE`, so they come before Fedora.
pub static STRATEGIES: &[PlatformStrategy] = &[
    PlatformStrategy {
        name: "debian",
        matches: is_debian_family,
        install: debian_steps,
        verify: plugin_verify,
    },
    PlatformStrategy {
        name: "rhel",
        matches: is_rhel_family,
        install: rhel_steps,
        verify: plugin_verify,
    },
    PlatformStrategy {
        name: "fedora",
        matches: is_fedora,
        install: fedora_steps,
        verify: plugin_verify,
    },
    PlatformStrategy {
        name: "arch",
        matches: is_arch_family,
        install: arch_steps,
        verify: standalone_verify,
    },
    PlatformStrategy {
        name: "macos",
        matches: is_macos,
        install: macos_steps,
        verify: plugin_verify,
    },
];

/// Look up the strategy for `host`.
pub fn select(host: &HostInfo) -> Result<&'static PlatformStrategy> {
    STRATEGIES
        .iter()
        .find(|s| (s.matches)(host))
        .ok_or_else(|| BootstrapError::UnsupportedPlatform(host.describe()))
}

#[derive(Debug)]
pub struct InstallReport {
    pub platform: &'static str,
    pub steps_run: usize,
    /// Output of the verify steps, trimmed.
    pub versions: Vec<String>,
}

/// Install and verify the container runtime on `host`.
pub async fn install<I: CommandInvoker>(invoker: &I, host: &HostInfo) -> Result<InstallReport> {
    let strategy = select(host)?;
    let install = strategy.install_steps(host);
    let verify = strategy.verify_steps(host);

    let needs_root = install.iter().chain(verify.iter()).any(|s| s.privileged);
    if needs_root && !host.is_root && !host.has_sudo {
        return Err(BootstrapError::PrivilegeEscalationUnavailable);
    }

    info!(platform = strategy.name, host = %host.describe(), steps = install.len(), "Installing container runtime");

    let mut steps_run = 0;
    for step in &install {
        run_step(invoker, host, step).await?;
        steps_run += 1;
    }

    let mut versions = Vec::with_capacity(verify.len());
    for step in &verify {
        let output = run_step(invoker, host, step).await?;
        steps_run += 1;
        versions.push(output.trim().to_string());
    }

    info!(platform = strategy.name, "Container runtime installed");
    Ok(InstallReport {
        platform: strategy.name,
        steps_run,
        versions,
    })
}

async fn run_step<I: CommandInvoker>(invoker: &I, host: &HostInfo, step: &InstallStep) -> Result<String> {
    let (program, args) = step.command_for(host);
    info!(step = %step.description, command = %display_command(&program, &args), "Running install step");

    let result = invoker
        .invoke(&program, &args)
        .await
        .map_err(|e| BootstrapError::InstallStepFailed {
            step: step.description.clone(),
            exit_code: 127,
            stderr: e.to_string(),
        })?;

    if !result.success() {
        return Err(BootstrapError::InstallStepFailed {
            step: step.description.clone(),
            exit_code: result.exit_code,
            stderr: result.stderr,
        });
    }
    Ok(result.stdout)
}

fn is_debian_family(h: &HostInfo) -> bool {
    h.os == "linux" && (h.is_like("debian") || h.is_like("ubuntu"))
}

fn is_rhel_family(h: &HostInfo) -> bool {
    h.os == "linux" && (h.is_like("rhel") || h.is_like("centos"))
}

fn is_fedora(h: &HostInfo) -> bool {
    h.os == "linux" && h.id == "fedora"
}

fn is_arch_family(h: &HostInfo) -> bool {
    h.os == "linux" && h.is_like("arch")
}

fn is_macos(h: &HostInfo) -> bool {
    h.os == "macos"
}

fn enable_service() -> InstallStep {
    InstallStep::root("enable docker service", "systemctl", &["enable", "--now", "docker"])
}

fn debian_steps(host: &HostInfo) -> Vec<InstallStep> {
    let distro = if host.is_like("ubuntu") { "ubuntu" } else { "debian" };
    let codename = host.version_codename.as_deref().unwrap_or("stable");
    let gpg_url = format!("https://download.docker.com/linux/{}/gpg", distro);
    let repo_line = format!(
        "echo \"deb [arch=$(dpkg --print-architecture) signed-by=/etc/apt/keyrings/docker.asc] https://download.docker.com/linux/{} {} stable\" > /etc/apt/sources.list.d/docker.list",
        distro, codename
    );

    let mut packages = vec!["install", "-y"];
    packages.extend(ENGINE_PACKAGES);

    vec![
        InstallStep::root("refresh package index", "apt-get", &["update"]),
        InstallStep::root(
            "install prerequisites",
            "apt-get",
            &["install", "-y", "ca-certificates", "curl", "gnupg"],
        ),
        InstallStep::root("create keyring directory", "install", &["-m", "0755", "-d", "/etc/apt/keyrings"]),
        InstallStep::root(
            "fetch docker signing key",
            "curl",
            &["-fsSL", gpg_url.as_str(), "-o", "/etc/apt/keyrings/docker.asc"],
        ),
        InstallStep::root("add docker apt repository", "sh", &["-c", repo_line.as_str()]),
        InstallStep::root("refresh package index", "apt-get", &["update"]),
        InstallStep::root("install docker engine", "apt-get", &packages),
        enable_service(),
    ]
}

fn rhel_steps(_host: &HostInfo) -> Vec<InstallStep> {
    let mut packages = vec!["install", "-y"];
    packages.extend(ENGINE_PACKAGES);

    vec![
        InstallStep::root("install yum-utils", "yum", &["install", "-y", "yum-utils"]),
        InstallStep::root(
            "add docker yum repository",
            "yum-config-manager",
            &["--add-repo", "https://download.docker.com/linux/centos/docker-ce.repo"],
        ),
        InstallStep::root("install docker engine", "yum", &packages),
        enable_service(),
    ]
}

fn fedora_steps(_host: &HostInfo) -> Vec<InstallStep> {
    let mut packages = vec!["-y", "install"];
    packages.extend(ENGINE_PACKAGES);

    vec![
        InstallStep::root("install dnf plugins", "dnf", &["-y", "install", "dnf-plugins-core"]),
        InstallStep::root(
            "add docker dnf repository",
            "dnf",
            &["config-manager", "--add-repo", "https://download.docker.com/linux/fedora/docker-ce.repo"],
        ),
        InstallStep::root("install docker engine", "dnf", &packages),
        enable_service(),
    ]
}

fn arch_steps(_host: &HostInfo) -> Vec<InstallStep> {
    vec![
        InstallStep::root(
            "install docker and compose",
            "pacman",
            &["-Sy", "--noconfirm", "--needed", "docker", "docker-compose"],
        ),
        enable_service(),
    ]
}

fn macos_steps(_host: &HostInfo) -> Vec<InstallStep> {
    vec![InstallStep::user("install docker desktop", "brew", &["install", "--cask", "docker"])]
}

fn plugin_verify(_host: &HostInfo) -> Vec<InstallStep> {
    vec![
        InstallStep::user("check docker version", "docker", &["--version"]),
        InstallStep::user("check compose plugin", "docker", &["compose", "version"]),
    ]
}

fn standalone_verify(_host: &HostInfo) -> Vec<InstallStep> {
    vec![
        InstallStep::user("check docker version", "docker", &["--version"]),
        InstallStep::user("check docker-compose", "docker-compose", &["version"]),
    ]
}
