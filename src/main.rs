//! Website Stack - 网站容器栈引导工具
//!
//! Usage:
//! - Install Docker + compose: `website-stack install`
//! - Deploy the stack: `website-stack deploy`
//! - Stop / remove the stack: `website-stack cleanup [-s|-c|-a|-p]`
//! - Regenerate the manifest only: `website-stack render [--json]`

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use website_stack::config::env::constants::OS_RELEASE_PATH;
use website_stack::domain::runtime::CleanupMode;
use website_stack::infra::SystemInvoker;
use website_stack::services::install::{self, HostInfo};
use website_stack::services::{deploy, RuntimeInvoker};
use website_stack::{BootstrapConfig, BootstrapError};

#[derive(Debug, Parser)]
#[command(name = "website-stack", version, about = "Bootstrap, deploy and clean up the website container stack")]
struct Cli {
    /// Deployment directory (Dockerfile and generated files)
    #[arg(long, global = true, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Environment file, relative to the deployment directory
    #[arg(long, global = true, value_name = "FILE")]
    env_file: Option<PathBuf>,

    /// Generated compose manifest, relative to the deployment directory
    #[arg(long, global = true, value_name = "FILE")]
    compose_file: Option<PathBuf>,

    /// Compose project name
    #[arg(long, global = true, value_name = "NAME")]
    project: Option<String>,

    /// Do not echo runtime output
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install the Docker engine and compose plugin for this host
    Install,
    /// Create the environment file if needed, regenerate the manifest, build and start
    Deploy,
    /// Stop or remove the stack
    Cleanup(CleanupArgs),
    /// Regenerate the manifest without touching the runtime
    Render {
        /// Print the composed topology as JSON (secrets masked)
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
#[group(multiple = false)]
struct CleanupArgs {
    /// Stop containers, keep everything
    #[arg(short, long)]
    stop: bool,
    /// Remove containers and networks, keep volumes (default)
    #[arg(short, long)]
    clean: bool,
    /// Also remove named volumes and images (data loss)
    #[arg(short, long)]
    all: bool,
    /// Clean, then prune unused resources of every project on this host
    #[arg(short, long)]
    prune: bool,
}

impl CleanupArgs {
    fn mode(&self) -> CleanupMode {
        if self.stop {
            CleanupMode::Stop
        } else if self.all {
            CleanupMode::All
        } else if self.prune {
            CleanupMode::Prune
        } else {
            CleanupMode::Clean
        }
    }
}

impl Cli {
    /// 环境变量为底，命令行参数覆盖
    fn config(&self) -> BootstrapConfig {
        let mut config = BootstrapConfig::from_env();
        if let Some(dir) = &self.dir {
            config = config.with_work_dir(dir);
        }
        if let Some(path) = &self.env_file {
            config = config.with_env_file(path);
        }
        if let Some(path) = &self.compose_file {
            config = config.with_manifest_file(path);
        }
        if let Some(project) = &self.project {
            config = config.with_project_name(project);
        }
        if self.quiet {
            config.echo_output = false;
        }
        config
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let code = match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn execute(cli: Cli) -> anyhow::Result<i32> {
    init_tracing()?;

    let config = cli.config();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    let code = runtime.block_on(async {
        match run(cli.command, &config).await {
            Ok(()) => 0,
            Err(e) => {
                report(&e, config.echo_output);
                e.exit_code()
            }
        }
    });
    Ok(code)
}

/// Logs go to stderr; stdout is reserved for operator output.
fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("website_stack=info"))
        .context("Failed to parse log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

async fn run(command: Command, config: &BootstrapConfig) -> website_stack::Result<()> {
    match command {
        Command::Install => {
            let invoker = SystemInvoker::new().with_echo(config.echo_output);
            let host = HostInfo::detect(&invoker, Path::new(OS_RELEASE_PATH)).await;
            let report = install::install(&invoker, &host).await?;

            println!();
            println!("Container runtime installed ({})", report.platform);
            for version in &report.versions {
                println!("  {}", version);
            }
            Ok(())
        }
        Command::Deploy => {
            let runtime = system_runtime(config);
            let result = deploy::deploy(config, &runtime).await;
            print_summary(&runtime);
            let summary = result?;

            if summary.env_created {
                println!("Created {} with default values; review it before exposing the stack.", config.env_file.display());
            }
            println!();
            println!("Stack `{}` is up:", summary.project);
            for endpoint in &summary.endpoints {
                println!("  {:<18} {}", endpoint.name, endpoint.address);
            }
            Ok(())
        }
        Command::Cleanup(args) => {
            let mode = args.mode();
            let prepared = deploy::prepare_for_cleanup(config).await?;

            match mode {
                CleanupMode::All => println!("Removing containers, named volumes and images of `{}`.", config.project_name),
                CleanupMode::Prune => println!("Pruning unused resources of every project on this host."),
                _ => {}
            }

            let runtime = system_runtime(config);
            let result = runtime.cleanup(mode, &prepared.topology).await;
            print_summary(&runtime);
            result?;

            println!("Cleanup ({}) complete.", mode.as_str());
            Ok(())
        }
        Command::Render { json } => {
            let prepared = deploy::prepare(config, false).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&prepared.topology.redacted())?);
            } else {
                println!("{}", prepared.manifest_path.display());
            }
            Ok(())
        }
    }
}

fn system_runtime(config: &BootstrapConfig) -> RuntimeInvoker<SystemInvoker> {
    let invoker = SystemInvoker::new()
        .with_work_dir(&config.work_dir)
        .with_echo(config.echo_output);
    RuntimeInvoker::new(invoker, config)
}

fn print_summary(runtime: &RuntimeInvoker<SystemInvoker>) {
    let lines = runtime.summary_lines();
    if lines.is_empty() {
        return;
    }
    println!();
    println!("=== Action Summary ===");
    for line in lines {
        println!("{}", line);
    }
}

fn report(error: &BootstrapError, echoed: bool) {
    eprintln!("Error: {}", error);
    if let Some(diagnostics) = diagnostics_to_print(error, echoed) {
        eprintln!("{}", diagnostics);
    }
}

/// Upstream stderr that the operator has not already seen streamed.
fn diagnostics_to_print(error: &BootstrapError, echoed: bool) -> Option<&str> {
    if echoed {
        None
    } else {
        error.diagnostics()
    }
}
