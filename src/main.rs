//! pvarr - main entry point
//!
//! Wires the host implementations of every collaborator into the wizard and
//! dispatches CLI subcommands. Results are printed to stdout as JSON; logs go
//! to stderr.

use anyhow::{bail, Context};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pvarr::cli::{Cli, Commands, ServiceCommands};
use pvarr::command::{CommandRunner, Elevation, SystemCommandRunner};
use pvarr::compose::ComposeGenerator;
use pvarr::config::{default_config_dir, ConfigStore, JsonConfigStore, SystemConfig};
use pvarr::docker::{ContainerRuntime, DockerCli};
use pvarr::install_state::InstallStatus;
use pvarr::network::HostNetwork;
use pvarr::process_guard;
use pvarr::services::{ComposeOrchestrator, ServiceOrchestrator};
use pvarr::storage::HostStorage;
use pvarr::system_info::{HostInspector, SystemInspector};
use pvarr::wizard::{Collaborators, InstallWizard, InstallationRequest, WizardSettings};

/// Initialize tracing; `RUST_LOG` overrides the default `info` level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Host implementations of every collaborator
struct HostStack {
    config: Arc<JsonConfigStore>,
    runner: Arc<dyn CommandRunner>,
    runtime: Arc<DockerCli>,
    orchestrator: Arc<ComposeOrchestrator>,
    network: Arc<HostNetwork>,
    collaborators: Collaborators,
}

impl HostStack {
    fn new(config_dir: PathBuf, dry_run: bool) -> Self {
        let runner: Arc<dyn CommandRunner> = if dry_run {
            Arc::new(SystemCommandRunner::dry_run())
        } else {
            Arc::new(SystemCommandRunner::new())
        };
        let elevation = Elevation::detect(runner.as_ref());
        debug!("privilege mode: {}", elevation);

        let config = Arc::new(JsonConfigStore::new(config_dir));
        let compose = Arc::new(ComposeGenerator::new(config.clone()));
        let runtime = Arc::new(DockerCli::new(runner.clone()));
        let orchestrator = Arc::new(ComposeOrchestrator::new(
            config.clone(),
            compose.clone(),
            runtime.clone(),
            runner.clone(),
        ));
        let network = Arc::new(HostNetwork::new(runner.clone(), elevation));

        let collaborators = Collaborators {
            config: config.clone(),
            inspector: Arc::new(HostInspector::new(runner.clone())),
            storage: Arc::new(HostStorage::new(runner.clone(), elevation)),
            network: network.clone(),
            compose,
            orchestrator: orchestrator.clone(),
            runner: runner.clone(),
        };

        Self {
            config,
            runner,
            runtime,
            orchestrator,
            network,
            collaborators,
        }
    }

    fn wizard(&self) -> InstallWizard {
        InstallWizard::new(self.collaborators.clone(), WizardSettings::default())
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn load_request(path: &Path) -> anyhow::Result<InstallationRequest> {
    let value = read_json(path)?;
    serde_json::from_value(value).with_context(|| format!("{} is not an installation request", path.display()))
}

/// Parse a request and check the basic settings it would produce
fn validate_request(path: &Path, config: &dyn ConfigStore) -> anyhow::Result<()> {
    let request = load_request(path)?;
    let (merged, missing) = config.default_system_config().merged_with(&request.user_config)?;
    if !missing.is_empty() {
        bail!("missing required configuration fields: {}", missing.join(", "));
    }
    SystemConfig::from_document(merged).context("user_config has invalid field types")?;
    for mount in request.storage_config.mount_points.iter().flatten() {
        if mount.target().is_none() {
            warn!("mount point without device or path will be skipped");
        }
    }
    Ok(())
}

fn run_services(stack: &HostStack, action: ServiceCommands) -> anyhow::Result<bool> {
    let ok = match action {
        ServiceCommands::Start => report_stack(stack.orchestrator.start()?)?,
        ServiceCommands::Stop => report_stack(stack.orchestrator.stop()?)?,
        ServiceCommands::Restart => report_stack(stack.orchestrator.restart()?)?,
        ServiceCommands::Status => {
            print_json(&stack.orchestrator.service_info()?)?;
            true
        }
        ServiceCommands::Update => {
            let details = stack.orchestrator.update()?;
            print_json(&details)?;
            details.iter().all(|d| d.status != pvarr::outcome::Status::Error)
        }
        ServiceCommands::Logs { name, lines } => {
            print!("{}", stack.runtime.logs(&name, lines)?);
            true
        }
    };
    Ok(ok)
}

fn report_stack(result: pvarr::services::StackResult) -> anyhow::Result<bool> {
    print_json(&result)?;
    Ok(result.is_success())
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    info!("config directory: {}", config_dir.display());
    let stack = HostStack::new(config_dir, cli.dry_run);

    match cli.command {
        Commands::Check => {
            let result = stack.wizard().check_system_compatibility()?;
            print_json(&result)?;
            Ok(!result.is_error())
        }
        Commands::Install { config } => {
            info!("Running installation with request: {}", config.display());
            let request = load_request(&config)?;
            let snapshot = stack.wizard().run_installation(&request)?;
            print_json(&snapshot)?;
            Ok(snapshot.status == InstallStatus::Completed)
        }
        Commands::Stage { stage, input } => {
            let input = match input {
                Some(path) => read_json(&path)?,
                None => Value::Null,
            };
            info!("Running stage {}", stage);
            let result = stack.wizard().run_stage(stage, input)?;
            print_json(&result)?;
            Ok(result["status"] != "error")
        }
        Commands::Validate { config } => match validate_request(&config, stack.config.as_ref()) {
            Ok(()) => {
                info!("Request validation successful");
                println!("✓ Installation request is valid: {}", config.display());
                Ok(true)
            }
            Err(e) => {
                error!("Request validation failed: {:#}", e);
                eprintln!("✗ Installation request is invalid: {:#}", e);
                Ok(false)
            }
        },
        Commands::Services { action } => run_services(&stack, action),
        Commands::Info => {
            let inspector = HostInspector::new(stack.runner.clone());
            print_json(&json!({
                "system": inspector.snapshot()?,
                "tailscale": stack.network.tailscale_status()?,
            }))?;
            Ok(true)
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("pvarr starting up");

    // Children run in their own process groups; forward termination to them
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let cli = Cli::parse_args();
    if !run(cli)? {
        std::process::exit(1);
    }
    Ok(())
}
