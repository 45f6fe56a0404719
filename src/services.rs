//! Service orchestrator
//!
//! Applies the generated compose files and drives the whole stack with
//! `docker compose` (or the standalone `docker-compose`), and joins the
//! service selection with live container state.

use crate::catalog;
use crate::command::{run_args, CommandRunner};
use crate::compose::{ComposeBackend, ComposeGenerator};
use crate::config::{ConfigStore, InstallPhase, ServiceCategory};
use crate::docker::{ContainerInfo, ContainerRuntime, PortMapping};
use crate::error::Result;
use crate::outcome::Status;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{info, warn};

/// Outcome of a stack-wide compose command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResult {
    pub status: Status,
    pub message: String,
    pub output: String,
}

impl StackResult {
    pub fn success(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            output: output.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Selection state joined with container state for one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub enabled: bool,
    pub description: String,
    pub default_port: Option<u16>,
    pub docker_image: Option<String>,
    /// Container state, or `not_installed`
    pub status: String,
    pub url: Option<String>,
    pub ports: Vec<PortMapping>,
}

pub type ServiceCatalogView = BTreeMap<ServiceCategory, BTreeMap<String, ServiceInfo>>;

/// Stack-wide operations the wizard depends on.
pub trait ServiceOrchestrator: Send + Sync {
    fn start(&self) -> Result<StackResult>;
    fn stop(&self) -> Result<StackResult>;
    fn restart(&self) -> Result<StackResult>;
    fn container_status(&self) -> Result<BTreeMap<String, ContainerInfo>>;
    fn service_info(&self) -> Result<ServiceCatalogView>;
}

/// Per-container result of an image update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDetail {
    pub container: String,
    pub status: Status,
    pub message: String,
}

/// Orchestrates the stack through compose files under the config dir
pub struct ComposeOrchestrator {
    config: Arc<dyn ConfigStore>,
    compose: Arc<dyn ComposeBackend>,
    runtime: Arc<dyn ContainerRuntime>,
    runner: Arc<dyn CommandRunner>,
}

impl ComposeOrchestrator {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        compose: Arc<dyn ComposeBackend>,
        runtime: Arc<dyn ContainerRuntime>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            config,
            compose,
            runtime,
            runner,
        }
    }

    fn compose_file(&self) -> PathBuf {
        ComposeGenerator::compose_path(self.config.config_dir())
    }

    /// `docker compose` when the plugin works, else `docker-compose`, else the plugin form
    fn compose_command(&self) -> (String, Vec<String>) {
        let plugin = || ("docker".to_string(), vec!["compose".to_string()]);
        if run_args(self.runner.as_ref(), "docker", &["compose", "version"]).is_ok_and(|o| o.success) {
            return plugin();
        }
        if run_args(self.runner.as_ref(), "docker-compose", &["--version"]).is_ok_and(|o| o.success) {
            return ("docker-compose".to_string(), Vec::new());
        }
        plugin()
    }

    fn run_compose(&self, action: &[&str], file: &std::path::Path) -> Result<crate::command::CommandOutput> {
        let (program, mut args) = self.compose_command();
        args.push("-f".to_string());
        args.push(file.to_string_lossy().into_owned());
        let env = ComposeGenerator::env_path(self.config.config_dir());
        if env.exists() {
            args.push("--env-file".to_string());
            args.push(env.to_string_lossy().into_owned());
        }
        args.extend(action.iter().map(|a| (*a).to_string()));
        self.runner.run(&program, &args)
    }

    /// Compose file path, generating the files first when missing
    fn ensure_compose_file(&self) -> Result<std::result::Result<PathBuf, StackResult>> {
        let file = self.compose_file();
        if file.exists() {
            return Ok(Ok(file));
        }
        info!("No compose file yet, generating one");
        match self.compose.apply() {
            Ok(artifacts) => Ok(Ok(artifacts.docker_compose_path)),
            Err(e) => Ok(Err(StackResult::error(
                format!("Error applying service changes: {}", e),
                "",
            ))),
        }
    }

    fn set_phase(&self, phase: InstallPhase) -> Result<()> {
        let mut system = self.config.system_config()?;
        system.installation_status = phase;
        self.config.save_system_config(&system)
    }

    /// Pull the image of every container and restart the running ones
    pub fn update(&self) -> Result<Vec<UpdateDetail>> {
        let mut details = Vec::new();
        for (name, container) in self.runtime.list()? {
            let pulled = self.runtime.pull(&container.image)?;
            let detail = if !pulled.is_success() {
                UpdateDetail {
                    container: name,
                    status: Status::Error,
                    message: pulled.message,
                }
            } else if container.is_running() {
                let restarted = self.runtime.restart(&name)?;
                UpdateDetail {
                    container: name,
                    status: restarted.status,
                    message: "Image pulled and container restarted".to_string(),
                }
            } else {
                UpdateDetail {
                    container: name,
                    status: Status::Success,
                    message: "Image pulled, container not running".to_string(),
                }
            };
            details.push(detail);
        }
        Ok(details)
    }
}

impl ServiceOrchestrator for ComposeOrchestrator {
    fn start(&self) -> Result<StackResult> {
        let file = match self.ensure_compose_file()? {
            Ok(file) => file,
            Err(failed) => return Ok(failed),
        };
        let out = self.run_compose(&["up", "-d"], &file)?;
        if !out.success {
            return Ok(StackResult::error(
                format!("Error starting services: {}", out.stderr.trim()),
                out.stderr,
            ));
        }
        self.set_phase(InstallPhase::Running)?;
        Ok(StackResult::success("Services started successfully", out.stdout))
    }

    fn stop(&self) -> Result<StackResult> {
        let file = self.compose_file();
        if !file.exists() {
            return Ok(StackResult::error("Docker Compose file not found", ""));
        }
        let out = self.run_compose(&["down"], &file)?;
        if !out.success {
            return Ok(StackResult::error(
                format!("Error stopping services: {}", out.stderr.trim()),
                out.stderr,
            ));
        }
        self.set_phase(InstallPhase::Configured)?;
        Ok(StackResult::success("Services stopped successfully", out.stdout))
    }

    fn restart(&self) -> Result<StackResult> {
        let file = match self.ensure_compose_file()? {
            Ok(file) => file,
            Err(failed) => return Ok(failed),
        };
        let out = self.run_compose(&["restart"], &file)?;
        if !out.success {
            return Ok(StackResult::error(
                format!("Error restarting services: {}", out.stderr.trim()),
                out.stderr,
            ));
        }
        Ok(StackResult::success("Services restarted successfully", out.stdout))
    }

    fn container_status(&self) -> Result<BTreeMap<String, ContainerInfo>> {
        self.runtime.list()
    }

    fn service_info(&self) -> Result<ServiceCatalogView> {
        let services = self.config.services_config()?;
        let containers = match self.runtime.list() {
            Ok(containers) => containers,
            Err(e) => {
                warn!("Container status unavailable: {}", e);
                BTreeMap::new()
            }
        };

        let mut view = ServiceCatalogView::new();
        for category in ServiceCategory::iter() {
            let entries = services
                .category(category)
                .iter()
                .map(|(name, enabled)| {
                    let spec = catalog::lookup(name);
                    let container = containers.get(name);
                    let info = ServiceInfo {
                        name: name.clone(),
                        enabled: *enabled,
                        description: spec
                            .map(|s| s.description)
                            .unwrap_or("Unknown service")
                            .to_string(),
                        default_port: spec.and_then(|s| s.port),
                        docker_image: spec.map(|s| s.image.to_string()),
                        status: container
                            .map(|c| c.status.clone())
                            .unwrap_or_else(|| "not_installed".to_string()),
                        url: container.and_then(|c| c.url.clone()),
                        ports: container.map(|c| c.ports.clone()).unwrap_or_default(),
                    };
                    (name.clone(), info)
                })
                .collect();
            view.insert(category, entries);
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::config::JsonConfigStore;
    use crate::docker::DockerCli;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// `docker compose` is available and every command succeeds
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<String>>,
        fail_up: bool,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
            let line = format!("{} {}", program, args.join(" "));
            self.calls.lock().unwrap().push(line.clone());
            if self.fail_up && line.contains(" up -d") {
                return Ok(CommandOutput::failed("pull access denied"));
            }
            if program == "docker" && args.first().map(String::as_str) == Some("ps") {
                return Ok(CommandOutput::ok(
                    r#"{"Names":"sonarr","State":"running","Image":"linuxserver/sonarr:latest","Ports":"0.0.0.0:8989->8989/tcp"}"#,
                ));
            }
            Ok(CommandOutput::ok("done"))
        }
    }

    fn orchestrator(dir: &TempDir, runner: Arc<RecordingRunner>) -> (ComposeOrchestrator, Arc<JsonConfigStore>) {
        let store = Arc::new(JsonConfigStore::new(dir.path()));
        let compose = Arc::new(ComposeGenerator::new(store.clone()).with_dev_root(dir.path().join("dev")));
        let runtime = Arc::new(DockerCli::new(runner.clone()));
        (ComposeOrchestrator::new(store.clone(), compose, runtime, runner), store)
    }

    #[test]
    fn test_start_generates_missing_files_and_marks_running() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let (orch, store) = orchestrator(&dir, runner.clone());

        let result = orch.start().unwrap();
        assert!(result.is_success(), "{}", result.message);
        assert!(ComposeGenerator::compose_path(dir.path()).exists());
        assert_eq!(store.system_config().unwrap().installation_status, InstallPhase::Running);

        let calls = runner.calls.lock().unwrap();
        let up = calls.iter().find(|c| c.contains("up -d")).unwrap();
        assert!(up.starts_with("docker compose -f "));
        assert!(up.contains("--env-file"));
    }

    #[test]
    fn test_start_failure_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner {
            fail_up: true,
            ..RecordingRunner::default()
        });
        let (orch, store) = orchestrator(&dir, runner);
        let result = orch.start().unwrap();
        assert_eq!(result.status, Status::Error);
        assert!(result.message.contains("pull access denied"));
        assert_eq!(store.system_config().unwrap().installation_status, InstallPhase::Configured);
    }

    #[test]
    fn test_stop_requires_compose_file() {
        let dir = TempDir::new().unwrap();
        let (orch, _) = orchestrator(&dir, Arc::new(RecordingRunner::default()));
        let result = orch.stop().unwrap();
        assert_eq!(result.message, "Docker Compose file not found");
    }

    #[test]
    fn test_stop_marks_configured() {
        let dir = TempDir::new().unwrap();
        let (orch, store) = orchestrator(&dir, Arc::new(RecordingRunner::default()));
        orch.start().unwrap();
        assert!(orch.stop().unwrap().is_success());
        assert_eq!(store.system_config().unwrap().installation_status, InstallPhase::Configured);
    }

    #[test]
    fn test_service_info_joins_selection_and_containers() {
        let dir = TempDir::new().unwrap();
        let (orch, _) = orchestrator(&dir, Arc::new(RecordingRunner::default()));
        let view = orch.service_info().unwrap();

        let sonarr = &view[&ServiceCategory::ArrApps]["sonarr"];
        assert!(sonarr.enabled);
        assert_eq!(sonarr.status, "running");
        assert_eq!(sonarr.url.as_deref(), Some("http://localhost:8989"));

        let lidarr = &view[&ServiceCategory::ArrApps]["lidarr"];
        assert_eq!(lidarr.status, "not_installed");
        assert_eq!(lidarr.default_port, Some(8686));
    }

    #[test]
    fn test_update_restarts_running_containers() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let (orch, _) = orchestrator(&dir, runner.clone());
        let details = orch.update().unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].message, "Image pulled and container restarted");
        let calls = runner.calls.lock().unwrap();
        assert!(calls.contains(&"docker pull linuxserver/sonarr:latest".to_string()));
        assert!(calls.contains(&"docker restart sonarr".to_string()));
    }
}
