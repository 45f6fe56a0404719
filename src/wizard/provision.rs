//! Stages 6 and 7: host packages and the Docker engine.

use super::packages::PlannedCommand;
use super::{Distro, InstallWizard, StageResult};
use crate::command::{run_args, Elevation};
use crate::error::{PvarrError, Result};
use crate::install_state::Stage;
use serde::Serialize;
use std::fs;
use std::os::unix::fs::PermissionsExt;

/// A privileged command the dependency stage ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRecord {
    pub command: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyReport {
    pub distro: Option<Distro>,
    pub commands: Vec<CommandRecord>,
}

impl InstallWizard {
    /// Run one planned command. Failures are logged, never returned.
    fn run_planned(&self, elevation: Elevation, planned: &PlannedCommand) -> Result<CommandRecord> {
        let (program, args) = elevation.wrap(&planned.argv);
        let command = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.status.add_log(format!("Running: {}", command));

        let out = self.deps.runner.run(&program, &args)?;
        if out.success {
            self.status
                .add_log(format!("{} successful", planned.description));
        } else {
            self.status.add_error(format!(
                "{} failed: exit status {}",
                planned.description,
                out.exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            ));
            if !out.stderr.trim().is_empty() {
                self.status
                    .add_error(format!("Error output: {}", out.stderr.trim()));
            }
        }
        Ok(CommandRecord {
            command,
            success: out.success,
        })
    }

    pub(super) fn dependency_stage(&self) -> StageResult<DependencyReport> {
        let stage = Stage::DependencyInstall;
        self.status.update_progress(stage, 10);
        self.status.add_log("Installing dependencies");

        self.guarded("dependency installation", || {
            let elevation = self.elevation();
            if !elevation.can_elevate() {
                self.status.add_warning(
                    "Not running as root and no sudo privileges. Some dependency installations may fail.",
                );
            }

            self.status.update_progress(stage, 30);
            let distro = Distro::detect(&self.settings.system_root);
            if distro.is_none() {
                self.status.add_log(
                    "Unable to determine Linux distribution. Skipping system package installation.",
                );
            }

            self.status.update_progress(stage, 50);
            let mut commands = Vec::new();
            if let Some(distro) = distro {
                self.status.add_log(format!(
                    "Installing system packages: {}",
                    distro.container_packages().join(", ")
                ));
                for planned in distro.system_plan() {
                    commands.push(self.run_planned(elevation, &planned)?);
                }
            }

            self.status.update_progress(stage, 80);
            if let Some(distro) = distro {
                self.status.add_log(format!(
                    "Installing storage helpers: {}",
                    distro.helper_packages().join(", ")
                ));
                commands.push(self.run_planned(elevation, &distro.helper_plan())?);
            }

            self.status.update_progress(stage, 100);
            self.status.add_log("Dependency installation completed");
            Ok(StageResult::success(
                "Dependency installation completed",
                DependencyReport { distro, commands },
            ))
        })
    }

    pub(super) fn docker_stage(&self) -> StageResult<()> {
        let stage = Stage::DockerSetup;
        self.status.update_progress(stage, 10);
        self.status.add_log("Setting up Docker");

        self.guarded("Docker setup", || {
            let elevation = self.elevation();

            if self.deps.inspector.docker_installed() {
                self.status.add_log("Docker is already installed");
            } else {
                self.status.add_log("Docker not installed. Installing Docker...");
                self.status.update_progress(stage, 30);
                if let Err(e) = self.install_docker(elevation) {
                    let message = match e {
                        PvarrError::Docker(reason) if reason == INSUFFICIENT_PERMISSIONS => reason,
                        other => format!("Failed to install Docker: {}", other),
                    };
                    self.status.add_error(&message);
                    return Ok(StageResult::error(message));
                }
            }

            self.status.update_progress(stage, 60);
            self.status.add_log("Configuring Docker for current user");
            if let Some(degraded) = self.configure_docker_group(elevation) {
                return Ok(degraded);
            }

            self.status.update_progress(stage, 90);
            if let Some(degraded) = self.ensure_docker_running(elevation) {
                return Ok(degraded);
            }

            self.status.update_progress(stage, 100);
            self.status.add_log("Docker setup completed");
            Ok(StageResult::success("Docker setup completed successfully", ()))
        })
    }

    /// Download and run the upstream convenience script
    fn install_docker(&self, elevation: Elevation) -> Result<()> {
        let script = self.settings.docker_script_path.to_string_lossy().into_owned();
        let runner = self.deps.runner.as_ref();

        run_args(
            runner,
            "curl",
            &[
                "-fsSL",
                self.settings.docker_install_url.as_str(),
                "-o",
                script.as_str(),
            ],
        )?
        .ensure_success("curl")?;
        self.status.add_log("Docker installation script downloaded");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;

        if !elevation.can_elevate() {
            return Err(PvarrError::docker(INSUFFICIENT_PERMISSIONS));
        }

        self.status.add_log("Running Docker installation script");
        let (program, args) = elevation.wrap(&["sh", script.as_str()]);
        self.deps.runner.run(&program, &args)?.ensure_success("sh")?;

        if self.settings.docker_script_path.exists() {
            fs::remove_file(&self.settings.docker_script_path)?;
        }
        self.status.add_log("Docker installed successfully");
        Ok(())
    }

    fn docker_group_exists(&self) -> bool {
        fs::read_to_string(self.settings.system_root.join("etc/group"))
            .map(|groups| groups.lines().any(|line| line.starts_with("docker:")))
            .unwrap_or(false)
    }

    fn user_in_docker_group(&self, user: &str) -> bool {
        run_args(self.deps.runner.as_ref(), "groups", &[user])
            .map(|out| out.success && out.stdout.contains("docker"))
            .unwrap_or(false)
    }

    /// Returns a warning result when the user could not be added
    fn configure_docker_group(&self, elevation: Elevation) -> Option<StageResult<()>> {
        let user = self.settings.current_user.as_deref().filter(|u| !u.is_empty())?;
        if !self.docker_group_exists() || self.user_in_docker_group(user) {
            return None;
        }

        self.status
            .add_log(format!("Adding user {} to the docker group", user));
        if !elevation.can_elevate() {
            self.status.add_warning(
                "Unable to add user to docker group. You may need to run Docker commands with sudo.",
            );
            return Some(StageResult::warning(
                "Docker installed but user not added to docker group",
                (),
            ));
        }

        let (program, args) = elevation.wrap(&["usermod", "-aG", "docker", user]);
        let added = self
            .deps
            .runner
            .run(&program, &args)
            .and_then(|out| out.ensure_success("usermod"));
        if let Err(e) = added {
            self.status
                .add_warning(format!("Failed to add user to docker group: {}", e));
            return Some(StageResult::warning(
                format!("Docker installed but failed to add user to docker group: {}", e),
                (),
            ));
        }

        self.status
            .add_log(format!("User {} added to docker group", user));
        self.status
            .add_log("NOTE: You may need to log out and back in for this change to take effect");
        None
    }

    /// Returns a warning result when the service is down and cannot be started
    fn ensure_docker_running(&self, elevation: Elevation) -> Option<StageResult<()>> {
        let (program, args) = elevation.wrap(&["systemctl", "is-active", "docker"]);
        let active = match self.deps.runner.run(&program, &args) {
            Ok(out) => out.stdout.trim() == "active",
            Err(e) => {
                self.status
                    .add_warning(format!("Error checking/starting Docker service: {}", e));
                return None;
            }
        };
        if active {
            return None;
        }

        self.status
            .add_log("Docker service is not active. Starting Docker service...");
        if !elevation.can_elevate() {
            self.status
                .add_warning("Unable to start Docker service. Please start it manually.");
            return Some(StageResult::warning("Docker installed but service not started", ()));
        }

        let (program, args) = elevation.wrap(&["systemctl", "start", "docker"]);
        match self
            .deps
            .runner
            .run(&program, &args)
            .and_then(|out| out.ensure_success("systemctl start docker"))
        {
            Ok(()) => self.status.add_log("Docker service started"),
            Err(e) => self
                .status
                .add_warning(format!("Error checking/starting Docker service: {}", e)),
        }
        None
    }
}

const INSUFFICIENT_PERMISSIONS: &str = "Insufficient permissions to install Docker";
