//! Stages 8 to 12: compose files, containers, boot guard and wrap-up.

use super::boot::{MountWaitMethod, MountWaitTarget, WAIT_SCRIPT};
use super::{InstallWizard, StageResult};
use crate::compose::ComposeArtifacts;
use crate::config::InstallPhase;
use crate::docker::ContainerInfo;
use crate::install_state::{InstallStatus, Stage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CRITICAL_MOUNTS_FILE: &str = "config/critical-mounts.conf";
pub const WAIT_SCRIPT_FILE: &str = "bin/wait-for-mounts.sh";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerOutput {
    /// Output of the compose `up` command
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStartReport {
    pub total: usize,
    pub running: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostInstallReport {
    /// How the boot-time mount guard was registered, if one was needed
    pub mount_wait: Option<MountWaitMethod>,
}

/// Container counts; `total == running + stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
}

impl ContainerSummary {
    pub fn from_containers(containers: &BTreeMap<String, ContainerInfo>) -> Self {
        let total = containers.len();
        let running = containers.values().filter(|c| c.is_running()).count();
        Self {
            total,
            running,
            stopped: total - running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalSummary {
    pub container_summary: ContainerSummary,
    pub container_urls: BTreeMap<String, String>,
    /// Seconds from run start to finalization; absent outside a full run
    pub installation_time: Option<f64>,
}

fn write_executable(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

impl InstallWizard {
    pub(super) fn compose_stage(&self) -> StageResult<ComposeArtifacts> {
        let stage = Stage::ComposeGeneration;
        self.status.update_progress(stage, 10);
        self.status.add_log("Generating Docker Compose files");

        self.guarded("Docker Compose generation", || {
            let compose = &self.deps.compose;

            self.status.update_progress(stage, 40);
            if let Err(e) = compose.render() {
                return Ok(self.fail(format!("Failed to generate Docker Compose file: {}", e)));
            }
            self.status.add_log("Docker Compose file generated successfully");

            self.status.update_progress(stage, 70);
            if let Err(e) = compose.render_env() {
                return Ok(self.fail(format!("Failed to generate environment file: {}", e)));
            }
            self.status.add_log("Environment file generated successfully");

            self.status.update_progress(stage, 90);
            let artifacts = match compose.apply() {
                Ok(artifacts) => artifacts,
                Err(e) => return Ok(self.fail(format!("Failed to apply service changes: {}", e))),
            };

            self.status.update_progress(stage, 100);
            self.status.add_log("Docker Compose configuration completed");
            Ok(StageResult::success("Docker Compose configuration completed", artifacts))
        })
    }

    pub(super) fn container_stage(&self) -> StageResult<ContainerOutput> {
        let stage = Stage::ContainerCreation;
        self.status.update_progress(stage, 10);
        self.status.add_log("Creating Docker containers");

        self.guarded("container creation", || {
            self.status.update_progress(stage, 50);
            let started = self.deps.orchestrator.start()?;
            if !started.is_success() {
                return Ok(self.fail(format!("Failed to create containers: {}", started.message)));
            }

            self.status.update_progress(stage, 100);
            self.status.add_log("Docker containers created successfully");
            Ok(StageResult::success(
                "Docker containers created successfully",
                ContainerOutput {
                    output: started.output,
                },
            ))
        })
    }

    /// Confirm the started stack is up. Never fails the run.
    pub(super) fn service_start_stage(&self) -> StageResult<ServiceStartReport> {
        let stage = Stage::ServiceStart;
        self.status.update_progress(stage, 10);
        self.status.add_log("Checking service status");

        self.status.update_progress(stage, 50);
        let containers = match self.deps.orchestrator.container_status() {
            Ok(containers) => containers,
            Err(e) => {
                let message = format!("Could not read container status: {}", e);
                self.status.add_warning(&message);
                self.status.update_progress(stage, 100);
                return StageResult::warning(message, ServiceStartReport { total: 0, running: 0 });
            }
        };

        let summary = ContainerSummary::from_containers(&containers);
        let report = ServiceStartReport {
            total: summary.total,
            running: summary.running,
        };
        self.status.update_progress(stage, 100);
        if report.running == 0 {
            let message = "No containers are running";
            self.status.add_warning(message);
            return StageResult::warning(message, report);
        }
        let message = format!("{} of {} containers running", report.running, report.total);
        self.status.add_log(&message);
        StageResult::success(message, report)
    }

    pub(super) fn post_install_stage(&self) -> StageResult<PostInstallReport> {
        let stage = Stage::PostInstall;
        self.status.update_progress(stage, 10);
        self.status.add_log("Performing post-installation tasks");

        self.guarded("post-installation", || {
            self.status.update_progress(stage, 30);
            let mut config = self.load_system_config()?;

            let mount_wait = if config.critical_mounts.is_empty() {
                None
            } else {
                self.status
                    .add_log("Setting up mount point monitoring for critical storage");
                self.provision_mount_wait(&config.critical_mounts)
            };

            self.status.update_progress(stage, 70);
            config.installation_status = InstallPhase::Completed;
            self.deps.config.save_system_config(&config)?;

            self.status.update_progress(stage, 100);
            self.status.add_log("Post-installation tasks completed");
            Ok(StageResult::success(
                "Post-installation tasks completed",
                PostInstallReport { mount_wait },
            ))
        })
    }

    /// Install the mount list, the wait script and a boot hook for it.
    /// Every failure here is a warning.
    fn provision_mount_wait(&self, mounts: &[String]) -> Option<MountWaitMethod> {
        let mounts_file: PathBuf = self.settings.install_root.join(CRITICAL_MOUNTS_FILE);
        let script: PathBuf = self.settings.install_root.join(WAIT_SCRIPT_FILE);

        let staged = mounts_file
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| {
                let listing: String = mounts.iter().map(|m| format!("{}\n", m)).collect();
                fs::write(&mounts_file, listing)
            })
            .and_then(|()| write_executable(&script, WAIT_SCRIPT));
        if let Err(e) = staged {
            self.status
                .add_warning(format!("Could not install mount wait script: {}", e));
            return None;
        }

        let method = MountWaitMethod::select(&self.settings.system_root);
        if method == MountWaitMethod::CronReboot {
            self.status
                .add_warning("systemd not detected, mount wait service not installed");
        }
        let target = MountWaitTarget {
            runner: self.deps.runner.as_ref(),
            elevation: self.elevation(),
            system_root: &self.settings.system_root,
            script: &script,
            mounts_file: &mounts_file,
        };
        let outcome = method.install(&target);
        if outcome.is_success() {
            self.status.add_log(&outcome.message);
        } else {
            self.status.add_warning(&outcome.message);
        }
        debug!("mount wait provisioned via {}", method);
        Some(method)
    }

    pub(super) fn finalize_stage(&self) -> StageResult<FinalSummary> {
        let stage = Stage::Finalization;
        self.status.update_progress(stage, 50);
        self.status.add_log("Finalizing installation");

        self.guarded("finalization", || {
            let containers = self.deps.orchestrator.container_status()?;
            let container_summary = ContainerSummary::from_containers(&containers);
            let container_urls = containers
                .iter()
                .filter_map(|(name, info)| info.url.clone().map(|url| (name.clone(), url)))
                .collect();

            let installation_time = self.status.with(|s| {
                s.set_status(InstallStatus::Completed);
                let end = s.mark_finished();
                s.update_progress(stage, 100);
                s.start_time().map(|start| end - start)
            });
            self.status.add_log("Installation completed successfully");

            Ok(StageResult::success(
                "Installation completed successfully",
                FinalSummary {
                    container_summary,
                    container_urls,
                    installation_time,
                },
            ))
        })
    }

    /// Record `message` as an error and return it as the stage result
    fn fail<T>(&self, message: String) -> StageResult<T> {
        self.status.add_error(&message);
        StageResult::error(message)
    }
}
