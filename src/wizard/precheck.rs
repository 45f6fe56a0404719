//! Stage 1: hardware and runtime compatibility.

use super::{InstallWizard, StageResult};
use crate::install_state::Stage;
use crate::system_info::SystemSnapshot;
use serde::Serialize;

pub const MIN_MEMORY_GB: f64 = 2.0;
pub const MIN_FREE_DISK_GB: f64 = 10.0;

/// A measured resource against its recommended minimum
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceCheck {
    pub value: f64,
    pub unit: &'static str,
    pub compatible: bool,
    pub recommended: f64,
    pub message: String,
}

impl ResourceCheck {
    fn gigabytes(label: &str, value: f64, recommended: f64) -> Self {
        let compatible = value >= recommended;
        let mut message = format!("{}: {}GB", label, value);
        if !compatible {
            message.push_str(&format!(" (Recommended: ≥{}GB)", recommended));
        }
        Self {
            value,
            unit: "GB",
            compatible,
            recommended,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DockerCheck {
    pub installed: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityChecks {
    pub memory: ResourceCheck,
    pub disk_space: ResourceCheck,
    pub docker: DockerCheck,
}

impl CompatibilityChecks {
    pub fn messages(&self) -> [&str; 3] {
        [
            self.memory.message.as_str(),
            self.disk_space.message.as_str(),
            self.docker.message.as_str(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityReport {
    /// Memory and disk meet the minimums. Docker is not required up front.
    pub compatible: bool,
    pub system_info: SystemSnapshot,
    pub checks: CompatibilityChecks,
}

impl CompatibilityReport {
    pub fn evaluate(system_info: SystemSnapshot) -> Self {
        let memory = ResourceCheck::gigabytes("Memory", system_info.memory.total_gb, MIN_MEMORY_GB);
        let disk_space = ResourceCheck::gigabytes("Free Disk Space", system_info.disk.free_gb, MIN_FREE_DISK_GB);
        let installed = system_info.docker_installed;
        let docker = DockerCheck {
            installed,
            message: if installed {
                "Docker: Installed".to_string()
            } else {
                "Docker: Not installed (will be installed during setup)".to_string()
            },
        };
        Self {
            compatible: memory.compatible && disk_space.compatible,
            system_info,
            checks: CompatibilityChecks {
                memory,
                disk_space,
                docker,
            },
        }
    }
}

impl InstallWizard {
    pub(super) fn compatibility_stage(&self) -> StageResult<CompatibilityReport> {
        let stage = Stage::PreCheck;
        self.status.update_progress(stage, 10);
        self.status.add_log("Starting system compatibility check");

        self.guarded("system compatibility check", || {
            self.status.update_progress(stage, 30);
            let snapshot = self.deps.inspector.snapshot()?;
            self.status.update_progress(stage, 50);
            self.status.update_progress(stage, 70);
            self.status.update_progress(stage, 90);

            let report = CompatibilityReport::evaluate(snapshot);
            self.status.add_log(format!(
                "System compatibility check completed: {}",
                if report.compatible { "Compatible" } else { "Not fully compatible" }
            ));
            for message in report.checks.messages() {
                self.status.add_log(message);
            }

            self.status.update_progress(stage, 100);
            Ok(StageResult::success("System compatibility check completed", report))
        })
    }
}
