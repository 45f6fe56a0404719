//! Host system inspection
//!
//! Read-only snapshot of the resources the wizard cares about: memory, root
//! disk, CPU, Raspberry Pi model and whether Docker/Tailscale are present.
//!
//! # Design
//!
//! - **Safe defaults**: unreadable probes (thermal zone, os-release, Pi model)
//!   log at debug level and fall back to `None`/"Unknown"
//! - **Single error path**: only a failure to find the root filesystem is an error

use crate::command::{run_args, CommandRunner};
use crate::error::{PvarrError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::{Disks, System};
use tracing::{debug, info};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

fn to_gib(bytes: u64) -> f64 {
    round2(bytes as f64 / GIB)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 * 100.0 / whole as f64)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub kernel: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub model: String,
    pub cores: usize,
    /// Degrees Celsius, if a thermal zone is readable
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total_gb: f64,
    pub available_gb: f64,
    pub used_gb: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub percent: f64,
}

/// Facts about the host at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub hostname: String,
    pub os: OsInfo,
    pub architecture: String,
    pub is_raspberry_pi: bool,
    pub pi_model: Option<String>,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub disk: DiskInfo,
    pub docker_installed: bool,
    pub tailscale_installed: bool,
}

/// Source of host facts.
pub trait SystemInspector: Send + Sync {
    fn snapshot(&self) -> Result<SystemSnapshot>;

    /// Cheaper than a full snapshot when only the runtime matters
    fn docker_installed(&self) -> bool {
        self.snapshot().map(|s| s.docker_installed).unwrap_or(false)
    }
}

/// Inspects the machine pvarr runs on.
pub struct HostInspector {
    runner: Arc<dyn CommandRunner>,
    /// Prefix for `/proc`, `/sys` and `/etc` probes
    root: PathBuf,
}

impl HostInspector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            root: PathBuf::from("/"),
        }
    }

    pub fn with_root(runner: Arc<dyn CommandRunner>, root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            root: root.into(),
        }
    }

    fn probe(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn os_name(&self) -> String {
        match read_os_release(&self.probe("etc/os-release")) {
            Ok(Some(name)) => name,
            Ok(None) => System::long_os_version().unwrap_or_else(|| "Unknown".to_string()),
            Err(e) => {
                debug!("{:#}", e);
                System::long_os_version().unwrap_or_else(|| "Unknown".to_string())
            }
        }
    }

    /// Device-tree model string, present on Raspberry Pi boards
    fn pi_model(&self) -> Option<String> {
        let raw = fs::read_to_string(self.probe("proc/device-tree/model")).ok()?;
        let model = raw.trim_end_matches('\0').trim().to_string();
        model.contains("Raspberry Pi").then_some(model)
    }

    fn cpu_temperature(&self) -> Option<f64> {
        let raw = fs::read_to_string(self.probe("sys/class/thermal/thermal_zone0/temp")).ok()?;
        let millis: f64 = raw.trim().parse().ok()?;
        Some(round2(millis / 1000.0))
    }

    fn command_available(&self, program: &str) -> bool {
        run_args(self.runner.as_ref(), program, &["--version"])
            .map(|out| out.success)
            .unwrap_or(false)
    }
}

/// `PRETTY_NAME` from an os-release file
fn read_os_release(path: &Path) -> anyhow::Result<Option<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(content.lines().find_map(|line| {
        line.strip_prefix("PRETTY_NAME=")
            .map(|value| value.trim_matches('"').to_string())
    }))
}

impl SystemInspector for HostInspector {
    fn snapshot(&self) -> Result<SystemSnapshot> {
        let sys = System::new_all();

        let total = sys.total_memory();
        let available = sys.available_memory();
        let used = total.saturating_sub(available);
        let memory = MemoryInfo {
            total_gb: to_gib(total),
            available_gb: to_gib(available),
            used_gb: to_gib(used),
            percent: percent(used, total),
        };

        let disks = Disks::new_with_refreshed_list();
        let root_disk = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .ok_or_else(|| PvarrError::general("root filesystem not found"))?;
        let disk_total = root_disk.total_space();
        let disk_free = root_disk.available_space();
        let disk_used = disk_total.saturating_sub(disk_free);
        let disk = DiskInfo {
            total_gb: to_gib(disk_total),
            used_gb: to_gib(disk_used),
            free_gb: to_gib(disk_free),
            percent: percent(disk_used, disk_total),
        };

        let cpu = CpuInfo {
            model: sys
                .cpus()
                .first()
                .map(|c| c.brand().trim().to_string())
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            cores: sys.cpus().len(),
            temperature: self.cpu_temperature(),
        };

        let pi_model = self.pi_model();
        let snapshot = SystemSnapshot {
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            os: OsInfo {
                name: self.os_name(),
                kernel: System::kernel_version().unwrap_or_default(),
            },
            architecture: std::env::consts::ARCH.to_string(),
            is_raspberry_pi: pi_model.is_some(),
            pi_model,
            cpu,
            memory,
            disk,
            docker_installed: self.command_available("docker"),
            tailscale_installed: self.command_available("tailscale"),
        };

        info!(
            "System snapshot: memory={}GB disk_free={}GB docker={} pi={}",
            snapshot.memory.total_gb,
            snapshot.disk.free_gb,
            snapshot.docker_installed,
            snapshot.is_raspberry_pi
        );
        Ok(snapshot)
    }

    fn docker_installed(&self) -> bool {
        self.command_available("docker")
    }
}
