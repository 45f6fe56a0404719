//! Boot-time guard that holds container startup until critical mounts exist.
//!
//! A systemd unit ordered before `docker.service` is preferred. Hosts without
//! systemd get an `@reboot` crontab entry instead. Either way a failure is
//! reported as a warning.

use crate::command::{run_args, CommandRunner, Elevation};
use crate::error::Result;
use crate::outcome::OpResult;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use strum::Display;

pub const UNIT_NAME: &str = "pvarr-mounts.service";
pub const MOUNT_CHECK_LOG: &str = "/var/log/pvarr/mount-check.log";
pub const WAIT_SCRIPT: &str = include_str!("../../scripts/wait-for-mounts.sh");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MountWaitMethod {
    SystemdUnit,
    CronReboot,
}

/// What the installers need to know about the host
pub(super) struct MountWaitTarget<'a> {
    pub runner: &'a dyn CommandRunner,
    pub elevation: Elevation,
    pub system_root: &'a Path,
    pub script: &'a Path,
    pub mounts_file: &'a Path,
}

impl MountWaitTarget<'_> {
    fn unit_dir(&self) -> PathBuf {
        self.system_root.join("etc/systemd/system")
    }

    fn privileged(&self, command: &[&str]) -> Result<()> {
        let (program, args) = self.elevation.wrap(command);
        self.runner.run(&program, &args)?.ensure_success(command.join(" ").as_str())
    }
}

pub fn unit_file(script: &Path, mounts_file: &Path) -> String {
    format!(
        "[Unit]\n\
         Description=pvarr Mount Wait Service\n\
         Before=docker.service\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         Environment=PVARR_CRITICAL_MOUNTS={}\n\
         ExecStart={}\n\
         TimeoutSec=600\n\
         RemainAfterExit=yes\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        mounts_file.display(),
        script.display()
    )
}

pub fn cron_line(script: &Path, mounts_file: &Path) -> String {
    format!(
        "@reboot PVARR_CRITICAL_MOUNTS={} {} >> {} 2>&1",
        mounts_file.display(),
        script.display(),
        MOUNT_CHECK_LOG
    )
}

impl MountWaitMethod {
    /// systemd when its unit directory exists under `system_root`
    pub fn select(system_root: &Path) -> Self {
        if system_root.join("etc/systemd/system").is_dir() {
            Self::SystemdUnit
        } else {
            Self::CronReboot
        }
    }

    pub(super) fn install(self, target: &MountWaitTarget<'_>) -> OpResult {
        match self {
            Self::SystemdUnit => match install_unit(target) {
                Ok(()) => OpResult::success("Mount wait service installed and enabled"),
                Err(e) => OpResult::warning(format!("Could not create systemd service: {}", e)),
            },
            Self::CronReboot => match install_cron(target) {
                Ok(true) => OpResult::success("Mount wait script added to crontab"),
                Ok(false) => OpResult::success("Mount wait script already in crontab"),
                Err(e) => OpResult::warning(format!("Could not update crontab: {}", e)),
            },
        }
    }
}

fn install_unit(target: &MountWaitTarget<'_>) -> Result<()> {
    fs::write(
        target.unit_dir().join(UNIT_NAME),
        unit_file(target.script, target.mounts_file),
    )?;
    target.privileged(&["systemctl", "daemon-reload"])?;
    target.privileged(&["systemctl", "enable", UNIT_NAME])
}

/// Returns false when the entry was already present
fn install_cron(target: &MountWaitTarget<'_>) -> Result<bool> {
    let line = cron_line(target.script, target.mounts_file);
    let listed = run_args(target.runner, "crontab", &["-l"])?;
    // `crontab -l` fails when the user has no crontab yet
    let current = if listed.success { listed.stdout } else { String::new() };
    if current.contains(&line) {
        return Ok(false);
    }

    let staged = std::env::temp_dir().join(format!("pvarr-crontab-{}", std::process::id()));
    fs::write(&staged, format!("{}\n{}\n", current, line))?;
    let staged_arg = staged.to_string_lossy().into_owned();
    let installed = run_args(target.runner, "crontab", &[staged_arg.as_str()])
        .and_then(|out| out.ensure_success("crontab"));
    let _ = fs::remove_file(&staged);
    installed.map(|()| true)
}
