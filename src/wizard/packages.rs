//! System package manager selection.

use serde::Serialize;
use std::path::Path;
use strum::{Display, EnumIter, IntoEnumIterator};

/// Linux family, identified by its release marker file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Distro {
    Debian,
    Fedora,
    Arch,
}

/// One package manager invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub argv: Vec<&'static str>,
    pub description: &'static str,
}

impl Distro {
    /// Marker file relative to the system root
    pub fn marker(self) -> &'static str {
        match self {
            Self::Debian => "etc/debian_version",
            Self::Fedora => "etc/fedora-release",
            Self::Arch => "etc/arch-release",
        }
    }

    /// First distro whose marker exists under `system_root`
    pub fn detect(system_root: &Path) -> Option<Self> {
        Self::iter().find(|d| system_root.join(d.marker()).exists())
    }

    fn install_prefix(self) -> &'static [&'static str] {
        match self {
            Self::Debian => &["apt", "install", "-y"],
            Self::Fedora => &["dnf", "install", "-y"],
            Self::Arch => &["pacman", "-S", "--noconfirm"],
        }
    }

    pub fn container_packages(self) -> &'static [&'static str] {
        match self {
            Self::Debian => &["docker.io", "docker-compose"],
            Self::Fedora | Self::Arch => &["docker", "docker-compose"],
        }
    }

    /// Tools the storage stage shells out to
    pub fn helper_packages(self) -> &'static [&'static str] {
        match self {
            Self::Debian => &["cifs-utils", "nfs-common", "samba"],
            Self::Fedora | Self::Arch => &["cifs-utils", "nfs-utils", "samba"],
        }
    }

    fn install(self, packages: &[&'static str], description: &'static str) -> PlannedCommand {
        let mut argv = self.install_prefix().to_vec();
        argv.extend_from_slice(packages);
        PlannedCommand { argv, description }
    }

    /// Package list refresh (where needed) and container runtime install
    pub fn system_plan(self) -> Vec<PlannedCommand> {
        let mut plan = Vec::new();
        if self == Self::Debian {
            plan.push(PlannedCommand {
                argv: vec!["apt", "update"],
                description: "Package list update",
            });
        }
        plan.push(self.install(self.container_packages(), "System package installation"));
        plan
    }

    pub fn helper_plan(self) -> PlannedCommand {
        self.install(self.helper_packages(), "Storage helper installation")
    }
}
