//! Storage subsystem
//!
//! Device validation, mounting with optional fstab persistence, mount
//! verification, the standard media directory tree and Samba share exports.
//!
//! Every operation reports an [`OpResult`]; `Err` is reserved for failures the
//! caller could not anticipate (for example a spawn failure of `mount` itself).

use crate::command::{CommandRunner, Elevation};
use crate::error::Result;
use crate::outcome::{OpResult, Status};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{chown, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Standard subdirectories created under the media directory
pub const MEDIA_SUBDIRS: [&str; 5] = ["Movies", "TVShows", "Music", "Books", "Photos"];

/// Free space below which a verified mount gets a warning
const MIN_FREE_GB: f64 = 10.0;

const WRITE_PROBE_DIR: &str = ".pvarr_write_test";

/// One mount to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    pub device: String,
    pub path: String,
    pub fs_type: String,
    pub options: Option<String>,
    /// Add an fstab entry after a successful mount
    pub persist: bool,
}

/// A Samba share definition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareSpec {
    pub name: String,
    pub path: String,
    pub public: bool,
    pub read_only: bool,
    pub valid_users: String,
}

/// Outcome of creating a directory tree, with one line per directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeResult {
    pub status: Status,
    pub message: String,
    pub details: Vec<String>,
}

impl TreeResult {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Storage operations the wizard depends on.
pub trait StorageBackend: Send + Sync {
    fn validate_device(&self, device: &str, fs_type: &str) -> Result<OpResult>;
    fn mount(&self, request: &MountRequest) -> Result<OpResult>;
    fn unmount(&self, path: &str) -> Result<OpResult>;
    fn verify_writable(&self, path: &str, uid: u32, gid: u32) -> Result<OpResult>;
    fn create_media_tree(&self, base: &str, uid: u32, gid: u32) -> Result<TreeResult>;
    fn add_share(&self, share: &ShareSpec) -> Result<OpResult>;
}

/// Mount options used when the caller supplies none
pub fn default_mount_options(device: &str, fs_type: &str) -> Option<&'static str> {
    match fs_type {
        "nfs" => Some("rw,soft,intr,noatime"),
        "cifs" => Some("rw,guest,iocharset=utf8"),
        "vfat" | "ntfs" | "exfat" => Some("rw,noatime,uid=1000,gid=1000"),
        _ if device.contains("usb") => Some("rw,noatime,uid=1000,gid=1000"),
        _ => None,
    }
}

/// Whether `path` is the root of a mounted filesystem
pub fn is_mount_point(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    let parent = path.parent().unwrap_or(path);
    match fs::metadata(parent) {
        Ok(parent_meta) => meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino(),
        Err(_) => false,
    }
}

/// Free space on the filesystem holding `path`, in GiB
fn free_space_gb(path: &Path) -> Option<f64> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let bytes = stat.blocks_available() as f64 * stat.fragment_size() as f64;
    Some(bytes / (1024.0 * 1024.0 * 1024.0))
}

/// Create `path` (and parents), then apply ownership and mode
pub fn create_owned_dir(path: &Path, uid: u32, gid: u32) -> std::io::Result<()> {
    fs::create_dir_all(path)?;
    chown(path, Some(uid), Some(gid))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

/// Storage operations on the local host
pub struct HostStorage {
    runner: Arc<dyn CommandRunner>,
    elevation: Elevation,
    fstab: PathBuf,
    smb_conf: PathBuf,
    sys_block: PathBuf,
}

impl HostStorage {
    pub fn new(runner: Arc<dyn CommandRunner>, elevation: Elevation) -> Self {
        Self {
            runner,
            elevation,
            fstab: PathBuf::from("/etc/fstab"),
            smb_conf: PathBuf::from("/etc/samba/smb.conf"),
            sys_block: PathBuf::from("/sys/block"),
        }
    }

    /// Point the fstab and smb.conf paths elsewhere
    pub fn with_paths(mut self, fstab: impl Into<PathBuf>, smb_conf: impl Into<PathBuf>) -> Self {
        self.fstab = fstab.into();
        self.smb_conf = smb_conf.into();
        self
    }

    fn privileged(&self, command: &[&str]) -> Result<crate::command::CommandOutput> {
        let (program, args) = self.elevation.wrap(command);
        self.runner.run(&program, &args)
    }

    fn reachable(&self, server: &str) -> Result<bool> {
        let out = crate::command::run_args(self.runner.as_ref(), "ping", &["-c", "1", "-W", "5", server])?;
        Ok(out.success)
    }

    fn validate_block_device(&self, device: &str) -> Result<OpResult> {
        if !Path::new(device).exists() {
            return Ok(OpResult::error(format!("Device {} does not exist", device)));
        }
        let out = crate::command::run_args(self.runner.as_ref(), "lsblk", &["-no", "TYPE", device])?;
        if !out.success {
            return Ok(OpResult::error(format!("Not a valid block device: {}", device)));
        }
        let kind = out.stdout.trim();
        if kind.is_empty() || kind == "disk" {
            return Ok(OpResult::error(format!(
                "Device {} is a whole disk, not a partition",
                device
            )));
        }

        let name = Path::new(device)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .trim_end_matches(|c: char| c.is_ascii_digit());
        let removable = self.sys_block.join(name).join("removable");
        if fs::read_to_string(&removable).is_ok_and(|v| v.trim() == "1") {
            return Ok(OpResult::warning(format!(
                "Device {} appears to be a removable USB drive. This may not be reliable for permanent storage.",
                device
            )));
        }
        Ok(OpResult::success(format!("Device {} is valid", device)))
    }

    fn add_to_fstab(&self, request: &MountRequest) -> Result<OpResult> {
        let options = request
            .options
            .as_deref()
            .or_else(|| default_mount_options(&request.device, &request.fs_type))
            .unwrap_or("defaults");

        let line = if request.device.starts_with("/dev/") {
            let out = crate::command::run_args(
                self.runner.as_ref(),
                "blkid",
                &["-s", "UUID", "-o", "value", request.device.as_str()],
            )?;
            let uuid = out.stdout.trim();
            let source = if out.success && !uuid.is_empty() {
                format!("UUID={}", uuid)
            } else {
                request.device.clone()
            };
            format!("{} {} {} {} 0 2", source, request.path, request.fs_type, options)
        } else {
            format!("{} {} {} {} 0 0", request.device, request.path, request.fs_type, options)
        };

        let content = match fs::read_to_string(&self.fstab) {
            Ok(c) => c,
            Err(e) => return Ok(OpResult::error(format!("Error updating fstab: {}", e))),
        };
        let already_present = content
            .lines()
            .filter(|l| !l.trim_start().starts_with('#'))
            .any(|l| l.split_whitespace().nth(1) == Some(request.path.as_str()));
        if already_present {
            return Ok(OpResult::warning(format!(
                "Mount point {} already exists in fstab",
                request.path
            )));
        }

        let appended = OpenOptions::new()
            .append(true)
            .open(&self.fstab)
            .and_then(|mut f| writeln!(f, "\n# Added by pvarr\n{}", line));
        match appended {
            Ok(()) => {
                info!("fstab: {}", line);
                Ok(OpResult::success(format!(
                    "Added {} to fstab for persistent mounting",
                    request.device
                )))
            }
            Err(e) => Ok(OpResult::error(format!("Error updating fstab: {}", e))),
        }
    }
}

impl StorageBackend for HostStorage {
    fn validate_device(&self, device: &str, fs_type: &str) -> Result<OpResult> {
        match fs_type {
            "nfs" => {
                let Some((server, _)) = device.split_once(':') else {
                    return Ok(OpResult::error(format!(
                        "Invalid NFS share format. Expected 'server:/path', got '{}'",
                        device
                    )));
                };
                if !self.reachable(server)? {
                    return Ok(OpResult::error(format!("NFS server '{}' is not reachable", server)));
                }
                Ok(OpResult::success(format!("Network share '{}' is valid", device)))
            }
            "cifs" => {
                let server = device
                    .strip_prefix("//")
                    .and_then(|rest| rest.split_once('/'))
                    .map(|(server, _)| server);
                let Some(server) = server else {
                    return Ok(OpResult::error(format!(
                        "Invalid CIFS share format. Expected '//server/share', got '{}'",
                        device
                    )));
                };
                if !self.reachable(server)? {
                    return Ok(OpResult::error(format!("CIFS server '{}' is not reachable", server)));
                }
                Ok(OpResult::success(format!("Network share '{}' is valid", device)))
            }
            _ if device.starts_with("/dev/") => self.validate_block_device(device),
            _ if Path::new(device).is_dir() => Ok(OpResult::success(format!(
                "Directory {} is valid for bind mount",
                device
            ))),
            _ => Ok(OpResult::error(format!("Unknown device type or format: {}", device))),
        }
    }

    fn mount(&self, request: &MountRequest) -> Result<OpResult> {
        if let Err(e) = fs::create_dir_all(&request.path) {
            return Ok(OpResult::error(format!("Error mounting drive: {}", e)));
        }

        let mut command: Vec<&str> = vec!["mount", "-t", request.fs_type.as_str()];
        if let Some(options) = request
            .options
            .as_deref()
            .or_else(|| default_mount_options(&request.device, &request.fs_type))
        {
            command.extend(["-o", options]);
        }
        command.extend([request.device.as_str(), request.path.as_str()]);

        let out = self.privileged(&command)?;
        if !out.success {
            return Ok(OpResult::error(format!(
                "Failed to mount {}: {}",
                request.device,
                out.stderr.trim()
            )));
        }

        let mut suffix = String::new();
        if request.persist {
            let fstab = self.add_to_fstab(request)?;
            if fstab.is_error() {
                warn!("fstab update failed, unmounting {}", request.path);
                self.unmount(&request.path)?;
                return Ok(fstab);
            }
            suffix = format!(" and {}", fstab.message);
        }

        Ok(OpResult::success(format!(
            "Device {} mounted at {}{}",
            request.device, request.path, suffix
        )))
    }

    fn unmount(&self, path: &str) -> Result<OpResult> {
        let out = self.privileged(&["umount", path])?;
        if out.success {
            Ok(OpResult::success(format!("Device unmounted from {}", path)))
        } else {
            Ok(OpResult::error(format!(
                "Failed to unmount {}: {}",
                path,
                out.stderr.trim()
            )))
        }
    }

    fn verify_writable(&self, path: &str, uid: u32, gid: u32) -> Result<OpResult> {
        let mount = Path::new(path);
        if !is_mount_point(mount) {
            return Ok(OpResult::error(format!("Path {} is not a mount point", path)));
        }

        let probe = mount.join(WRITE_PROBE_DIR);
        let written = create_owned_dir(&probe, uid, gid)
            .and_then(|_| fs::write(probe.join("test.txt"), "Test write access"))
            .and_then(|_| fs::remove_dir_all(&probe));
        if let Err(e) = written {
            return Ok(OpResult::error(format!("Cannot write to mount point: {}", e)));
        }

        if let Some(free) = free_space_gb(mount)
            && free < MIN_FREE_GB
        {
            return Ok(OpResult::warning(format!(
                "Only {:.1} GB available on {}, minimum 10GB recommended",
                free, path
            )));
        }
        Ok(OpResult::success(format!("Mount point {} verified successfully", path)))
    }

    fn create_media_tree(&self, base: &str, uid: u32, gid: u32) -> Result<TreeResult> {
        let base_path = Path::new(base);
        if !base_path.exists()
            && let Err(e) = create_owned_dir(base_path, uid, gid)
        {
            return Ok(TreeResult {
                status: Status::Error,
                message: format!("Error creating media directories: {}", e),
                details: Vec::new(),
            });
        }

        let details = MEDIA_SUBDIRS
            .iter()
            .map(|name| match create_owned_dir(&base_path.join(name), uid, gid) {
                Ok(()) => format!("Directory {} created", name),
                Err(e) => {
                    warn!("Could not create {}/{}: {}", base, name, e);
                    format!("Error creating directory {}: {}", name, e)
                }
            })
            .collect();

        debug!("Media tree ready under {}", base);
        Ok(TreeResult {
            status: Status::Success,
            message: "Media directories created successfully".to_string(),
            details,
        })
    }

    fn add_share(&self, share: &ShareSpec) -> Result<OpResult> {
        let content = match fs::read_to_string(&self.smb_conf) {
            Ok(c) => c,
            Err(_) => return Ok(OpResult::error("Samba configuration file not found")),
        };
        if content.contains(&format!("[{}]", share.name)) {
            return Ok(OpResult::error(format!("Share {} already exists", share.name)));
        }

        let section = format!(
            "\n[{}]\npath = {}\nvalid users = {}\nread only = {}\nguest ok = {}\n",
            share.name,
            share.path,
            share.valid_users,
            if share.read_only { "yes" } else { "no" },
            if share.public { "yes" } else { "no" },
        );
        if let Err(e) = fs::write(&self.smb_conf, content + &section) {
            return Ok(OpResult::error(format!("Error adding share: {}", e)));
        }

        let restart = self.privileged(&["systemctl", "restart", "smbd"])?;
        if !restart.success {
            return Ok(OpResult::error(format!(
                "Error adding share: smbd restart failed: {}",
                restart.stderr.trim()
            )));
        }
        Ok(OpResult::success(format!("Share {} added successfully", share.name)))
    }
}
