//! Stage 4: mounts, media and download directories, file sharing.
//!
//! Mount entries are processed in order: validate, mount, verify. A failed
//! entry is skipped. If any entry marked critical failed, the stage stops
//! before touching directories or shares and reports an error; mounts that
//! already succeeded are left in place.

use super::{ConfigPayload, FileSharingRequest, InstallWizard, MountPointSpec, StageResult};
use crate::config::SystemConfig;
use crate::error::Result;
use crate::install_state::Stage;
use crate::storage::{create_owned_dir, MountRequest};
use std::path::Path;

impl InstallWizard {
    pub(super) fn storage_stage(&self, request: &super::StorageRequest) -> StageResult<ConfigPayload> {
        let stage = Stage::StorageSetup;
        self.status.update_progress(stage, 10);
        self.status.add_log("Setting up storage configuration");

        self.guarded("storage configuration setup", || {
            let mut config = self.load_system_config()?;

            if let Some(mounts) = &request.mount_points {
                self.status.update_progress(stage, 30);
                self.status.add_log("Configuring mount points");

                let critical_failures = self.apply_mounts(mounts, &config)?;
                if !critical_failures.is_empty() {
                    return Ok(StageResult::error_with_details(
                        "Critical storage mounts failed, cannot continue installation",
                        critical_failures,
                    ));
                }
                config.critical_mounts = mounts
                    .iter()
                    .filter(|m| m.is_critical)
                    .filter_map(|m| m.path.clone().filter(|p| !p.is_empty()))
                    .collect();
            }

            if let Some(media_dir) = &request.media_directory {
                self.status.update_progress(stage, 60);
                self.status.add_log("Configuring media directories");
                if !media_dir.is_empty() {
                    config.media_dir = Some(media_dir.clone());
                    self.status
                        .add_log(format!("Creating media subdirectories in {}", media_dir));
                    let tree = self
                        .deps
                        .storage
                        .create_media_tree(media_dir, config.uid(), config.gid())?;
                    if !tree.is_success() {
                        let message = format!("Failed to create media directories: {}", tree.message);
                        self.status.add_error(&message);
                        if request.require_media_directory {
                            return Ok(StageResult::error(message));
                        }
                    }
                }
            }

            if let Some(downloads_dir) = &request.downloads_directory {
                self.status.update_progress(stage, 80);
                self.status.add_log("Configuring downloads directory");
                if !downloads_dir.is_empty() {
                    config.downloads_dir = Some(downloads_dir.clone());
                    let path = Path::new(downloads_dir);
                    if !path.exists() {
                        self.status
                            .add_log(format!("Creating downloads directory: {}", downloads_dir));
                        if let Err(e) = create_owned_dir(path, config.uid(), config.gid()) {
                            let message = format!("Failed to create downloads directory: {}", e);
                            self.status.add_error(&message);
                            if request.require_downloads_directory {
                                return Ok(StageResult::error(message));
                            }
                        }
                    }
                }
            }

            if let Some(sharing) = &request.file_sharing {
                self.status.update_progress(stage, 90);
                self.status.add_log("Configuring file sharing");
                self.apply_file_sharing(sharing)?;
            }

            self.deps.config.save_system_config(&config)?;
            self.status.update_progress(stage, 100);
            self.status.add_log("Storage configuration setup completed");
            Ok(StageResult::success(
                "Storage configuration setup completed",
                ConfigPayload { config },
            ))
        })
    }

    /// Mount every entry; returns the failure messages of critical entries
    fn apply_mounts(&self, mounts: &[MountPointSpec], config: &SystemConfig) -> Result<Vec<String>> {
        let storage = &self.deps.storage;
        let mut critical_failures = Vec::new();

        for mount in mounts {
            let Some((device, path)) = mount.target() else {
                self.status
                    .add_warning("Skipping mount point with missing device or path");
                continue;
            };
            self.status.add_log(format!("Mounting {} to {}", device, path));

            let mut fail = |message: String| {
                self.status.add_error(&message);
                if mount.is_critical {
                    critical_failures.push(message);
                }
            };

            let validation = storage.validate_device(device, &mount.fs_type)?;
            if validation.is_error() {
                fail(format!("Device validation failed for {}: {}", device, validation.message));
                continue;
            }
            if validation.is_warning() {
                self.status.add_warning(&validation.message);
            }

            let mounted = storage.mount(&MountRequest {
                device: device.to_string(),
                path: path.to_string(),
                fs_type: mount.fs_type.clone(),
                options: mount.mount_options.clone(),
                persist: mount.add_to_fstab,
            })?;
            if !mounted.is_success() {
                fail(format!("Failed to mount {}: {}", device, mounted.message));
                continue;
            }

            let verified = storage.verify_writable(path, config.uid(), config.gid())?;
            if verified.is_error() {
                fail(format!("Mount verification failed for {}: {}", path, verified.message));
                self.status
                    .add_log(format!("Unmounting {} due to verification failure", path));
                storage.unmount(path)?;
            } else if verified.is_warning() {
                self.status.add_warning(&verified.message);
            }
        }

        Ok(critical_failures)
    }

    fn apply_file_sharing(&self, sharing: &FileSharingRequest) -> Result<()> {
        if sharing.shares.is_empty() {
            return Ok(());
        }
        match sharing.kind.as_str() {
            "samba" => {
                self.status.add_log("Setting up Samba shares");
                for share in &sharing.shares {
                    if share.name.is_empty() || share.path.is_empty() {
                        continue;
                    }
                    self.status
                        .add_log(format!("Adding Samba share: {} ({})", share.name, share.path));
                    let added = self.deps.storage.add_share(share)?;
                    if !added.is_success() {
                        self.status.add_error(format!(
                            "Failed to add Samba share {}: {}",
                            share.name, added.message
                        ));
                    }
                }
            }
            "nfs" => {
                self.status.add_log("Setting up NFS exports");
                self.status
                    .add_warning("NFS export configuration not yet implemented");
            }
            other => {
                tracing::debug!("ignoring unknown file sharing type {}", other);
            }
        }
        Ok(())
    }
}
