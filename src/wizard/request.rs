//! Input documents accepted by the wizard stages.
//!
//! Every field is optional on the wire. Presence of a block is significant:
//! an absent `vpn` block leaves the stored VPN settings untouched, a present
//! one replaces them wholesale.

use crate::config::{TailscaleConfig, VpnConfig};
use crate::storage::ShareSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Composite document for a full installation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationRequest {
    pub user_config: Map<String, Value>,
    pub network_config: NetworkRequest,
    pub storage_config: StorageRequest,
    pub services_config: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpn: Option<VpnConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tailscale: Option<TailscaleConfig>,
}

fn default_fs_type() -> String {
    "auto".to_string()
}

fn default_true() -> bool {
    true
}

/// One requested mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPointSpec {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
    #[serde(default)]
    pub mount_options: Option<String>,
    #[serde(default = "default_true")]
    pub add_to_fstab: bool,
    /// Failure of a critical mount aborts the installation
    #[serde(default)]
    pub is_critical: bool,
}

impl MountPointSpec {
    /// Device and path, when both are non-empty
    pub fn target(&self) -> Option<(&str, &str)> {
        let device = self.device.as_deref().filter(|d| !d.is_empty())?;
        let path = self.path.as_deref().filter(|p| !p.is_empty())?;
        Some((device, path))
    }
}

fn default_share_type() -> String {
    "samba".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSharingRequest {
    /// `samba` or `nfs`
    #[serde(rename = "type", default = "default_share_type")]
    pub kind: String,
    #[serde(default)]
    pub shares: Vec<ShareSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_points: Option<Vec<MountPointSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sharing: Option<FileSharingRequest>,
    #[serde(default = "default_true")]
    pub require_media_directory: bool,
    #[serde(default = "default_true")]
    pub require_downloads_directory: bool,
}

impl Default for StorageRequest {
    fn default() -> Self {
        Self {
            mount_points: None,
            media_directory: None,
            downloads_directory: None,
            file_sharing: None,
            require_media_directory: true,
            require_downloads_directory: true,
        }
    }
}
