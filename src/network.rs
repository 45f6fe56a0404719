//! Network subsystem: VPN client settings and Tailscale.

use crate::command::{run_args, CommandRunner, Elevation};
use crate::config::{TailscaleConfig, VpnConfig};
use crate::error::Result;
use crate::outcome::OpResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Network operations the wizard depends on.
pub trait NetworkBackend: Send + Sync {
    fn configure_vpn(&self, config: &VpnConfig) -> Result<OpResult>;
    fn configure_tailscale(&self, config: &TailscaleConfig) -> Result<OpResult>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailscaleStatus {
    pub installed: bool,
    pub running: bool,
    pub ip_address: Option<String>,
    pub hostname: Option<String>,
}

/// Subset of `tailscale status --json`
#[derive(Debug, Deserialize)]
struct TailscaleStatusJson {
    #[serde(rename = "BackendState", default)]
    backend_state: String,
    #[serde(rename = "Self")]
    self_node: Option<TailscaleNode>,
}

#[derive(Debug, Deserialize)]
struct TailscaleNode {
    #[serde(rename = "HostName")]
    host_name: Option<String>,
    #[serde(rename = "TailscaleIPs", default)]
    ips: Vec<String>,
}

impl TailscaleStatus {
    /// Parse `tailscale status --json`; unparseable output means not running
    pub fn from_json(installed: bool, raw: &str) -> Self {
        match serde_json::from_str::<TailscaleStatusJson>(raw) {
            Ok(parsed) => {
                let node = parsed.self_node;
                Self {
                    installed,
                    running: parsed.backend_state == "Running",
                    ip_address: node.as_ref().and_then(|n| n.ips.first().cloned()),
                    hostname: node.and_then(|n| n.host_name),
                }
            }
            Err(e) => {
                debug!("tailscale status unparseable: {}", e);
                Self {
                    installed,
                    ..Self::default()
                }
            }
        }
    }
}

/// VPN settings are consumed by the gluetun container; Tailscale runs on the host.
pub struct HostNetwork {
    runner: Arc<dyn CommandRunner>,
    elevation: Elevation,
    tailscale_bin: PathBuf,
}

impl HostNetwork {
    pub fn new(runner: Arc<dyn CommandRunner>, elevation: Elevation) -> Self {
        Self {
            runner,
            elevation,
            tailscale_bin: PathBuf::from("/usr/bin/tailscale"),
        }
    }

    pub fn with_tailscale_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.tailscale_bin = path.into();
        self
    }

    fn tailscale_installed(&self) -> bool {
        self.tailscale_bin.exists()
    }

    pub fn tailscale_status(&self) -> Result<TailscaleStatus> {
        let installed = self.tailscale_installed();
        if !installed {
            return Ok(TailscaleStatus::default());
        }
        let out = run_args(self.runner.as_ref(), "tailscale", &["status", "--json"])?;
        if !out.success {
            return Ok(TailscaleStatus {
                installed,
                ..TailscaleStatus::default()
            });
        }
        Ok(TailscaleStatus::from_json(installed, &out.stdout))
    }
}

impl NetworkBackend for HostNetwork {
    fn configure_vpn(&self, config: &VpnConfig) -> Result<OpResult> {
        if !config.enabled {
            return Ok(OpResult::success("VPN disabled in configuration"));
        }
        let provider = config.provider.trim().to_lowercase();
        if provider.is_empty() {
            return Ok(OpResult::error("VPN provider is required"));
        }
        if config.username.trim().is_empty() || config.password.trim().is_empty() {
            return Ok(OpResult::error("VPN username and password are required"));
        }
        info!("VPN provider {} region {}", provider, config.region.trim());
        Ok(OpResult::success(format!(
            "VPN configuration updated for provider {}",
            provider
        )))
    }

    fn configure_tailscale(&self, config: &TailscaleConfig) -> Result<OpResult> {
        if !self.tailscale_installed() {
            return Ok(OpResult::error("Tailscale is not installed"));
        }

        if !config.enabled {
            let (program, args) = self.elevation.wrap(&["tailscale", "down"]);
            self.runner.run(&program, &args)?;
            return Ok(OpResult::success("Tailscale disabled and stopped"));
        }

        let auth_key = config.auth_key.trim();
        if auth_key.is_empty() {
            return Ok(OpResult::error("Tailscale auth key is required"));
        }

        let (program, args) = self.elevation.wrap(&["tailscale", "up", "--authkey", auth_key]);
        let out = self.runner.run(&program, &args)?;
        if !out.success {
            return Ok(OpResult::error(format!(
                "Tailscale setup failed: {}",
                out.stderr.trim()
            )));
        }
        Ok(OpResult::success("Tailscale configured and started"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::SystemCommandRunner;
    use tempfile::TempDir;

    fn network() -> HostNetwork {
        HostNetwork::new(Arc::new(SystemCommandRunner::dry_run()), Elevation::Root)
    }

    #[test]
    fn test_vpn_disabled_is_success() {
        let result = network().configure_vpn(&VpnConfig::default()).unwrap();
        assert!(result.is_success());
    }

    #[test]
    fn test_vpn_requires_provider_and_credentials() {
        let mut vpn = VpnConfig {
            enabled: true,
            ..VpnConfig::default()
        };
        assert_eq!(
            network().configure_vpn(&vpn).unwrap().message,
            "VPN provider is required"
        );

        vpn.provider = "Mullvad".to_string();
        vpn.username = "user".to_string();
        assert!(network().configure_vpn(&vpn).unwrap().is_error());

        vpn.password = "secret".to_string();
        let ok = network().configure_vpn(&vpn).unwrap();
        assert!(ok.is_success());
        assert!(ok.message.ends_with("mullvad"));
    }

    #[test]
    fn test_tailscale_not_installed() {
        let dir = TempDir::new().unwrap();
        let net = network().with_tailscale_bin(dir.path().join("tailscale"));
        let result = net.configure_tailscale(&TailscaleConfig::default()).unwrap();
        assert!(result.is_error());
        assert_eq!(net.tailscale_status().unwrap(), TailscaleStatus::default());
    }

    #[test]
    fn test_tailscale_requires_auth_key() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("tailscale");
        std::fs::write(&bin, "").unwrap();
        let net = network().with_tailscale_bin(&bin);
        let config = TailscaleConfig {
            enabled: true,
            auth_key: "  ".to_string(),
        };
        assert!(net.configure_tailscale(&config).unwrap().is_error());
    }

    #[test]
    fn test_tailscale_status_parsing() {
        let raw = r#"{"BackendState":"Running","Self":{"HostName":"pi","TailscaleIPs":["100.64.0.7","fd7a::7"]}}"#;
        let status = TailscaleStatus::from_json(true, raw);
        assert!(status.running);
        assert_eq!(status.ip_address.as_deref(), Some("100.64.0.7"));
        assert_eq!(status.hostname.as_deref(), Some("pi"));

        let stopped = TailscaleStatus::from_json(true, "not json");
        assert!(stopped.installed);
        assert!(!stopped.running);
    }
}
