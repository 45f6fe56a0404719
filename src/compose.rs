//! Compose generator
//!
//! Turns the service selection plus system config into a Docker Compose
//! descriptor and an `.env` file, and installs both under the config dir.
//!
//! Service order in the descriptor is fixed: the VPN container first (when
//! enabled), then download clients, media servers, arr apps, utilities and
//! finally Tailscale. With the VPN enabled, download clients share gluetun's
//! network namespace and their web ports are published on gluetun instead.

use crate::catalog::{self, GLUETUN, TAILSCALE};
use crate::config::{ConfigStore, InstallPhase, ServiceCategory, ServicesConfig, SystemConfig};
use crate::error::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const COMPOSE_DIR: &str = "docker-compose";
pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const ENV_FILE: &str = ".env";
pub const CONTAINER_NETWORK: &str = "container_network";

// ============================================================================
// Descriptor types
// ============================================================================

/// One service entry of the compose file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComposeService {
    pub container_name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    pub environment: IndexMap<String, String>,
    pub volumes: Vec<String>,
    pub restart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverDef {
    pub driver: String,
}

/// Whole compose descriptor. Maps serialize in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposeFile {
    pub version: String,
    pub services: IndexMap<String, ComposeService>,
    pub networks: IndexMap<String, DriverDef>,
    pub volumes: IndexMap<String, DriverDef>,
}

impl ComposeFile {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Where `apply` put the generated files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeArtifacts {
    pub docker_compose_path: PathBuf,
    pub env_path: PathBuf,
}

// ============================================================================
// Backend
// ============================================================================

/// Compose generation operations the wizard depends on.
pub trait ComposeBackend: Send + Sync {
    /// Compose descriptor as YAML
    fn render(&self) -> Result<String>;
    /// `.env` file contents
    fn render_env(&self) -> Result<String>;
    /// Write both files to their final locations and mark the install configured
    fn apply(&self) -> Result<ComposeArtifacts>;
}

/// Generates compose files from the persisted configuration
pub struct ComposeGenerator {
    config: Arc<dyn ConfigStore>,
    dev_root: PathBuf,
}

impl ComposeGenerator {
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        Self {
            config,
            dev_root: PathBuf::from("/dev"),
        }
    }

    /// Probe for transcoding devices under `dev_root` instead of `/dev`
    pub fn with_dev_root(mut self, dev_root: impl Into<PathBuf>) -> Self {
        self.dev_root = dev_root.into();
        self
    }

    pub fn compose_path(config_dir: &Path) -> PathBuf {
        config_dir.join(COMPOSE_DIR).join(COMPOSE_FILE)
    }

    pub fn env_path(config_dir: &Path) -> PathBuf {
        config_dir.join(ENV_FILE)
    }

    /// Host device passed to Jellyfin for hardware transcoding
    fn transcode_device(&self) -> Option<String> {
        ["dri", "video10"]
            .iter()
            .map(|name| self.dev_root.join(name))
            .find(|path| path.exists())
            .map(|path| format!("/dev/{0}:/dev/{0}", path.file_name().unwrap_or_default().to_string_lossy()))
    }

    /// Build the descriptor for the given configuration
    pub fn build(&self, system: &SystemConfig, services: &ServicesConfig) -> ComposeFile {
        let docker_dir = system.docker_dir_or_default();
        let media_dir = system.media_dir_or_default();
        let downloads_dir = system.downloads_dir_or_default();

        let mut common_env = IndexMap::new();
        common_env.insert("PUID".to_string(), system.uid().to_string());
        common_env.insert("PGID".to_string(), system.gid().to_string());
        common_env.insert("TZ".to_string(), system.timezone_or_default().to_string());

        let base = |name: &str, image: &str, volumes: Vec<String>| ComposeService {
            container_name: name.to_string(),
            image: image.to_string(),
            environment: common_env.clone(),
            volumes,
            restart: "unless-stopped".to_string(),
            networks: vec![CONTAINER_NETWORK.to_string()],
            ..ComposeService::default()
        };

        let mut compose = ComposeFile {
            version: "3.7".to_string(),
            services: IndexMap::new(),
            networks: IndexMap::new(),
            volumes: IndexMap::new(),
        };
        compose.networks.insert(
            CONTAINER_NETWORK.to_string(),
            DriverDef {
                driver: "bridge".to_string(),
            },
        );
        compose.volumes.insert(
            "config".to_string(),
            DriverDef {
                driver: "local".to_string(),
            },
        );

        let vpn = &system.vpn;
        if vpn.enabled {
            let mut gluetun = base(GLUETUN.name, GLUETUN.image, vec!["config:/gluetun".to_string()]);
            gluetun.cap_add = vec!["NET_ADMIN".to_string()];
            gluetun.devices = vec!["/dev/net/tun:/dev/net/tun".to_string()];
            gluetun.environment.insert("VPN_SERVICE_PROVIDER".to_string(), vpn.provider.clone());
            gluetun.environment.insert("OPENVPN_USER".to_string(), vpn.username.clone());
            gluetun.environment.insert("OPENVPN_PASSWORD".to_string(), vpn.password.clone());
            gluetun.environment.insert("SERVER_REGIONS".to_string(), vpn.region.clone());
            compose.services.insert(GLUETUN.name.to_string(), gluetun);
        }

        let order = [
            ServiceCategory::DownloadClients,
            ServiceCategory::MediaServers,
            ServiceCategory::ArrApps,
            ServiceCategory::Utilities,
        ];
        for category in order {
            for (name, enabled) in services.category(category) {
                if !enabled {
                    continue;
                }
                let Some(spec) = catalog::lookup(name) else {
                    debug!("{} has no catalog entry, skipping", name);
                    continue;
                };

                let mut volumes = vec![format!("{}/{}:/config", docker_dir, name)];
                match category {
                    ServiceCategory::DownloadClients => volumes.push(format!("{}:/downloads", downloads_dir)),
                    ServiceCategory::MediaServers => volumes.push(format!("{}:/media", media_dir)),
                    ServiceCategory::ArrApps => {
                        volumes.push(format!("{}:/media", media_dir));
                        volumes.push(format!("{}:/downloads", downloads_dir));
                    }
                    ServiceCategory::Utilities => match name.as_str() {
                        "portainer" => volumes.push("/var/run/docker.sock:/var/run/docker.sock".to_string()),
                        "nginx_proxy_manager" => {
                            volumes.push("./data:/data".to_string());
                            volumes.push("./letsencrypt:/etc/letsencrypt".to_string());
                        }
                        _ => {}
                    },
                }

                let mut service = base(name, spec.image, volumes);
                if let Some(port) = spec.port {
                    let mapping = format!("{0}:{0}", port);
                    let routed = category == ServiceCategory::DownloadClients && vpn.enabled;
                    match compose.services.get_mut(GLUETUN.name) {
                        Some(gluetun) if routed => {
                            if !gluetun.ports.contains(&mapping) {
                                gluetun.ports.push(mapping);
                            }
                            service.network_mode = Some(format!("service:{}", GLUETUN.name));
                            service.networks.clear();
                        }
                        _ => service.ports = vec![mapping],
                    }
                }
                if name == "jellyfin"
                    && let Some(device) = self.transcode_device()
                {
                    service.devices = vec![device];
                }
                compose.services.insert(name.clone(), service);
            }
        }

        if system.tailscale.enabled {
            let mut tailscale = base(
                TAILSCALE.name,
                TAILSCALE.image,
                vec!["./tailscale:/var/lib/tailscale".to_string()],
            );
            tailscale.cap_add = vec!["NET_ADMIN".to_string()];
            tailscale
                .environment
                .insert("TS_AUTH_KEY".to_string(), system.tailscale.auth_key.clone());
            tailscale.network_mode = Some("host".to_string());
            tailscale.networks.clear();
            compose.services.insert(TAILSCALE.name.to_string(), tailscale);
        }

        compose
    }

    /// `.env` contents for the given configuration
    pub fn build_env(&self, system: &SystemConfig) -> String {
        let downloads_dir = system.downloads_dir_or_default();
        let mut env = format!(
            "# Generated by pvarr\n\
             # Base Configuration\n\
             PUID={}\n\
             PGID={}\n\
             TIMEZONE={}\n\
             IMAGE_RELEASE=latest\n\
             DOCKER_DIR={}\n\
             \n\
             # Media and Download Directories\n\
             MEDIA_DIR={}\n\
             DOWNLOADS_DIR={}\n\
             WATCH_DIR={}/watch\n\
             \n\
             # VPN Configuration\n",
            system.uid(),
            system.gid(),
            system.timezone_or_default(),
            system.docker_dir_or_default(),
            system.media_dir_or_default(),
            downloads_dir,
            downloads_dir,
        );

        let vpn = &system.vpn;
        if vpn.enabled {
            env.push_str(&format!(
                "VPN_CONTAINER={}\n\
                 VPN_IMAGE=qmcgaw/gluetun\n\
                 VPN_SERVICE_PROVIDER={}\n\
                 OPENVPN_USER={}\n\
                 OPENVPN_PASSWORD={}\n\
                 SERVER_REGIONS={}\n\n",
                GLUETUN.name, vpn.provider, vpn.username, vpn.password, vpn.region
            ));
        }
        if system.tailscale.enabled {
            env.push_str(&format!(
                "# Tailscale\nTAILSCALE_AUTH_KEY={}\n\n",
                system.tailscale.auth_key
            ));
        }
        env.push_str(&format!("# Network Configuration\nCONTAINER_NETWORK={}\n", CONTAINER_NETWORK));
        env
    }
}

impl ComposeBackend for ComposeGenerator {
    fn render(&self) -> Result<String> {
        let system = self.config.system_config()?;
        let services = self.config.services_config()?;
        self.build(&system, &services).to_yaml()
    }

    fn render_env(&self) -> Result<String> {
        Ok(self.build_env(&self.config.system_config()?))
    }

    fn apply(&self) -> Result<ComposeArtifacts> {
        let yaml = self.render()?;
        let env = self.render_env()?;

        let dir = self.config.config_dir();
        let compose_path = Self::compose_path(dir);
        let env_path = Self::env_path(dir);
        if let Some(parent) = compose_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&compose_path, yaml)?;
        fs::write(&env_path, env)?;

        let mut system = self.config.system_config()?;
        system.installation_status = InstallPhase::Configured;
        self.config.save_system_config(&system)?;

        info!("Compose files written to {}", compose_path.display());
        Ok(ComposeArtifacts {
            docker_compose_path: compose_path,
            env_path,
        })
    }
}
