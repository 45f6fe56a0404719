//! Config Store: durable JSON documents for system and service configuration.
//!
//! Two documents live in the config directory:
//!
//! | File            | Type             | Owner                      |
//! |-----------------|------------------|----------------------------|
//! | `config.json`   | [`SystemConfig`]   | wizard, compose, services |
//! | `services.json` | [`ServicesConfig`] | wizard, compose, services |
//!
//! Missing or unreadable documents fall back to built-in defaults; loading
//! never fails on a corrupt file. Unknown keys in `config.json` survive a
//! load/save round trip.

use crate::error::{PvarrError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};
use tracing::{debug, warn};

pub const SYSTEM_CONFIG_FILE: &str = "config.json";
pub const SERVICES_CONFIG_FILE: &str = "services.json";

/// Keys that must be present after merging user input over defaults
pub const REQUIRED_SYSTEM_KEYS: [&str; 5] = ["puid", "pgid", "timezone", "media_dir", "downloads_dir"];

pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;

// ============================================================================
// System configuration
// ============================================================================

/// Lifecycle marker persisted in `config.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstallPhase {
    #[default]
    NotStarted,
    /// Compose files have been generated and applied
    Configured,
    /// The compose stack has been started
    Running,
    /// Post-installation finished
    Completed,
}

/// VPN client settings (gluetun container)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnConfig {
    pub enabled: bool,
    pub provider: String,
    pub username: String,
    pub password: String,
    pub region: String,
}

impl VpnConfig {
    /// Names of the fields an enabled VPN needs but has empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("provider", &self.provider),
            ("username", &self.username),
            ("password", &self.password),
            ("region", &self.region),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Tailscale mesh VPN settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TailscaleConfig {
    pub enabled: bool,
    pub auth_key: String,
}

/// System configuration document.
///
/// The five required keys are optional at the type level so that a document
/// missing one of them can be represented and reported, rather than silently
/// defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_dir: Option<String>,
    #[serde(default)]
    pub vpn: VpnConfig,
    #[serde(default)]
    pub tailscale: TailscaleConfig,
    /// Mount paths that must be present before containers start at boot
    #[serde(default)]
    pub critical_mounts: Vec<String>,
    #[serde(default)]
    pub installation_status: InstallPhase,
    /// Keys pvarr does not interpret, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/home/pi".to_string());
        Self {
            puid: Some(DEFAULT_UID),
            pgid: Some(DEFAULT_GID),
            timezone: Some("UTC".to_string()),
            media_dir: Some("/mnt/media".to_string()),
            downloads_dir: Some("/mnt/downloads".to_string()),
            docker_dir: Some(format!("{}/docker", home)),
            vpn: VpnConfig {
                enabled: true,
                provider: "private internet access".to_string(),
                username: String::new(),
                password: String::new(),
                region: "Netherlands".to_string(),
            },
            tailscale: TailscaleConfig::default(),
            critical_mounts: Vec::new(),
            installation_status: InstallPhase::NotStarted,
            extra: Map::new(),
        }
    }
}

impl SystemConfig {
    pub fn uid(&self) -> u32 {
        self.puid.unwrap_or(DEFAULT_UID)
    }

    pub fn gid(&self) -> u32 {
        self.pgid.unwrap_or(DEFAULT_GID)
    }

    pub fn timezone_or_default(&self) -> &str {
        self.timezone.as_deref().unwrap_or("UTC")
    }

    pub fn media_dir_or_default(&self) -> &str {
        self.media_dir.as_deref().unwrap_or("/mnt/media")
    }

    pub fn downloads_dir_or_default(&self) -> &str {
        self.downloads_dir.as_deref().unwrap_or("/mnt/downloads")
    }

    pub fn docker_dir_or_default(&self) -> String {
        match &self.docker_dir {
            Some(dir) => dir.clone(),
            None => {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/home/pi".to_string());
                format!("{}/docker", home)
            }
        }
    }

    /// Serialize into a JSON object, dropping unset optional keys
    pub fn to_document(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(PvarrError::config(format!(
                "system config serialized to non-object: {}",
                other
            ))),
        }
    }

    pub fn from_document(doc: Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }

    /// Shallow merge: top-level keys of `overlay` replace those of `self`.
    ///
    /// Returns the merged document and the required keys it lacks.
    pub fn merged_with(&self, overlay: &Map<String, Value>) -> Result<(Map<String, Value>, Vec<&'static str>)> {
        let mut doc = self.to_document()?;
        for (key, value) in overlay {
            doc.insert(key.clone(), value.clone());
        }
        let missing = REQUIRED_SYSTEM_KEYS
            .iter()
            .copied()
            .filter(|key| !doc.contains_key(*key))
            .collect();
        Ok((doc, missing))
    }
}

// ============================================================================
// Services configuration
// ============================================================================

/// Service categories in the selection document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Display, EnumString, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceCategory {
    ArrApps,
    DownloadClients,
    MediaServers,
    Utilities,
}

/// Which optional applications are enabled, per category.
///
/// Categories absent from a loaded document keep their built-in selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub arr_apps: BTreeMap<String, bool>,
    pub download_clients: BTreeMap<String, bool>,
    pub media_servers: BTreeMap<String, bool>,
    pub utilities: BTreeMap<String, bool>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ServicesConfig {
    /// Built-in service selection
    pub fn defaults() -> Self {
        fn table(entries: &[(&str, bool)]) -> BTreeMap<String, bool> {
            entries.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
        }
        Self {
            arr_apps: table(&[
                ("sonarr", true),
                ("radarr", true),
                ("prowlarr", true),
                ("lidarr", false),
                ("readarr", false),
                ("bazarr", false),
            ]),
            download_clients: table(&[
                ("transmission", true),
                ("qbittorrent", false),
                ("nzbget", false),
                ("sabnzbd", false),
                ("jdownloader", false),
            ]),
            media_servers: table(&[("jellyfin", true), ("plex", false), ("emby", false)]),
            utilities: table(&[
                ("heimdall", false),
                ("overseerr", false),
                ("tautulli", false),
                ("portainer", true),
                ("nginx_proxy_manager", false),
                ("get_iplayer", false),
            ]),
        }
    }

    pub fn category(&self, category: ServiceCategory) -> &BTreeMap<String, bool> {
        match category {
            ServiceCategory::ArrApps => &self.arr_apps,
            ServiceCategory::DownloadClients => &self.download_clients,
            ServiceCategory::MediaServers => &self.media_servers,
            ServiceCategory::Utilities => &self.utilities,
        }
    }

    pub fn category_mut(&mut self, category: ServiceCategory) -> &mut BTreeMap<String, bool> {
        match category {
            ServiceCategory::ArrApps => &mut self.arr_apps,
            ServiceCategory::DownloadClients => &mut self.download_clients,
            ServiceCategory::MediaServers => &mut self.media_servers,
            ServiceCategory::Utilities => &mut self.utilities,
        }
    }

    pub fn any_enabled(&self, category: ServiceCategory) -> bool {
        self.category(category).values().any(|enabled| *enabled)
    }
}

// ============================================================================
// Store
// ============================================================================

/// Durable key-value persistence for the two configuration documents.
pub trait ConfigStore: Send + Sync {
    fn default_system_config(&self) -> SystemConfig;
    fn default_services_config(&self) -> ServicesConfig;

    /// Persisted system config, or defaults if missing/corrupt
    fn system_config(&self) -> Result<SystemConfig>;
    fn save_system_config(&self, config: &SystemConfig) -> Result<()>;

    /// Persisted services config, or defaults if missing/corrupt
    fn services_config(&self) -> Result<ServicesConfig>;
    fn save_services_config(&self, config: &ServicesConfig) -> Result<()>;

    /// Directory holding the documents and generated artifacts
    fn config_dir(&self) -> &Path;
}

/// Resolve the config directory: `$PVARR_CONFIG_DIR`, then
/// `$XDG_CONFIG_HOME/pvarr`, then `$HOME/.config/pvarr`.
pub fn default_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PVARR_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let base = std::env::var("XDG_CONFIG_HOME").map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
        Path::new(&home).join(".config")
    });
    base.join("pvarr")
}

/// JSON files in a config directory
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    dir: PathBuf,
    system_defaults: SystemConfig,
    services_defaults: ServicesConfig,
}

impl JsonConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_defaults(dir, SystemConfig::default(), ServicesConfig::defaults())
    }

    pub fn with_defaults(dir: impl Into<PathBuf>, system: SystemConfig, services: ServicesConfig) -> Self {
        Self {
            dir: dir.into(),
            system_defaults: system,
            services_defaults: services,
        }
    }

    fn load<T: serde::de::DeserializeOwned>(&self, file: &str, fallback: T) -> Result<T> {
        let path = self.dir.join(file);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, using defaults", path.display());
                return Ok(fallback);
            }
            Err(e) => {
                warn!("Failed to read {}: {}; using defaults", path.display(), e);
                return Ok(fallback);
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Corrupt {}: {}; using defaults", path.display(), e);
                Ok(fallback)
            }
        }
    }

    fn save<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(value)?;
        let path = self.dir.join(file);
        fs::write(&path, json)?;
        debug!("Saved {}", path.display());
        Ok(())
    }
}

impl ConfigStore for JsonConfigStore {
    fn default_system_config(&self) -> SystemConfig {
        self.system_defaults.clone()
    }

    fn default_services_config(&self) -> ServicesConfig {
        self.services_defaults.clone()
    }

    fn system_config(&self) -> Result<SystemConfig> {
        self.load(SYSTEM_CONFIG_FILE, self.system_defaults.clone())
    }

    fn save_system_config(&self, config: &SystemConfig) -> Result<()> {
        self.save(SYSTEM_CONFIG_FILE, config)
    }

    fn services_config(&self) -> Result<ServicesConfig> {
        self.load(SERVICES_CONFIG_FILE, self.services_defaults.clone())
    }

    fn save_services_config(&self, config: &ServicesConfig) -> Result<()> {
        self.save(SERVICES_CONFIG_FILE, config)
    }

    fn config_dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_yield_defaults() {
        let dir = TempDir::new().unwrap();
        let store = JsonConfigStore::new(dir.path());
        assert_eq!(store.system_config().unwrap(), store.default_system_config());
        assert_eq!(store.services_config().unwrap(), ServicesConfig::defaults());
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SYSTEM_CONFIG_FILE), "{not json").unwrap();
        fs::write(dir.path().join(SERVICES_CONFIG_FILE), "[]").unwrap();
        let store = JsonConfigStore::new(dir.path());
        assert_eq!(store.system_config().unwrap(), store.default_system_config());
        assert_eq!(store.services_config().unwrap(), ServicesConfig::defaults());
    }

    #[test]
    fn test_save_and_reload_preserves_unknown_keys() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SYSTEM_CONFIG_FILE),
            r#"{"puid": 1001, "theme": "dark", "installation_status": "configured"}"#,
        )
        .unwrap();
        let store = JsonConfigStore::new(dir.path());

        let mut config = store.system_config().unwrap();
        assert_eq!(config.puid, Some(1001));
        assert_eq!(config.pgid, None);
        assert_eq!(config.installation_status, InstallPhase::Configured);
        config.timezone = Some("Europe/London".to_string());
        store.save_system_config(&config).unwrap();

        let reloaded = store.system_config().unwrap();
        assert_eq!(reloaded.extra.get("theme"), Some(&json!("dark")));
        assert_eq!(reloaded.timezone.as_deref(), Some("Europe/London"));
    }

    #[test]
    fn test_merge_user_values_win() {
        let defaults = SystemConfig::default();
        let overlay = json!({"puid": 1005, "timezone": "Asia/Tokyo"});
        let (doc, missing) = defaults.merged_with(overlay.as_object().unwrap()).unwrap();
        assert!(missing.is_empty());
        assert_eq!(doc["puid"], json!(1005));
        assert_eq!(doc["timezone"], json!("Asia/Tokyo"));
        assert_eq!(doc["pgid"], json!(1000));
    }

    #[test]
    fn test_merge_reports_missing_required_keys() {
        let defaults = SystemConfig {
            media_dir: None,
            downloads_dir: None,
            ..SystemConfig::default()
        };
        let (_, missing) = defaults.merged_with(&Map::new()).unwrap();
        assert_eq!(missing, vec!["media_dir", "downloads_dir"]);
    }

    #[test]
    fn test_merge_replaces_nested_blocks_wholesale() {
        let defaults = SystemConfig::default();
        let overlay = json!({"vpn": {"enabled": false}});
        let (doc, _) = defaults.merged_with(overlay.as_object().unwrap()).unwrap();
        let merged = SystemConfig::from_document(doc).unwrap();
        assert!(!merged.vpn.enabled);
        assert_eq!(merged.vpn.region, "");
    }

    #[test]
    fn test_vpn_missing_fields() {
        let vpn = VpnConfig {
            enabled: true,
            provider: "mullvad".to_string(),
            ..VpnConfig::default()
        };
        assert_eq!(vpn.missing_fields(), vec!["username", "password", "region"]);
    }

    #[test]
    fn test_partial_services_document_keeps_builtin_categories() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SERVICES_CONFIG_FILE),
            r#"{"media_servers": {"jellyfin": false, "plex": true}}"#,
        )
        .unwrap();
        let store = JsonConfigStore::new(dir.path());
        let services = store.services_config().unwrap();
        assert_eq!(services.media_servers.get("plex"), Some(&true));
        assert_eq!(services.media_servers.get("jellyfin"), Some(&false));
        assert_eq!(services.arr_apps, ServicesConfig::defaults().arr_apps);
        assert_eq!(services.utilities.get("portainer"), Some(&true));
    }

    #[test]
    fn test_empty_services_document_yields_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SERVICES_CONFIG_FILE), "{}").unwrap();
        let store = JsonConfigStore::new(dir.path());
        assert_eq!(store.services_config().unwrap(), ServicesConfig::defaults());
    }

    #[test]
    fn test_category_names_match_document_keys() {
        let doc = serde_json::to_value(ServicesConfig::defaults()).unwrap();
        for category in ServiceCategory::iter() {
            assert!(doc.get(category.to_string()).is_some(), "{}", category);
        }
    }
}
