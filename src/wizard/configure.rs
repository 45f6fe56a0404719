//! Stages 2, 3 and 5: basic settings, network settings and service selection.

use super::{InstallWizard, NetworkRequest, StageResult};
use crate::config::{ServiceCategory, ServicesConfig, SystemConfig};
use crate::install_state::Stage;
use serde::Serialize;
use serde_json::{Map, Value};
use strum::IntoEnumIterator;
use tracing::warn;

/// The system configuration as persisted by a stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigPayload {
    pub config: SystemConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicesPayload {
    pub services: ServicesConfig,
}

/// Loose boolean reading of a JSON value: null, false, zero and empty
/// strings, arrays and objects are false.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

impl InstallWizard {
    pub(super) fn basic_config_stage(&self, user_config: &Map<String, Value>) -> StageResult<ConfigPayload> {
        let stage = Stage::ConfigSetup;
        self.status.update_progress(stage, 10);
        self.status.add_log("Setting up basic configuration");

        self.guarded("basic configuration setup", || {
            let defaults = self.deps.config.default_system_config();
            let (merged, missing) = defaults.merged_with(user_config)?;
            if !missing.is_empty() {
                let message = format!("Missing required configuration fields: {}", missing.join(", "));
                self.status.add_error(&message);
                return Ok(StageResult::error(message));
            }

            self.status.update_progress(stage, 50);
            let config = SystemConfig::from_document(merged)?;
            self.deps.config.save_system_config(&config)?;

            self.status.update_progress(stage, 100);
            self.status.add_log("Basic configuration setup completed");
            Ok(StageResult::success(
                "Basic configuration setup completed",
                ConfigPayload { config },
            ))
        })
    }

    pub(super) fn network_stage(&self, request: &NetworkRequest) -> StageResult<ConfigPayload> {
        let stage = Stage::NetworkSetup;
        self.status.update_progress(stage, 10);
        self.status.add_log("Setting up network configuration");

        self.guarded("network configuration setup", || {
            let mut config = self.load_system_config()?;

            if let Some(vpn) = &request.vpn {
                self.status.update_progress(stage, 30);
                self.status.add_log("Configuring VPN settings");
                config.vpn = vpn.clone();
                if config.vpn.enabled {
                    let missing = config.vpn.missing_fields();
                    if !missing.is_empty() {
                        self.status
                            .add_warning(format!("VPN enabled but missing fields: {}", missing.join(", ")));
                    }
                }
            }

            if let Some(tailscale) = &request.tailscale {
                self.status.update_progress(stage, 60);
                self.status.add_log("Configuring Tailscale settings");
                config.tailscale = tailscale.clone();
                if config.tailscale.enabled && config.tailscale.auth_key.is_empty() {
                    self.status.add_warning("Tailscale enabled but no auth key provided");
                }
            }

            // Activation is advisory at install time; outcomes are only logged
            if config.vpn.enabled {
                self.status.update_progress(stage, 80);
                self.status.add_log(format!(
                    "Configuring VPN through network manager: {}",
                    config.vpn.provider
                ));
                let outcome = self.deps.network.configure_vpn(&config.vpn)?;
                if !outcome.is_success() {
                    warn!("VPN activation reported {}: {}", outcome.status, outcome.message);
                }
            }

            if config.tailscale.enabled {
                self.status.update_progress(stage, 90);
                self.status.add_log("Configuring Tailscale through network manager");
                let outcome = self.deps.network.configure_tailscale(&config.tailscale)?;
                if !outcome.is_success() {
                    warn!("Tailscale activation reported {}: {}", outcome.status, outcome.message);
                }
            }

            self.deps.config.save_system_config(&config)?;
            self.status.update_progress(stage, 100);
            self.status.add_log("Network configuration setup completed");
            Ok(StageResult::success(
                "Network configuration setup completed",
                ConfigPayload { config },
            ))
        })
    }

    pub(super) fn service_selection_stage(&self, selection: &Map<String, Value>) -> StageResult<ServicesPayload> {
        let stage = Stage::ServiceSelection;
        self.status.update_progress(stage, 10);
        self.status.add_log("Setting up service selection");

        self.guarded("service selection setup", || {
            let mut services = self.deps.config.default_services_config();

            for category in ServiceCategory::iter() {
                let key = category.to_string();
                let Some(requested) = selection.get(&key) else {
                    continue;
                };
                self.status.add_log(format!("Configuring {}", key));
                let Value::Object(requested) = requested else {
                    self.status
                        .add_error(format!("Invalid {} configuration: must be a dictionary", key));
                    continue;
                };

                let table = services.category_mut(category);
                for (name, value) in requested {
                    // Unknown names are ignored
                    if let Some(slot) = table.get_mut(name) {
                        *slot = truthy(value);
                        self.status.add_log(format!(
                            "Service {}: {}",
                            name,
                            if *slot { "Enabled" } else { "Disabled" }
                        ));
                    }
                }
            }

            self.status.update_progress(stage, 50);
            if !services.any_enabled(ServiceCategory::DownloadClients) {
                self.status.add_warning("No download client selected");
            }
            if !services.any_enabled(ServiceCategory::MediaServers) {
                self.status.add_warning("No media server selected");
            }

            self.deps.config.save_services_config(&services)?;
            self.status.update_progress(stage, 100);
            self.status.add_log("Service selection setup completed");
            Ok(StageResult::success(
                "Service selection setup completed",
                ServicesPayload { services },
            ))
        })
    }
}
