//! Installation wizard: a twelve-stage state machine that takes a host from
//! bare OS to a running media stack.
//!
//! Each stage has a public entry point returning a [`StageResult`];
//! [`InstallWizard::run_installation`] drives all of them in order and stops
//! at the first stage reporting an error. Progress and logs accumulate in a
//! [`StatusTracker`] that callers can read at any time.
//!
//! One wizard handle serves one operation at a time. A second call while
//! another is in flight fails with [`PvarrError::Busy`] instead of racing on
//! the shared status.

mod boot;
mod configure;
mod deploy;
mod packages;
mod precheck;
mod provision;
mod request;
mod result;
mod storage;

pub use boot::MountWaitMethod;
pub use configure::{ConfigPayload, ServicesPayload};
pub use deploy::{ContainerOutput, ContainerSummary, FinalSummary, PostInstallReport, ServiceStartReport};
pub use packages::Distro;
pub use precheck::{CompatibilityChecks, CompatibilityReport, DockerCheck, ResourceCheck};
pub use provision::{CommandRecord, DependencyReport};
pub use request::{FileSharingRequest, InstallationRequest, MountPointSpec, NetworkRequest, StorageRequest};
pub use result::StageResult;

use crate::command::{CommandRunner, Elevation};
use crate::compose::{ComposeArtifacts, ComposeBackend};
use crate::config::{ConfigStore, SystemConfig};
use crate::error::{PvarrError, Result};
use crate::install_state::{InstallStatus, InstallationSnapshot, Stage, StatusTracker};
use crate::network::NetworkBackend;
use crate::services::ServiceOrchestrator;
use crate::storage::StorageBackend;
use crate::system_info::SystemInspector;
use serde_json::{Map, Value};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything the wizard delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub config: Arc<dyn ConfigStore>,
    pub inspector: Arc<dyn SystemInspector>,
    pub storage: Arc<dyn StorageBackend>,
    pub network: Arc<dyn NetworkBackend>,
    pub compose: Arc<dyn ComposeBackend>,
    pub orchestrator: Arc<dyn ServiceOrchestrator>,
    pub runner: Arc<dyn CommandRunner>,
}

/// Host locations the wizard touches directly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardSettings {
    /// Prefix for `/etc` probes and the systemd unit directory
    pub system_root: PathBuf,
    /// Mount-wait script and critical mount list live under here
    pub install_root: PathBuf,
    pub docker_install_url: String,
    /// Scratch location for the downloaded Docker installer
    pub docker_script_path: PathBuf,
    /// Account to add to the `docker` group
    pub current_user: Option<String>,
}

impl Default for WizardSettings {
    fn default() -> Self {
        Self {
            system_root: PathBuf::from("/"),
            install_root: PathBuf::from("/opt/pvarr"),
            docker_install_url: "https://get.docker.com".to_string(),
            docker_script_path: PathBuf::from("/tmp/get-docker.sh"),
            current_user: std::env::var("USER").ok().filter(|u| !u.is_empty()),
        }
    }
}

/// Clears the busy flag when the operation ends, even by panic
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct InstallWizard {
    deps: Collaborators,
    settings: WizardSettings,
    status: StatusTracker,
    busy: AtomicBool,
}

impl InstallWizard {
    pub fn new(deps: Collaborators, settings: WizardSettings) -> Self {
        Self {
            deps,
            settings,
            status: StatusTracker::new(),
            busy: AtomicBool::new(false),
        }
    }

    /// Shared handle to the live status record
    pub fn tracker(&self) -> StatusTracker {
        self.status.clone()
    }

    pub fn installation_status(&self) -> InstallationSnapshot {
        self.status.snapshot()
    }

    pub fn settings(&self) -> &WizardSettings {
        &self.settings
    }

    fn enter(&self, operation: &str) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PvarrError::busy(format!("cannot start {} while another operation is running", operation)))?;
        debug!("wizard operation started: {}", operation);
        Ok(BusyGuard(&self.busy))
    }

    fn elevation(&self) -> Elevation {
        Elevation::detect(self.deps.runner.as_ref())
    }

    /// Run `stage`, turning an unexpected error into an error result
    fn guarded<T>(&self, context: &str, stage: impl FnOnce() -> Result<StageResult<T>>) -> StageResult<T> {
        match stage() {
            Ok(result) => result,
            Err(e) => {
                let message = format!("Error during {}: {}", context, e);
                self.status.add_error(&message);
                StageResult::error(message)
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage entry points
    // ------------------------------------------------------------------

    pub fn check_system_compatibility(&self) -> Result<StageResult<CompatibilityReport>> {
        let _busy = self.enter("system compatibility check")?;
        Ok(self.compatibility_stage())
    }

    pub fn setup_basic_configuration(&self, user_config: &Map<String, Value>) -> Result<StageResult<ConfigPayload>> {
        let _busy = self.enter("basic configuration setup")?;
        Ok(self.basic_config_stage(user_config))
    }

    pub fn setup_network_configuration(&self, network: &NetworkRequest) -> Result<StageResult<ConfigPayload>> {
        let _busy = self.enter("network configuration setup")?;
        Ok(self.network_stage(network))
    }

    pub fn setup_storage_configuration(&self, storage: &StorageRequest) -> Result<StageResult<ConfigPayload>> {
        let _busy = self.enter("storage configuration setup")?;
        Ok(self.storage_stage(storage))
    }

    pub fn setup_service_selection(&self, services: &Map<String, Value>) -> Result<StageResult<ServicesPayload>> {
        let _busy = self.enter("service selection setup")?;
        Ok(self.service_selection_stage(services))
    }

    pub fn install_dependencies(&self) -> Result<StageResult<DependencyReport>> {
        let _busy = self.enter("dependency installation")?;
        Ok(self.dependency_stage())
    }

    pub fn setup_docker(&self) -> Result<StageResult<()>> {
        let _busy = self.enter("Docker setup")?;
        Ok(self.docker_stage())
    }

    pub fn generate_compose_files(&self) -> Result<StageResult<ComposeArtifacts>> {
        let _busy = self.enter("Docker Compose generation")?;
        Ok(self.compose_stage())
    }

    pub fn create_containers(&self) -> Result<StageResult<ContainerOutput>> {
        let _busy = self.enter("container creation")?;
        Ok(self.container_stage())
    }

    pub fn start_services(&self) -> Result<StageResult<ServiceStartReport>> {
        let _busy = self.enter("service start")?;
        Ok(self.service_start_stage())
    }

    pub fn perform_post_installation(&self) -> Result<StageResult<PostInstallReport>> {
        let _busy = self.enter("post-installation")?;
        Ok(self.post_install_stage())
    }

    pub fn finalize_installation(&self) -> Result<StageResult<FinalSummary>> {
        let _busy = self.enter("finalization")?;
        Ok(self.finalize_stage())
    }

    /// Run one stage from a JSON input document and return its JSON result.
    ///
    /// `Value::Null` is treated as an empty object.
    pub fn run_stage(&self, stage: Stage, input: Value) -> Result<Value> {
        let input = match input {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let output = match stage {
            Stage::PreCheck => serde_json::to_value(self.check_system_compatibility()?)?,
            Stage::ConfigSetup => {
                let user_config: Map<String, Value> = serde_json::from_value(input)?;
                serde_json::to_value(self.setup_basic_configuration(&user_config)?)?
            }
            Stage::NetworkSetup => {
                let network: NetworkRequest = serde_json::from_value(input)?;
                serde_json::to_value(self.setup_network_configuration(&network)?)?
            }
            Stage::StorageSetup => {
                let storage: StorageRequest = serde_json::from_value(input)?;
                serde_json::to_value(self.setup_storage_configuration(&storage)?)?
            }
            Stage::ServiceSelection => {
                let services: Map<String, Value> = serde_json::from_value(input)?;
                serde_json::to_value(self.setup_service_selection(&services)?)?
            }
            Stage::DependencyInstall => serde_json::to_value(self.install_dependencies()?)?,
            Stage::DockerSetup => serde_json::to_value(self.setup_docker()?)?,
            Stage::ComposeGeneration => serde_json::to_value(self.generate_compose_files()?)?,
            Stage::ContainerCreation => serde_json::to_value(self.create_containers()?)?,
            Stage::ServiceStart => serde_json::to_value(self.start_services()?)?,
            Stage::PostInstall => serde_json::to_value(self.perform_post_installation()?)?,
            Stage::Finalization => serde_json::to_value(self.finalize_installation()?)?,
        };
        Ok(output)
    }

    // ------------------------------------------------------------------
    // Full run
    // ------------------------------------------------------------------

    /// Run every stage in order, stopping at the first error.
    ///
    /// Resets the status record first. Always returns the final snapshot; the
    /// only error is [`PvarrError::Busy`].
    pub fn run_installation(&self, request: &InstallationRequest) -> Result<InstallationSnapshot> {
        let _busy = self.enter("installation")?;

        self.status.reset();
        self.status.with(|s| {
            s.set_status(InstallStatus::InProgress);
            s.mark_started();
        });
        self.status.add_log("Starting installation process");

        match panic::catch_unwind(AssertUnwindSafe(|| self.run_stages(request))) {
            Ok(true) => {
                self.status.set_status(InstallStatus::Completed);
                self.status.add_log("Installation process completed successfully");
                info!("installation completed");
            }
            Ok(false) => {
                self.status.set_status(InstallStatus::Failed);
                info!("installation failed at {}", self.status.snapshot().current_stage);
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.status
                    .add_error(format!("Unexpected error during installation: {}", reason));
                self.status.set_status(InstallStatus::Failed);
            }
        }

        Ok(self.status.snapshot())
    }

    /// Returns false as soon as a stage reports an error
    fn run_stages(&self, request: &InstallationRequest) -> bool {
        self.status.add_log("Step 1: System compatibility check");
        let compatibility = self.compatibility_stage();
        if compatibility.is_error() {
            return false;
        }
        if compatibility.data().is_some_and(|report| !report.compatible) {
            self.status
                .add_warning("System may not be fully compatible. Continuing anyway.");
        }

        self.status.add_log("Step 2: Basic configuration setup");
        if self.basic_config_stage(&request.user_config).is_error() {
            return false;
        }

        self.status.add_log("Step 3: Network configuration setup");
        if self.network_stage(&request.network_config).is_error() {
            return false;
        }

        self.status.add_log("Step 4: Storage configuration setup");
        if self.storage_stage(&request.storage_config).is_error() {
            return false;
        }

        self.status.add_log("Step 5: Service selection setup");
        if self.service_selection_stage(&request.services_config).is_error() {
            return false;
        }

        self.status.add_log("Step 6: Installing dependencies");
        if self.dependency_stage().is_error() {
            return false;
        }

        self.status.add_log("Step 7: Setting up Docker");
        if self.docker_stage().is_error() {
            return false;
        }

        self.status.add_log("Step 8: Generating Docker Compose files");
        if self.compose_stage().is_error() {
            return false;
        }

        self.status.add_log("Step 9: Creating Docker containers");
        if self.container_stage().is_error() {
            return false;
        }

        self.status.add_log("Step 10: Starting services");
        if self.service_start_stage().is_error() {
            return false;
        }

        self.status.add_log("Step 11: Post-installation configuration");
        if self.post_install_stage().is_error() {
            return false;
        }

        self.status.add_log("Step 12: Finalizing installation");
        !self.finalize_stage().is_error()
    }

    fn load_system_config(&self) -> Result<SystemConfig> {
        self.deps.config.system_config()
    }
}
