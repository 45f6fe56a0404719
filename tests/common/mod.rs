//! In-memory collaborators for wizard tests.
//!
//! Every fake counts its calls so tests can assert that a stage did, or did
//! not, reach a collaborator.

#![allow(dead_code)]

use pvarr::command::{CommandOutput, CommandRunner};
use pvarr::compose::{ComposeArtifacts, ComposeBackend};
use pvarr::config::{JsonConfigStore, ServicesConfig, SystemConfig, TailscaleConfig, VpnConfig};
use pvarr::docker::ContainerInfo;
use pvarr::error::{PvarrError, Result};
use pvarr::network::NetworkBackend;
use pvarr::outcome::OpResult;
use pvarr::services::{ServiceCatalogView, ServiceOrchestrator, StackResult};
use pvarr::storage::{MountRequest, ShareSpec, StorageBackend, TreeResult};
use pvarr::system_info::{DiskInfo, MemoryInfo, SystemInspector, SystemSnapshot};
use pvarr::wizard::{Collaborators, InstallWizard, WizardSettings};
use pvarr::Status;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

// ============================================================================
// Command runner
// ============================================================================

/// Records every command line; replies by first matching prefix
pub struct FakeRunner {
    pub privileged: bool,
    pub sudo: bool,
    replies: Mutex<Vec<(String, CommandOutput)>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn root() -> Self {
        Self {
            privileged: true,
            sudo: false,
            replies: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unprivileged() -> Self {
        Self {
            privileged: false,
            ..Self::root()
        }
    }

    /// Not root, but `sudo -n true` succeeds
    pub fn with_sudo() -> Self {
        Self {
            sudo: true,
            ..Self::unprivileged()
        }
    }

    pub fn reply(&self, prefix: &str, output: CommandOutput) {
        self.replies.lock().unwrap().push((prefix.to_string(), output));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());

        if line == "sudo -n true" {
            return Ok(if self.sudo {
                CommandOutput::ok("")
            } else {
                CommandOutput::failed("sudo: a password is required")
            });
        }
        let replies = self.replies.lock().unwrap();
        Ok(replies
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn is_privileged(&self) -> bool {
        self.privileged
    }
}

// ============================================================================
// Inspector
// ============================================================================

pub struct FakeInspector {
    pub snapshot: Mutex<SystemSnapshot>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeInspector {
    pub fn new(memory_gb: f64, free_disk_gb: f64, docker: bool) -> Self {
        Self {
            snapshot: Mutex::new(SystemSnapshot {
                hostname: "pvarr-test".to_string(),
                architecture: "aarch64".to_string(),
                memory: MemoryInfo {
                    total_gb: memory_gb,
                    ..MemoryInfo::default()
                },
                disk: DiskInfo {
                    free_gb: free_disk_gb,
                    ..DiskInfo::default()
                },
                docker_installed: docker,
                ..SystemSnapshot::default()
            }),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(8.0, 100.0, true)
        }
    }
}

impl SystemInspector for FakeInspector {
    fn snapshot(&self) -> Result<SystemSnapshot> {
        bump(&self.calls);
        if self.fail {
            return Err(PvarrError::general("probe exploded"));
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Default)]
pub struct FakeStorage {
    /// Devices that fail validation
    pub invalid_devices: HashSet<String>,
    /// Devices whose mount fails
    pub unmountable: HashSet<String>,
    /// Paths that fail the write check
    pub unwritable: HashSet<String>,
    pub tree_fails: bool,
    pub mounts: Mutex<Vec<MountRequest>>,
    pub unmounts: Mutex<Vec<String>>,
    pub shares: Mutex<Vec<ShareSpec>>,
    pub validate_calls: AtomicUsize,
    pub media_calls: AtomicUsize,
    pub share_calls: AtomicUsize,
}

impl StorageBackend for FakeStorage {
    fn validate_device(&self, device: &str, _fs_type: &str) -> Result<OpResult> {
        bump(&self.validate_calls);
        Ok(if self.invalid_devices.contains(device) {
            OpResult::error(format!("Device {} does not exist", device))
        } else {
            OpResult::success(format!("Device {} is valid", device))
        })
    }

    fn mount(&self, request: &MountRequest) -> Result<OpResult> {
        self.mounts.lock().unwrap().push(request.clone());
        Ok(if self.unmountable.contains(&request.device) {
            OpResult::error("mount: wrong fs type")
        } else {
            OpResult::success(format!("Mounted {} to {}", request.device, request.path))
        })
    }

    fn unmount(&self, path: &str) -> Result<OpResult> {
        self.unmounts.lock().unwrap().push(path.to_string());
        Ok(OpResult::success(format!("Unmounted {}", path)))
    }

    fn verify_writable(&self, path: &str, _uid: u32, _gid: u32) -> Result<OpResult> {
        Ok(if self.unwritable.contains(path) {
            OpResult::error("Permission denied")
        } else {
            OpResult::success(format!("{} is writable", path))
        })
    }

    fn create_media_tree(&self, base: &str, _uid: u32, _gid: u32) -> Result<TreeResult> {
        bump(&self.media_calls);
        Ok(TreeResult {
            status: if self.tree_fails { Status::Error } else { Status::Success },
            message: if self.tree_fails {
                "read-only file system".to_string()
            } else {
                format!("Created media tree in {}", base)
            },
            details: Vec::new(),
        })
    }

    fn add_share(&self, share: &ShareSpec) -> Result<OpResult> {
        bump(&self.share_calls);
        self.shares.lock().unwrap().push(share.clone());
        Ok(OpResult::success(format!("Share {} added", share.name)))
    }
}

// ============================================================================
// Network
// ============================================================================

#[derive(Default)]
pub struct FakeNetwork {
    pub vpn_calls: AtomicUsize,
    pub tailscale_calls: AtomicUsize,
}

impl NetworkBackend for FakeNetwork {
    fn configure_vpn(&self, _config: &VpnConfig) -> Result<OpResult> {
        bump(&self.vpn_calls);
        Ok(OpResult::warning("gluetun settings written but not verified"))
    }

    fn configure_tailscale(&self, _config: &TailscaleConfig) -> Result<OpResult> {
        bump(&self.tailscale_calls);
        Ok(OpResult::success("Tailscale connected"))
    }
}

// ============================================================================
// Compose
// ============================================================================

#[derive(Default)]
pub struct FakeCompose {
    pub fail_render: bool,
    /// `render` panics instead of returning
    pub panic_render: bool,
    pub calls: AtomicUsize,
}

impl ComposeBackend for FakeCompose {
    fn render(&self) -> Result<String> {
        bump(&self.calls);
        if self.panic_render {
            panic!("template engine crashed");
        }
        if self.fail_render {
            return Err(PvarrError::general("template missing"));
        }
        Ok("services: {}\n".to_string())
    }

    fn render_env(&self) -> Result<String> {
        Ok("PUID=1000\n".to_string())
    }

    fn apply(&self) -> Result<ComposeArtifacts> {
        Ok(ComposeArtifacts {
            docker_compose_path: "/tmp/pvarr/docker-compose.yml".into(),
            env_path: "/tmp/pvarr/.env".into(),
        })
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Lets a test hold `start` open while it pokes at the wizard
pub struct StartLatch {
    pub entered: Sender<()>,
    pub release: Mutex<Receiver<()>>,
}

pub struct FakeOrchestrator {
    pub start_result: StackResult,
    pub containers: Mutex<BTreeMap<String, ContainerInfo>>,
    pub latch: Option<StartLatch>,
    pub start_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

pub fn container(status: &str, url: Option<&str>) -> ContainerInfo {
    ContainerInfo {
        status: status.to_string(),
        image: "lscr.io/linuxserver/test:latest".to_string(),
        description: "test container".to_string(),
        ports: Vec::new(),
        url: url.map(str::to_string),
    }
}

impl Default for FakeOrchestrator {
    fn default() -> Self {
        let mut containers = BTreeMap::new();
        containers.insert("sonarr".to_string(), container("running", Some("http://pvarr-test:8989")));
        containers.insert("jellyfin".to_string(), container("running", Some("http://pvarr-test:8096")));
        Self {
            start_result: StackResult::success("Services started", "Creating sonarr ... done"),
            containers: Mutex::new(containers),
            latch: None,
            start_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }
}

impl ServiceOrchestrator for FakeOrchestrator {
    fn start(&self) -> Result<StackResult> {
        bump(&self.start_calls);
        if let Some(latch) = &self.latch {
            let _ = latch.entered.send(());
            let _ = latch.release.lock().unwrap().recv();
        }
        Ok(self.start_result.clone())
    }

    fn stop(&self) -> Result<StackResult> {
        Ok(StackResult::success("Services stopped", ""))
    }

    fn restart(&self) -> Result<StackResult> {
        Ok(StackResult::success("Services restarted", ""))
    }

    fn container_status(&self) -> Result<BTreeMap<String, ContainerInfo>> {
        bump(&self.status_calls);
        Ok(self.containers.lock().unwrap().clone())
    }

    fn service_info(&self) -> Result<ServiceCatalogView> {
        Ok(ServiceCatalogView::new())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A wizard wired to fakes, rooted in a temp directory
pub struct Harness {
    pub dir: TempDir,
    pub config: Arc<JsonConfigStore>,
    pub inspector: Arc<FakeInspector>,
    pub storage: Arc<FakeStorage>,
    pub network: Arc<FakeNetwork>,
    pub compose: Arc<FakeCompose>,
    pub orchestrator: Arc<FakeOrchestrator>,
    pub runner: Arc<FakeRunner>,
}

pub struct HarnessBuilder {
    system_defaults: SystemConfig,
    inspector: FakeInspector,
    storage: FakeStorage,
    compose: FakeCompose,
    orchestrator: FakeOrchestrator,
    runner: FakeRunner,
}

impl HarnessBuilder {
    pub fn system_defaults(mut self, config: SystemConfig) -> Self {
        self.system_defaults = config;
        self
    }

    pub fn inspector(mut self, inspector: FakeInspector) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn storage(mut self, storage: FakeStorage) -> Self {
        self.storage = storage;
        self
    }

    pub fn compose(mut self, compose: FakeCompose) -> Self {
        self.compose = compose;
        self
    }

    pub fn orchestrator(mut self, orchestrator: FakeOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn runner(mut self, runner: FakeRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn build(self) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(JsonConfigStore::with_defaults(
            dir.path().join("config"),
            self.system_defaults,
            ServicesConfig::defaults(),
        ));
        Harness {
            dir,
            config,
            inspector: Arc::new(self.inspector),
            storage: Arc::new(self.storage),
            network: Arc::new(FakeNetwork::default()),
            compose: Arc::new(self.compose),
            orchestrator: Arc::new(self.orchestrator),
            runner: Arc::new(self.runner),
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            system_defaults: SystemConfig::default(),
            inspector: FakeInspector::new(8.0, 100.0, true),
            storage: FakeStorage::default(),
            compose: FakeCompose::default(),
            orchestrator: FakeOrchestrator::default(),
            runner: FakeRunner::root(),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn system_root(&self) -> std::path::PathBuf {
        self.dir.path().join("root")
    }

    pub fn install_root(&self) -> std::path::PathBuf {
        self.dir.path().join("opt/pvarr")
    }

    pub fn settings(&self) -> WizardSettings {
        let system_root = self.system_root();
        std::fs::create_dir_all(system_root.join("etc")).unwrap();
        WizardSettings {
            system_root,
            install_root: self.install_root(),
            docker_install_url: "https://get.docker.com".to_string(),
            docker_script_path: self.dir.path().join("get-docker.sh"),
            current_user: Some("pi".to_string()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            config: self.config.clone(),
            inspector: self.inspector.clone(),
            storage: self.storage.clone(),
            network: self.network.clone(),
            compose: self.compose.clone(),
            orchestrator: self.orchestrator.clone(),
            runner: self.runner.clone(),
        }
    }

    pub fn wizard(&self) -> InstallWizard {
        InstallWizard::new(self.collaborators(), self.settings())
    }
}
