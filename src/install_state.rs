//! Install State
//!
//! Stage registry, weighted progress model and the status record that every
//! wizard stage reads and appends to.
//!
//! # Stage Flow
//!
//! ```text
//! pre_check (5)
//!     ↓
//! config_setup (5)
//!     ↓
//! network_setup (10)
//!     ↓
//! storage_setup (10)
//!     ↓
//! service_selection (5)
//!     ↓
//! dependency_install (10)
//!     ↓
//! docker_setup (15)
//!     ↓
//! compose_generation (10)
//!     ↓
//! container_creation (15)
//!     ↓
//! service_start (10)
//!     ↓
//! post_install (5)
//!     ↓
//! finalization (0)
//! ```
//!
//! Overall progress is recomputed from scratch on every update: the full
//! weight of every stage before the current one, plus the current stage's
//! weight scaled by its own progress, truncated and clamped to `0..=100`.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use strum::{EnumIter, EnumString, IntoEnumIterator};
use tracing::{error, info, warn};

// ============================================================================
// Stage registry
// ============================================================================

/// Installation stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Serialize, Deserialize, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Stage {
    PreCheck = 0,
    ConfigSetup = 1,
    NetworkSetup = 2,
    StorageSetup = 3,
    ServiceSelection = 4,
    DependencyInstall = 5,
    DockerSetup = 6,
    ComposeGeneration = 7,
    ContainerCreation = 8,
    ServiceStart = 9,
    PostInstall = 10,
    Finalization = 11,
}

impl Stage {
    /// Position in the fixed stage order
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Share of overall progress this stage accounts for. Sums to 100.
    pub const fn weight(self) -> u8 {
        match self {
            Self::PreCheck => 5,
            Self::ConfigSetup => 5,
            Self::NetworkSetup => 10,
            Self::StorageSetup => 10,
            Self::ServiceSelection => 5,
            Self::DependencyInstall => 10,
            Self::DockerSetup => 15,
            Self::ComposeGeneration => 10,
            Self::ContainerCreation => 15,
            Self::ServiceStart => 10,
            Self::PostInstall => 5,
            Self::Finalization => 0,
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::PreCheck => "System Compatibility Check",
            Self::ConfigSetup => "Basic Configuration Setup",
            Self::NetworkSetup => "Network Configuration",
            Self::StorageSetup => "Storage Configuration",
            Self::ServiceSelection => "Service Selection",
            Self::DependencyInstall => "Installing Dependencies",
            Self::DockerSetup => "Setting up Docker",
            Self::ComposeGeneration => "Generating Docker Compose Files",
            Self::ContainerCreation => "Creating Containers",
            Self::ServiceStart => "Starting Services",
            Self::PostInstall => "Post-Installation Configuration",
            Self::Finalization => "Finalizing Installation",
        }
    }

    /// Stable identifier, e.g. `docker_setup`
    pub fn id(self) -> &'static str {
        match self {
            Self::PreCheck => "pre_check",
            Self::ConfigSetup => "config_setup",
            Self::NetworkSetup => "network_setup",
            Self::StorageSetup => "storage_setup",
            Self::ServiceSelection => "service_selection",
            Self::DependencyInstall => "dependency_install",
            Self::DockerSetup => "docker_setup",
            Self::ComposeGeneration => "compose_generation",
            Self::ContainerCreation => "container_creation",
            Self::ServiceStart => "service_start",
            Self::PostInstall => "post_install",
            Self::Finalization => "finalization",
        }
    }

    pub fn next(self) -> Option<Self> {
        Self::iter().nth(self.order() as usize + 1)
    }

    /// All stages in order
    pub fn all() -> Vec<Self> {
        Self::iter().collect()
    }

    /// Sum of the weights of every stage strictly before this one
    pub fn completed_weight(self) -> u32 {
        Self::iter()
            .take_while(|s| *s != self)
            .map(|s| u32::from(s.weight()))
            .sum()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Overall progress for `stage` at `stage_progress` percent.
///
/// `stage_progress` may lie outside `0..=100`; it is clamped before scaling.
pub fn overall_progress(stage: Stage, stage_progress: i64) -> u8 {
    let completed = i64::from(stage.completed_weight()) * 100;
    let current = i64::from(stage.weight()) * stage_progress.clamp(0, 100);
    // Integer division truncates toward zero
    let overall = (completed + current) / 100;
    overall.clamp(0, 100) as u8
}

// ============================================================================
// Installation status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstallStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

fn log_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Seconds since the Unix epoch
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Progress and log record of one installation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallationStatus {
    current_stage: Stage,
    stage_progress: u8,
    overall_progress: u8,
    status: InstallStatus,
    logs: Vec<String>,
    errors: Vec<String>,
    start_time: Option<f64>,
    end_time: Option<f64>,
}

impl Default for InstallationStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallationStatus {
    pub fn new() -> Self {
        Self {
            current_stage: Stage::PreCheck,
            stage_progress: 0,
            overall_progress: 0,
            status: InstallStatus::NotStarted,
            logs: Vec::new(),
            errors: Vec::new(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn update_progress(&mut self, stage: Stage, progress: i64) {
        self.current_stage = stage;
        let progress = progress.clamp(0, 100);
        self.stage_progress = progress as u8;
        self.overall_progress = overall_progress(stage, progress);
    }

    pub fn add_log(&mut self, message: &str) {
        info!("{}", message);
        self.logs.push(format!("[{}] {}", log_timestamp(), message));
    }

    /// Logged with a `WARNING: ` prefix
    pub fn add_warning(&mut self, message: &str) {
        warn!("{}", message);
        self.logs.push(format!("[{}] WARNING: {}", log_timestamp(), message));
    }

    /// Appended to both the error list and the log
    pub fn add_error(&mut self, message: &str) {
        error!("{}", message);
        let entry = format!("[{}] ERROR: {}", log_timestamp(), message);
        self.errors.push(entry.clone());
        self.logs.push(entry);
    }

    #[inline]
    pub fn current_stage(&self) -> Stage {
        self.current_stage
    }

    #[inline]
    pub fn stage_progress(&self) -> u8 {
        self.stage_progress
    }

    #[inline]
    pub fn overall_progress(&self) -> u8 {
        self.overall_progress
    }

    #[inline]
    pub fn status(&self) -> InstallStatus {
        self.status
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    /// Present only when both timestamps are set
    pub fn elapsed_time(&self) -> Option<f64> {
        Some(self.end_time? - self.start_time?)
    }

    pub fn set_status(&mut self, status: InstallStatus) {
        self.status = status;
    }

    pub fn mark_started(&mut self) {
        self.start_time = Some(epoch_seconds());
        self.status = InstallStatus::InProgress;
    }

    pub fn mark_finished(&mut self) -> f64 {
        let now = epoch_seconds();
        self.end_time = Some(now);
        now
    }

    pub fn snapshot(&self) -> InstallationSnapshot {
        InstallationSnapshot {
            current_stage: self.current_stage,
            current_stage_name: self.current_stage.display_name().to_string(),
            stage_progress: self.stage_progress,
            overall_progress: self.overall_progress,
            status: self.status,
            logs: self.logs.clone(),
            errors: self.errors.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            elapsed_time: self.elapsed_time(),
        }
    }
}

/// Serializable copy of an [`InstallationStatus`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationSnapshot {
    pub current_stage: Stage,
    pub current_stage_name: String,
    pub stage_progress: u8,
    pub overall_progress: u8,
    pub status: InstallStatus,
    pub logs: Vec<String>,
    pub errors: Vec<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub elapsed_time: Option<f64>,
}

// ============================================================================
// Shared handle
// ============================================================================

/// Cloneable handle to one [`InstallationStatus`].
///
/// Readers may take snapshots while a stage is writing.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    inner: Arc<Mutex<InstallationStatus>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InstallationStatus> {
        // A panicking writer leaves the record usable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with exclusive access to the record
    pub fn with<R>(&self, f: impl FnOnce(&mut InstallationStatus) -> R) -> R {
        f(&mut self.lock())
    }

    /// Replace the record wholesale; prior logs are discarded
    pub fn reset(&self) {
        *self.lock() = InstallationStatus::new();
    }

    pub fn update_progress(&self, stage: Stage, progress: i64) {
        self.lock().update_progress(stage, progress);
    }

    pub fn add_log(&self, message: impl AsRef<str>) {
        self.lock().add_log(message.as_ref());
    }

    pub fn add_warning(&self, message: impl AsRef<str>) {
        self.lock().add_warning(message.as_ref());
    }

    pub fn add_error(&self, message: impl AsRef<str>) {
        self.lock().add_error(message.as_ref());
    }

    pub fn set_status(&self, status: InstallStatus) {
        self.lock().set_status(status);
    }

    pub fn status(&self) -> InstallStatus {
        self.lock().status()
    }

    pub fn snapshot(&self) -> InstallationSnapshot {
        self.lock().snapshot()
    }
}
