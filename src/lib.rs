//! pvarr library
//!
//! Installation wizard and host collaborators for a Docker-based media
//! server stack on Raspberry Pi and other Linux hosts.

pub mod catalog;
pub mod cli;
pub mod command;
pub mod compose;
pub mod config;
pub mod docker;
pub mod error;
pub mod install_state;
pub mod network;
pub mod outcome;
pub mod process_guard;
pub mod services;
pub mod storage;
pub mod system_info;
pub mod wizard;

// Re-export main types for convenience
pub use command::{CommandOutput, CommandRunner, Elevation, SystemCommandRunner};
pub use config::{ConfigStore, JsonConfigStore, ServicesConfig, SystemConfig};
pub use error::{PvarrError, Result};
pub use install_state::{InstallStatus, InstallationSnapshot, Stage, StatusTracker};
pub use outcome::{OpResult, Status};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use wizard::{Collaborators, InstallWizard, InstallationRequest, StageResult, WizardSettings};
