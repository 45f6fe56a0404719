//! Error handling module for pvarr
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Stage functions never let these escape: the wizard converts them into
//! `StageResult::Error` at the stage boundary.

use thiserror::Error;

/// Main error type for pvarr
#[derive(Error, Debug)]
pub enum PvarrError {
    /// IO errors (config files, generated artifacts, probes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML rendering errors (compose descriptor)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration errors (loading, merging, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// External command errors (spawn failures, non-zero exit)
    #[error("Command failed: {0}")]
    Command(String),

    /// Container runtime errors
    #[error("Docker error: {0}")]
    Docker(String),

    /// Another wizard call is already running on the same handle
    #[error("Installation wizard is busy: {0}")]
    Busy(String),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for pvarr operations
pub type Result<T> = std::result::Result<T, PvarrError>;

impl PvarrError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a command execution error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a container runtime error
    pub fn docker(msg: impl Into<String>) -> Self {
        Self::Docker(msg.into())
    }

    /// Create a busy error
    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    /// Create a general error
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }

    /// Returns true if this error came from the wizard reentrancy guard
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}
