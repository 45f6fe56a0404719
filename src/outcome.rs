//! Three-level outcome vocabulary shared by collaborators and stages.
//!
//! `success` means proceed, `warning` means proceed but tell the operator,
//! `error` means the operation failed. Storage and network collaborators
//! report through [`OpResult`]; wizard stages report through
//! [`crate::wizard::StageResult`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Outcome level of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    Success,
    Warning,
    Error,
}

/// Status plus a human-readable message, as returned by host collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResult {
    pub status: Status,
    pub message: String,
}

impl OpResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: Status::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    #[inline]
    pub fn is_warning(&self) -> bool {
        self.status == Status::Warning
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}
