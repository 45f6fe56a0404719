//! Tagged stage outcome.

use crate::outcome::Status;
use serde::Serialize;

/// Outcome of one wizard stage.
///
/// Serializes as a flat object tagged by `status`, with the payload's fields
/// alongside `message`:
///
/// ```json
/// {"status": "success", "message": "Basic configuration setup completed", "config": {...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StageResult<T> {
    Success {
        message: String,
        #[serde(flatten)]
        data: T,
    },
    /// Completed in a degraded state; the run continues
    Warning {
        message: String,
        #[serde(flatten)]
        data: T,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        details: Vec<String>,
    },
}

impl<T> StageResult<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self::Success {
            message: message.into(),
            data,
        }
    }

    pub fn warning(message: impl Into<String>, data: T) -> Self {
        Self::Warning {
            message: message.into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn error_with_details(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::Error {
            message: message.into(),
            details,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Success { .. } => Status::Success,
            Self::Warning { .. } => Status::Warning,
            Self::Error { .. } => Status::Error,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Success { message, .. } | Self::Warning { message, .. } | Self::Error { message, .. } => message,
        }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Payload of a non-error result
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data, .. } | Self::Warning { data, .. } => Some(data),
            Self::Error { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Success { data, .. } | Self::Warning { data, .. } => Some(data),
            Self::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Paths {
        docker_compose_path: String,
    }

    #[test]
    fn test_success_flattens_payload() {
        let result = StageResult::success(
            "done",
            Paths {
                docker_compose_path: "/tmp/dc.yml".to_string(),
            },
        );
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"status": "success", "message": "done", "docker_compose_path": "/tmp/dc.yml"})
        );
    }

    #[test]
    fn test_unit_payload_serializes_without_extra_fields() {
        let result = StageResult::warning("degraded", ());
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"status": "warning", "message": "degraded"})
        );
    }

    #[test]
    fn test_error_details_only_when_present() {
        let plain: StageResult<()> = StageResult::error("boom");
        assert_eq!(
            serde_json::to_value(&plain).unwrap(),
            json!({"status": "error", "message": "boom"})
        );

        let detailed: StageResult<()> = StageResult::error_with_details("boom", vec!["a".to_string()]);
        assert_eq!(serde_json::to_value(&detailed).unwrap()["details"], json!(["a"]));
    }

    #[test]
    fn test_accessors() {
        let result = StageResult::warning("careful", 7);
        assert_eq!(result.status(), Status::Warning);
        assert_eq!(result.message(), "careful");
        assert_eq!(result.data(), Some(&7));
        assert!(!result.is_error());

        let failed: StageResult<i32> = StageResult::error("nope");
        assert!(failed.is_error());
        assert_eq!(failed.into_data(), None);
    }
}
