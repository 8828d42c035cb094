//! Skill failures and registration errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ErrorCode;
use crate::mediation::McpFailure;

/// Structured skill failure. Returned, never raised.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{error_code}: {message}")]
pub struct SkillFailure {
    pub error_code: ErrorCode,
    pub retry_eligible: bool,
    pub message: String,
}

impl SkillFailure {
    pub fn terminal(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            retry_eligible: false,
            message: message.into(),
        }
    }

    pub fn retryable(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            retry_eligible: true,
            message: message.into(),
        }
    }

    /// Retry eligibility taken from the code's classification.
    pub fn from_code(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            retry_eligible: error_code.is_retryable(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::terminal(ErrorCode::InvalidInput, message)
    }
}

impl From<McpFailure> for SkillFailure {
    fn from(failure: McpFailure) -> Self {
        Self {
            error_code: failure.kind.error_code(),
            retry_eligible: failure.kind.is_retryable(),
            message: failure.message,
        }
    }
}

pub type SkillResult<T> = std::result::Result<T, SkillFailure>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SkillRegistryError {
    #[error("duplicate skill registration: {0}")]
    Duplicate(String),

    #[error("skill '{0}' has no request variant")]
    UnknownSkill(String),

    #[error("skill '{skill}' depends on unregistered tool '{tool}'")]
    MissingTool { skill: String, tool: String },

    #[error("skill '{skill}' publish-class flag does not match its request contract")]
    PublishClassMismatch { skill: String },

    #[error("invalid skill configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcp_failures_keep_retry_classification() {
        let f: SkillFailure = McpFailure::rate_limited("429").into();
        assert_eq!(f.error_code, ErrorCode::RateLimited);
        assert!(f.retry_eligible);

        let f: SkillFailure = McpFailure::auth_invalid("revoked").into();
        assert_eq!(f.error_code, ErrorCode::PlatformAuthInvalid);
        assert!(!f.retry_eligible);
    }

    #[test]
    fn failure_serializes_with_code() {
        let f = SkillFailure::terminal(ErrorCode::MissingApproval, "no approval");
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["error_code"], "MISSING_APPROVAL");
        assert_eq!(v["retry_eligible"], false);
    }
}
