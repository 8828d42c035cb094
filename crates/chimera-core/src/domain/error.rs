//! Domain-level error taxonomy for Chimera.

use serde::{Deserialize, Serialize};

use chimera_state::StorageError;

/// Machine-readable failure codes shared by skills, the scheduler and the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    McpResourceUnavailable,
    McpTimeout,
    RateLimited,
    OccConflict,
    InvalidPersona,
    InactiveCampaign,
    PromptUnsafe,
    PlatformAuthInvalid,
    PolicyViolation,
    MissingApproval,
    DeadlineExceeded,
    InvalidInput,
    MalformedArtifact,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::McpResourceUnavailable => "MCP_RESOURCE_UNAVAILABLE",
            Self::McpTimeout => "MCP_TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::OccConflict => "OCC_CONFLICT",
            Self::InvalidPersona => "INVALID_PERSONA",
            Self::InactiveCampaign => "INACTIVE_CAMPAIGN",
            Self::PromptUnsafe => "PROMPT_UNSAFE",
            Self::PlatformAuthInvalid => "PLATFORM_AUTH_INVALID",
            Self::PolicyViolation => "POLICY_VIOLATION",
            Self::MissingApproval => "MISSING_APPROVAL",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::InvalidInput => "INVALID_INPUT",
            Self::MalformedArtifact => "MALFORMED_ARTIFACT",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether a failure with this code may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::McpResourceUnavailable | Self::McpTimeout | Self::RateLimited | Self::OccConflict
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chimera domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ChimeraError {
    #[error("invalid campaign: {0}")]
    InvalidCampaign(String),

    #[error("invalid agent: {0}")]
    InvalidAgent(String),

    #[error("invalid persona: {0}")]
    InvalidPersona(String),

    #[error("malformed artifact: {0}")]
    MalformedArtifact(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChimeraError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidPersona(_) => ErrorCode::InvalidPersona,
            Self::MalformedArtifact(_) => ErrorCode::MalformedArtifact,
            Self::Storage(e) if e.is_conflict() => ErrorCode::OccConflict,
            Self::InvalidCampaign(_) | Self::InvalidAgent(_) | Self::Config(_) => {
                ErrorCode::InvalidInput
            }
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) => ErrorCode::Internal,
        }
    }
}

/// Result type for Chimera domain operations.
pub type Result<T> = std::result::Result<T, ChimeraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::McpResourceUnavailable).unwrap();
        assert_eq!(json, "\"MCP_RESOURCE_UNAVAILABLE\"");
        let back: ErrorCode = serde_json::from_str("\"MISSING_APPROVAL\"").unwrap();
        assert_eq!(back, ErrorCode::MissingApproval);
        assert_eq!(ErrorCode::MissingApproval.to_string(), "MISSING_APPROVAL");
    }

    #[test]
    fn retryable_split() {
        for code in [
            ErrorCode::McpResourceUnavailable,
            ErrorCode::McpTimeout,
            ErrorCode::RateLimited,
            ErrorCode::OccConflict,
        ] {
            assert!(code.is_retryable(), "{code} should be retryable");
        }
        for code in [
            ErrorCode::InvalidPersona,
            ErrorCode::InactiveCampaign,
            ErrorCode::PromptUnsafe,
            ErrorCode::PlatformAuthInvalid,
            ErrorCode::PolicyViolation,
            ErrorCode::MissingApproval,
            ErrorCode::DeadlineExceeded,
        ] {
            assert!(!code.is_retryable(), "{code} should be terminal");
        }
    }

    #[test]
    fn storage_conflict_maps_to_occ_code() {
        let err = ChimeraError::from(StorageError::OccConflict {
            expected: 1,
            actual: 2,
        });
        assert_eq!(err.code(), ErrorCode::OccConflict);
        assert!(err.to_string().contains("storage error"));
    }
}
