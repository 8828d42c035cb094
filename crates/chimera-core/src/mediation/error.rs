//! Failure taxonomy surfaced by the mediation layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ErrorCode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum McpFailureKind {
    Unavailable,
    Timeout,
    RateLimited,
    AuthInvalid,
    PolicyViolation,
}

impl McpFailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Timeout | Self::RateLimited)
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Unavailable => ErrorCode::McpResourceUnavailable,
            Self::Timeout => ErrorCode::McpTimeout,
            Self::RateLimited => ErrorCode::RateLimited,
            Self::AuthInvalid => ErrorCode::PlatformAuthInvalid,
            Self::PolicyViolation => ErrorCode::PolicyViolation,
        }
    }
}

impl std::fmt::Display for McpFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unavailable => "UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::AuthInvalid => "AUTH_INVALID",
            Self::PolicyViolation => "POLICY_VIOLATION",
        };
        f.write_str(s)
    }
}

/// A failed tool invocation or resource read.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct McpFailure {
    pub kind: McpFailureKind,
    pub message: String,
}

impl McpFailure {
    pub fn new(kind: McpFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(McpFailureKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(McpFailureKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(McpFailureKind::RateLimited, message)
    }

    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(McpFailureKind::AuthInvalid, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(McpFailureKind::PolicyViolation, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

pub type McpResult<T> = std::result::Result<T, McpFailure>;
