//! Result artifacts produced by workers and consumed by the judge.

use serde::{Deserialize, Serialize};

use super::error::{ChimeraError, ErrorCode, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    TrendReport,
    ContentBundle,
}

/// Whether a mediated call was an action or a read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Tool,
    Resource,
}

/// One mediation-layer call made while producing an artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUsageEntry {
    pub kind: CallKind,
    /// Tool name or resource URI.
    pub target: String,
    pub idempotency_key: Option<String>,
    pub success: bool,
    /// Served from the idempotency cache without reaching the backend.
    #[serde(default)]
    pub replayed: bool,
    pub duration_ms: u64,
    pub error_code: Option<ErrorCode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provenance {
    pub memory_refs: Vec<String>,
    pub signal_refs: Vec<String>,
}

impl Provenance {
    pub fn is_empty(&self) -> bool {
        self.memory_refs.is_empty() && self.signal_refs.is_empty()
    }
}

/// Immutable output of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultArtifact {
    pub result_id: String,
    pub task_id: String,
    pub correlation_id: String,
    pub campaign_id: String,
    pub worker_id: String,
    pub artifact_type: ArtifactType,
    pub content: serde_json::Value,
    pub confidence_score: f64,
    pub tool_usage: Vec<ToolUsageEntry>,
    pub provenance: Provenance,
    pub execution_duration_ms: u64,
}

impl ResultArtifact {
    /// Structural checks applied at judge ingestion.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(ChimeraError::MalformedArtifact(format!(
                "confidence_score {} outside [0.0, 1.0]",
                self.confidence_score
            )));
        }
        if self.result_id.is_empty() || self.task_id.is_empty() {
            return Err(ChimeraError::MalformedArtifact(
                "result_id and task_id are required".into(),
            ));
        }
        if self.correlation_id.is_empty() {
            return Err(ChimeraError::MalformedArtifact(
                "correlation_id is required".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact(score: f64) -> ResultArtifact {
        ResultArtifact {
            result_id: "r-1".into(),
            task_id: "t-1".into(),
            correlation_id: "corr-1".into(),
            campaign_id: "c-1".into(),
            worker_id: "worker-0".into(),
            artifact_type: ArtifactType::ContentBundle,
            content: json!({}),
            confidence_score: score,
            tool_usage: vec![],
            provenance: Provenance::default(),
            execution_duration_ms: 3,
        }
    }

    #[test]
    fn confidence_bounds() {
        assert!(artifact(0.0).validate().is_ok());
        assert!(artifact(1.0).validate().is_ok());
        let err = artifact(1.2).validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedArtifact);
        assert!(artifact(-0.1).validate().is_err());
        assert!(artifact(f64::NAN).validate().is_err());
    }
}
