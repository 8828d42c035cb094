//! Judge policy rules engine.
//!
//! Evaluates a [`Submission`] against a [`JudgePolicy`] to produce a
//! [`JudgeVerdict`]. Rules cover structural conformance (confidence range,
//! provenance, tool usage) and safety (unsafe content, persona alignment).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Submission;
use crate::config::JudgeConfig;
use crate::content_filter::ContentFilter;
use crate::domain::{ArtifactType, ErrorCode};
use crate::skills::SkillOutput;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JudgeRule {
    /// `confidence_score` must lie in [0.0, 1.0].
    ConfidenceRange,
    /// Confidence below `min` is rejected outright, never escalated.
    ConfidenceFloor { min: f64 },
    /// Provenance must name at least one memory or signal reference.
    ProvenanceRequired,
    /// At least one mediated call must have succeeded.
    ToolUsageRequired,
    /// No text in the artifact may match an unsafe pattern.
    UnsafeContent,
    /// Content must respect the persona's prohibitions, and every content
    /// variant must carry a disclosure label.
    PersonaAlignment,
}

impl JudgeRule {
    /// Failure code reported when this rule rejects an artifact.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ConfidenceRange | Self::ProvenanceRequired => ErrorCode::MalformedArtifact,
            Self::ConfidenceFloor { .. }
            | Self::ToolUsageRequired
            | Self::UnsafeContent
            | Self::PersonaAlignment => ErrorCode::PolicyViolation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgePolicy {
    pub rules: Vec<JudgeRule>,
    pub fail_fast: bool,
}

impl JudgePolicy {
    /// Every rule, with the floor at the configured HITL minimum.
    pub fn from_config(config: &JudgeConfig) -> Self {
        let mut rules = vec![
            JudgeRule::ConfidenceRange,
            JudgeRule::ConfidenceFloor {
                min: config.hitl_min_confidence,
            },
        ];
        if config.require_provenance {
            rules.push(JudgeRule::ProvenanceRequired);
        }
        rules.extend([
            JudgeRule::ToolUsageRequired,
            JudgeRule::UnsafeContent,
            JudgeRule::PersonaAlignment,
        ]);
        Self {
            rules,
            fail_fast: false,
        }
    }

    pub fn with_rule(mut self, rule: JudgeRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Evaluate every rule; stops at the first violation when `fail_fast`.
    pub fn evaluate(&self, submission: &Submission, filter: &ContentFilter) -> JudgeVerdict {
        let mut violations = Vec::new();
        for rule in &self.rules {
            if let Some(v) = check_rule(rule, submission, filter) {
                violations.push(v);
                if self.fail_fast {
                    break;
                }
            }
        }
        JudgeVerdict {
            passed: violations.is_empty(),
            violations,
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeViolation {
    pub rule: JudgeRule,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    pub passed: bool,
    pub violations: Vec<JudgeViolation>,
}

impl JudgeVerdict {
    /// Code of the first violation.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.violations.first().map(|v| v.rule.error_code())
    }

    pub fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.reason.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

fn collect_text<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
        _ => {}
    }
}

/// Terms a directive forbids, e.g. "Never mention competitors".
fn forbidden_term(directive: &str) -> Option<String> {
    let lower = directive.trim().to_lowercase();
    ["never mention ", "do not mention ", "don't mention ", "avoid "]
        .iter()
        .find_map(|prefix| lower.strip_prefix(prefix))
        .map(|rest| rest.trim_end_matches(['.', '!']).trim().to_string())
        .filter(|term| !term.is_empty())
}

fn violation(rule: &JudgeRule, reason: String) -> Option<JudgeViolation> {
    Some(JudgeViolation {
        rule: rule.clone(),
        reason,
    })
}

fn check_rule(rule: &JudgeRule, submission: &Submission, filter: &ContentFilter) -> Option<JudgeViolation> {
    let artifact = &submission.artifact;
    match rule {
        JudgeRule::ConfidenceRange => {
            if (0.0..=1.0).contains(&artifact.confidence_score) {
                None
            } else {
                violation(
                    rule,
                    format!("confidence_score {} outside [0.0, 1.0]", artifact.confidence_score),
                )
            }
        }
        JudgeRule::ConfidenceFloor { min } => {
            if artifact.confidence_score >= *min {
                None
            } else {
                violation(
                    rule,
                    format!("confidence_score {} below floor {min}", artifact.confidence_score),
                )
            }
        }
        JudgeRule::ProvenanceRequired => {
            if artifact.provenance.is_empty() {
                violation(rule, "artifact carries no provenance".to_string())
            } else {
                None
            }
        }
        JudgeRule::ToolUsageRequired => {
            if artifact.tool_usage.iter().any(|u| u.success) {
                None
            } else {
                violation(rule, "no successful mediated call recorded".to_string())
            }
        }
        JudgeRule::UnsafeContent => {
            let mut texts = Vec::new();
            collect_text(&artifact.content, &mut texts);
            texts.into_iter().find_map(|t| {
                filter
                    .first_match(t)
                    .and_then(|p| violation(rule, format!("content matches unsafe pattern '{p}'")))
            })
        }
        JudgeRule::PersonaAlignment => {
            let mut texts = Vec::new();
            collect_text(&artifact.content, &mut texts);
            let haystack = texts.join("\n").to_lowercase();
            let persona = &submission.task.context.persona_constraints;
            if let Some(term) = persona
                .directives
                .iter()
                .filter_map(|d| forbidden_term(d))
                .find(|term| haystack.contains(term.as_str()))
            {
                return violation(
                    rule,
                    format!("content mentions '{term}', forbidden for persona {}", persona.name),
                );
            }

            if artifact.artifact_type == ArtifactType::ContentBundle {
                match serde_json::from_value::<SkillOutput>(artifact.content.clone()) {
                    Ok(SkillOutput::PostBundle(bundle)) => {
                        if let Some(v) = bundle
                            .variants
                            .iter()
                            .find(|v| v.disclosure_label.trim().is_empty())
                        {
                            return violation(
                                rule,
                                format!("variant for {} lacks a disclosure label", v.platform),
                            );
                        }
                    }
                    _ => {
                        return violation(rule, "content bundle cannot be decoded".to_string());
                    }
                }
            }
            None
        }
    }
}
