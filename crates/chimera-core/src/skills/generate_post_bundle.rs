//! `generate_post_bundle`: produce per-platform post variants.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{mismatched_request, Skill, SkillFailure, SkillOutput, SkillRequest, SkillResult};
use crate::content_filter::ContentFilter;
use crate::domain::{ApprovalRecord, ErrorCode, PersonaConstraints};
use crate::mediation::McpSession;

pub const DISCLOSURE_LABEL: &str = "AI-generated";

/// Maximum post length in characters for a platform.
pub fn char_limit(platform: &str) -> usize {
    match platform {
        "twitter" | "x" => 280,
        "instagram" => 2200,
        "linkedin" => 3000,
        "threads" => 500,
        "tiktok" => 2200,
        _ => 2200,
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn default_media_generation() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratePostBundleInput {
    pub correlation_id: String,
    pub task_id: String,
    pub content_prompt: String,
    pub target_platforms: Vec<String>,
    pub persona_constraints: PersonaConstraints,
    #[serde(default = "default_media_generation")]
    pub media_generation_enabled: bool,
}

impl GeneratePostBundleInput {
    pub fn new(
        correlation_id: impl Into<String>,
        task_id: impl Into<String>,
        content_prompt: impl Into<String>,
        target_platforms: Vec<String>,
        persona_constraints: PersonaConstraints,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            task_id: task_id.into(),
            content_prompt: content_prompt.into(),
            target_platforms,
            persona_constraints,
            media_generation_enabled: default_media_generation(),
        }
    }

    pub fn validate(&self) -> SkillResult<()> {
        if self.task_id.trim().is_empty() || self.content_prompt.trim().is_empty() {
            return Err(SkillFailure::invalid_input(
                "task_id and content_prompt are required",
            ));
        }
        if self.target_platforms.is_empty() {
            return Err(SkillFailure::invalid_input("target_platforms must not be empty"));
        }
        if !self.persona_constraints.is_usable() {
            return Err(SkillFailure::terminal(
                ErrorCode::InvalidPersona,
                "persona constraints are incomplete",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentVariant {
    pub platform: String,
    pub text_content: String,
    pub media_refs: Vec<String>,
    pub hashtags: Vec<String>,
    pub disclosure_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostBundleOutput {
    pub bundle_id: String,
    pub variants: Vec<ContentVariant>,
    pub confidence_score: f64,
}

impl PostBundleOutput {
    /// Attach an approval, producing the bundle a publish request carries.
    pub fn into_bundle(self, approval_record: Option<ApprovalRecord>) -> ContentBundle {
        ContentBundle {
            bundle_id: self.bundle_id,
            variants: self.variants,
            approval_record,
        }
    }
}

/// Content handed to the publish skill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentBundle {
    pub bundle_id: String,
    pub variants: Vec<ContentVariant>,
    #[serde(default)]
    pub approval_record: Option<ApprovalRecord>,
}

impl ContentBundle {
    pub fn variant(&self, platform: &str) -> Option<&ContentVariant> {
        self.variants.iter().find(|v| v.platform == platform)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeneratePostBundleSkill {
    filter: ContentFilter,
}

impl GeneratePostBundleSkill {
    pub fn new(filter: ContentFilter) -> Self {
        Self { filter }
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Skill for GeneratePostBundleSkill {
    fn name(&self) -> &'static str {
        "generate_post_bundle"
    }

    fn required_tools(&self) -> Vec<String> {
        vec!["text_completion".into(), "generate_image".into()]
    }

    async fn execute(&self, request: &SkillRequest, session: &McpSession) -> SkillResult<SkillOutput> {
        let SkillRequest::GeneratePostBundle(input) = request else {
            return Err(mismatched_request(self.name(), request));
        };
        if let Some(pattern) = self.filter.first_match(&input.content_prompt) {
            return Err(SkillFailure::terminal(
                ErrorCode::PromptUnsafe,
                format!("prompt matches unsafe pattern '{pattern}'"),
            ));
        }
        let persona = &input.persona_constraints;

        let mut media_refs = Vec::new();
        if input.media_generation_enabled {
            let key = format!("{}:image", input.task_id);
            let image = session
                .invoke_tool(
                    "generate_image",
                    json!({ "prompt": input.content_prompt, "style": persona.voice_traits }),
                    Some(&key),
                )
                .await?;
            if let Some(media_ref) = image["media_ref"].as_str() {
                media_refs.push(media_ref.to_string());
            }
        }

        let mut platforms: Vec<&str> = Vec::new();
        for p in &input.target_platforms {
            if !platforms.contains(&p.as_str()) {
                platforms.push(p.as_str());
            }
        }

        let mut variants = Vec::with_capacity(platforms.len());
        let mut confidence_score: f64 = 1.0;
        for platform in platforms {
            let limit = char_limit(platform);
            let completion = session
                .invoke_tool(
                    "text_completion",
                    json!({
                        "prompt": input.content_prompt,
                        "platform": platform,
                        "max_chars": limit,
                        "persona": persona.name,
                        "voice_traits": persona.voice_traits,
                        "directives": persona.directives,
                    }),
                    None,
                )
                .await?;

            let text = completion["text"].as_str().ok_or_else(|| {
                SkillFailure::retryable(
                    ErrorCode::McpResourceUnavailable,
                    format!("text_completion returned no text for {platform}"),
                )
            })?;
            let confidence = completion["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0);
            confidence_score = confidence_score.min(confidence);

            variants.push(ContentVariant {
                platform: platform.to_string(),
                text_content: truncate_chars(text, limit),
                media_refs: media_refs.clone(),
                hashtags: string_list(&completion["hashtags"]),
                disclosure_label: DISCLOSURE_LABEL.to_string(),
            });
        }

        Ok(SkillOutput::PostBundle(PostBundleOutput {
            bundle_id: Uuid::new_v4().to_string(),
            variants,
            confidence_score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_per_platform() {
        assert_eq!(char_limit("twitter"), 280);
        assert_eq!(char_limit("threads"), 500);
        assert_eq!(char_limit("linkedin"), 3000);
        assert_eq!(char_limit("mastodon"), 2200);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld";
        assert_eq!(truncate_chars(text, 5), "héllo");
        assert_eq!(truncate_chars(text, 100), text);
    }

    #[test]
    fn empty_platforms_rejected() {
        let input = GeneratePostBundleInput::new(
            "corr-1",
            "task-1",
            "prompt",
            vec![],
            PersonaConstraints::default(),
        );
        assert_eq!(input.validate().unwrap_err().error_code, ErrorCode::InvalidInput);
    }
}
