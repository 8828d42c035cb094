//! `publish_content`: the only publish-class skill.
//!
//! Refuses to run without an approval record. Every platform call carries a
//! key derived from the request's idempotency key, so a retried or repeated
//! publish replays through the mediation cache instead of posting twice.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::generate_post_bundle::ContentBundle;
use super::{mismatched_request, Skill, SkillFailure, SkillOutput, SkillRequest, SkillResult};
use crate::domain::{ApprovalRecord, ErrorCode, PublicationRecord, PublicationStatus};
use crate::mediation::McpSession;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishStrategy {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishContentInput {
    pub correlation_id: String,
    pub content_bundle: ContentBundle,
    pub target_platforms: Vec<String>,
    pub idempotency_key: String,
    #[serde(default)]
    pub publish_strategy: PublishStrategy,
    #[serde(default)]
    pub partial_success_allowed: bool,
}

impl PublishContentInput {
    pub fn validate(&self) -> SkillResult<()> {
        approval_of(&self.content_bundle)?;
        if self.idempotency_key.trim().is_empty() {
            return Err(SkillFailure::invalid_input("idempotency_key is required"));
        }
        if self.target_platforms.is_empty() {
            return Err(SkillFailure::invalid_input("target_platforms must not be empty"));
        }
        Ok(())
    }

    fn platform_key(&self, platform: &str) -> String {
        format!("{}:{platform}", self.idempotency_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishContentOutput {
    pub status: PublicationStatus,
    pub publications: Vec<PublicationRecord>,
    /// First platform failure behind a `partial_success` status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<SkillFailure>,
}

/// Platform posting tool.
pub fn platform_tool(platform: &str) -> String {
    match platform {
        "twitter" | "x" => "post_tweet".to_string(),
        other => format!("post_{other}"),
    }
}

fn approval_of(bundle: &ContentBundle) -> SkillResult<&ApprovalRecord> {
    bundle
        .approval_record
        .as_ref()
        .filter(|a| a.is_approval())
        .ok_or_else(|| {
            SkillFailure::terminal(
                ErrorCode::MissingApproval,
                "publish requires an approved approval_record",
            )
        })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PublishContentSkill;

impl PublishContentSkill {
    async fn publish_one(
        &self,
        input: &PublishContentInput,
        approval: &ApprovalRecord,
        platform: &str,
        session: &McpSession,
    ) -> SkillResult<PublicationRecord> {
        let key = input.platform_key(platform);
        session.emit("attempt", json!({ "platform": platform, "idempotency_key": key }));

        let Some(variant) = input.content_bundle.variant(platform) else {
            return Ok(PublicationRecord::not_published(
                platform,
                key,
                PublicationStatus::Skipped,
            ));
        };

        let mut media_ids = Vec::new();
        if !variant.media_refs.is_empty() {
            let uploaded = session
                .invoke_tool(
                    "upload_media",
                    json!({ "platform": platform, "media_refs": variant.media_refs }),
                    Some(&format!("{key}:media")),
                )
                .await?;
            media_ids = uploaded["media_ids"]
                .as_array()
                .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
        }

        let posted = session
            .invoke_tool(
                &platform_tool(platform),
                json!({
                    "text": variant.text_content,
                    "hashtags": variant.hashtags,
                    "media_ids": media_ids,
                    "disclosure_label": variant.disclosure_label,
                    "approval_id": approval.approval_id,
                }),
                Some(&key),
            )
            .await?;

        let mut record = PublicationRecord::published(
            platform,
            key.clone(),
            posted["external_id"].as_str().map(str::to_string),
            posted["external_url"].as_str().map(str::to_string),
            Utc::now(),
        );
        record.result_id = Some(approval.result_id.clone());
        session.emit(
            "success",
            json!({ "platform": platform, "idempotency_key": key, "external_id": record.external_id }),
        );
        Ok(record)
    }
}

#[async_trait]
impl Skill for PublishContentSkill {
    fn name(&self) -> &'static str {
        "publish_content"
    }

    fn publish_class(&self) -> bool {
        true
    }

    fn required_tools(&self) -> Vec<String> {
        ["upload_media", "post_tweet", "post_instagram", "post_linkedin"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    async fn execute(&self, request: &SkillRequest, session: &McpSession) -> SkillResult<SkillOutput> {
        let SkillRequest::PublishContent(input) = request else {
            return Err(mismatched_request(self.name(), request));
        };
        let approval = approval_of(&input.content_bundle)?;

        let mut platforms: Vec<&str> = Vec::new();
        for p in &input.target_platforms {
            if !platforms.contains(&p.as_str()) {
                platforms.push(p.as_str());
            }
        }

        let attempts: Vec<(&str, SkillResult<PublicationRecord>)> = match input.publish_strategy {
            PublishStrategy::Sequential => {
                let mut out = Vec::with_capacity(platforms.len());
                for platform in platforms {
                    let result = self.publish_one(input, approval, platform, session).await;
                    let stop = result.is_err() && !input.partial_success_allowed;
                    out.push((platform, result));
                    if stop {
                        break;
                    }
                }
                out
            }
            PublishStrategy::Parallel => {
                let results = join_all(
                    platforms
                        .iter()
                        .map(|p| self.publish_one(input, approval, p, session)),
                )
                .await;
                platforms.into_iter().zip(results).collect()
            }
        };

        let mut publications = Vec::with_capacity(attempts.len());
        let mut first_failure: Option<SkillFailure> = None;
        for (platform, result) in attempts {
            match result {
                Ok(record) => publications.push(record),
                Err(failure) => {
                    publications.push(PublicationRecord::not_published(
                        platform,
                        input.platform_key(platform),
                        PublicationStatus::Failed,
                    ));
                    first_failure.get_or_insert(failure);
                }
            }
        }

        let published = publications
            .iter()
            .filter(|p| p.status == PublicationStatus::Published)
            .count();
        let status = match (&first_failure, published) {
            (None, 0) => PublicationStatus::Skipped,
            (None, _) => PublicationStatus::Published,
            (Some(failure), 0) => return Err(failure.clone()),
            (Some(failure), _) if !input.partial_success_allowed => return Err(failure.clone()),
            (Some(_), _) => PublicationStatus::PartialSuccess,
        };

        Ok(SkillOutput::Publication(PublishContentOutput {
            status,
            publications,
            failure: first_failure,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_mapping() {
        assert_eq!(platform_tool("twitter"), "post_tweet");
        assert_eq!(platform_tool("instagram"), "post_instagram");
        assert_eq!(platform_tool("threads"), "post_threads");
    }

    #[test]
    fn missing_approval_fails_validation() {
        let input = PublishContentInput {
            correlation_id: "corr-1".into(),
            content_bundle: ContentBundle {
                bundle_id: "b-1".into(),
                variants: vec![],
                approval_record: None,
            },
            target_platforms: vec!["twitter".into()],
            idempotency_key: "k".into(),
            publish_strategy: PublishStrategy::default(),
            partial_success_allowed: false,
        };
        let err = input.validate().unwrap_err();
        assert_eq!(err.error_code, ErrorCode::MissingApproval);
        assert!(!err.retry_eligible);
    }
}
