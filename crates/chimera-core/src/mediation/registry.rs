//! Tool registry: the tools the mediation layer will forward.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{McpFailure, McpResult};

/// Minimal JSON schema: required top-level fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonFieldSchema {
    pub required_fields: Vec<String>,
}

impl JsonFieldSchema {
    pub fn required<const N: usize>(fields: [&str; N]) -> Self {
        Self {
            required_fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    fn check(&self, tool_name: &str, params: &Value) -> McpResult<()> {
        for field in &self.required_fields {
            if params.get(field).is_none() {
                return Err(McpFailure::policy(format!(
                    "tool '{tool_name}' called without required field '{field}'"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    /// Side-effecting tools must be called with an idempotency key.
    pub side_effecting: bool,
    pub input_schema: JsonFieldSchema,
}

impl ToolSpec {
    pub fn read_only(name: impl Into<String>, input_schema: JsonFieldSchema) -> Self {
        Self {
            name: name.into(),
            side_effecting: false,
            input_schema,
        }
    }

    pub fn side_effecting(name: impl Into<String>, input_schema: JsonFieldSchema) -> Self {
        Self {
            name: name.into(),
            side_effecting: true,
            input_schema,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("duplicate tool registration: {0}")]
pub struct DuplicateTool(pub String);

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the content, media and platform tools the built-in
    /// skills use.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        let specs = [
            ToolSpec::read_only("text_completion", JsonFieldSchema::required(["prompt"])),
            ToolSpec::side_effecting("generate_image", JsonFieldSchema::required(["prompt"])),
            ToolSpec::side_effecting("upload_media", JsonFieldSchema::required(["platform", "media_refs"])),
            ToolSpec::side_effecting("post_tweet", JsonFieldSchema::required(["text"])),
            ToolSpec::side_effecting("post_instagram", JsonFieldSchema::required(["text"])),
            ToolSpec::side_effecting("post_linkedin", JsonFieldSchema::required(["text"])),
            ToolSpec::side_effecting("post_threads", JsonFieldSchema::required(["text"])),
            ToolSpec::side_effecting("post_tiktok", JsonFieldSchema::required(["text"])),
        ];
        for spec in specs {
            registry.tools.insert(spec.name.clone(), spec);
        }
        registry
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<(), DuplicateTool> {
        if self.tools.contains_key(&spec.name) {
            return Err(DuplicateTool(spec.name));
        }
        self.tools.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Resolve a call: the tool must be registered, its input must carry the
    /// required fields, and side-effecting tools need an idempotency key.
    pub(crate) fn admit(
        &self,
        name: &str,
        params: &Value,
        idempotency_key: Option<&str>,
    ) -> McpResult<&ToolSpec> {
        let spec = self
            .get(name)
            .ok_or_else(|| McpFailure::policy(format!("tool '{name}' is not registered")))?;
        spec.input_schema.check(name, params)?;
        if spec.side_effecting && idempotency_key.map_or(true, str::is_empty) {
            return Err(McpFailure::policy(format!(
                "side-effecting tool '{name}' requires an idempotency key"
            )));
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediation::McpFailureKind;
    use serde_json::json;

    #[test]
    fn duplicate_registration_rejected() {
        let mut r = ToolRegistry::standard();
        let err = r
            .register(ToolSpec::read_only("text_completion", JsonFieldSchema::default()))
            .unwrap_err();
        assert_eq!(err, DuplicateTool("text_completion".into()));
    }

    #[test]
    fn admit_enforces_schema_and_key() {
        let r = ToolRegistry::standard();
        assert!(r.admit("post_tweet", &json!({"text": "hi"}), Some("k")).is_ok());

        let err = r.admit("post_tweet", &json!({"text": "hi"}), None).unwrap_err();
        assert_eq!(err.kind, McpFailureKind::PolicyViolation);

        let err = r.admit("post_tweet", &json!({}), Some("k")).unwrap_err();
        assert!(err.message.contains("'text'"));

        let err = r.admit("post_myspace", &json!({"text": "hi"}), Some("k")).unwrap_err();
        assert!(err.message.contains("not registered"));
    }
}
