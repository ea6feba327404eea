//! Generator trait — the abstraction over the language model.
//!
//! The engine never talks to a model API directly: it builds a
//! [`PromptContext`] and hands it to whatever implements [`Generator`].
//! Implementations live outside this workspace's scope (the model invocation
//! layer is an external collaborator); tests use mock generators.

use crate::error::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message roles in the model's expected vocabulary.
///
/// Internal [`crate::message::Role`] naming never leaks into the wire
/// context; the assembler maps to these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    User,
    Model,
}

/// One role-tagged message in the assembled context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Model,
            content: content.into(),
        }
    }
}

/// The bounded context handed to the model for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    /// System/persona preamble (never part of the turn sequence)
    pub system: String,

    /// Role-tagged turn sequence, chronological
    pub messages: Vec<PromptMessage>,
}

impl PromptContext {
    /// Total character size, used for bound checks in tests.
    pub fn char_len(&self) -> usize {
        self.system.len() + self.messages.iter().map(|m| m.content.len()).sum::<usize>()
    }
}

/// Safety configuration forwarded verbatim to the model backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetySettings {
    /// Backend-specific blocking threshold (e.g. "block_only_high")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_threshold: Option<String>,
}

/// A single generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The assembled context
    pub context: PromptContext,

    /// Model identifier (primary for turns, a cheaper one for summarization)
    pub model: String,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Safety configuration
    #[serde(default)]
    pub safety: SafetySettings,
}

fn default_temperature() -> f32 {
    0.7
}

impl GenerateRequest {
    pub fn new(context: PromptContext, model: impl Into<String>) -> Self {
        Self {
            context,
            model: model.into(),
            temperature: default_temperature(),
            max_output_tokens: None,
            safety: SafetySettings::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// The core Generator trait.
///
/// `generate` is fallible and may be flaky; callers wrap it in the retry
/// executor and supply per-call deadlines.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable backend name.
    fn name(&self) -> &str;

    /// Produce text for the given request.
    async fn generate(&self, request: GenerateRequest) -> std::result::Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_roles_serialize_lowercase() {
        let msg = PromptMessage::model("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"model\""));
    }

    #[test]
    fn request_defaults() {
        let req = GenerateRequest::new(
            PromptContext {
                system: "persona".into(),
                messages: vec![PromptMessage::user("hi")],
            },
            "loom-primary",
        );
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.max_output_tokens.is_none());
        assert_eq!(req.context.char_len(), "persona".len() + "hi".len());
    }
}
