//! Completion-service abstraction.
//!
//! Every LLM-backed capability (classifier, query builder, synthesizer,
//! quality judge) goes through the [`CompletionService`] trait, so tests can
//! substitute a deterministic stub without touching orchestration logic.

use async_trait::async_trait;

use crate::error::CompletionError;

/// A single prompt → text completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System/preamble text establishing the role and output format.
    pub system: Option<String>,
    /// The user-turn prompt.
    pub user: String,
    /// Sampling temperature; `None` uses the provider default.
    pub temperature: Option<f64>,
    /// Output token cap; `None` uses the provider default.
    pub max_tokens: Option<u64>,
}

impl CompletionRequest {
    /// Create a request with just a user prompt.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Completion output.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The raw model text.
    pub content: String,
}

/// External completion service.
///
/// Stateless from the workflow's perspective: the same request yields the
/// same class of response regardless of other concurrent runs.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Execute one completion call.
    ///
    /// Implementations surface transport failures as [`CompletionError`];
    /// retry/backoff is the caller's concern.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;
}

/// Extract a JSON object from model output (handles markdown wrapping).
///
/// Models asked for "ONLY a JSON object" still occasionally fence it or add
/// surrounding prose; all callers that parse structured output go through
/// this first.
pub(crate) fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_fields() {
        let request = CompletionRequest::new("hello")
            .with_system("you are a test")
            .with_temperature(0.2)
            .with_max_tokens(128);
        assert_eq!(request.user, "hello");
        assert_eq!(request.system.as_deref(), Some("you are a test"));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(128));
    }

    #[test]
    fn extract_json_direct_object() {
        let input = r#"{"category": "complaint"}"#;
        assert_eq!(extract_json_object(input), input);
    }

    #[test]
    fn extract_json_from_markdown_block() {
        let input = "```json\n{\"category\": \"feedback\"}\n```";
        let result = extract_json_object(input);
        assert!(result.starts_with('{'));
        assert!(result.contains("feedback"));
    }

    #[test]
    fn extract_json_embedded_in_text() {
        let input = "My assessment: {\"approved\": true, \"score\": 0.9} done.";
        let result = extract_json_object(input);
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
    }

    #[test]
    fn extract_json_plain_text_passthrough() {
        assert_eq!(extract_json_object("  complaint  "), "complaint");
    }
}
