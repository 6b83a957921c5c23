//! rig-core adapter for the [`CompletionService`] trait.
//!
//! Builds a rig agent per request (the preamble and temperature vary by
//! call site) and classifies prompt failures into [`CompletionError`]
//! variants so the retry layer can tell transient from terminal.

use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::{anthropic, openai};

use crate::error::CompletionError;
use crate::llm::service::{CompletionRequest, CompletionResponse, CompletionService};

/// Default output cap when the caller doesn't set one. Anthropic models
/// require an explicit max_tokens on every request.
const DEFAULT_MAX_TOKENS: u64 = 1024;

/// The concrete rig client behind the adapter.
pub(crate) enum RigBackend {
    Anthropic(rig::client::Client<anthropic::client::AnthropicExt>),
    OpenAi(rig::client::Client<openai::client::OpenAIResponsesExt>),
}

/// Completion service backed by a rig-core provider client.
pub struct RigCompletionService {
    backend: RigBackend,
    model: String,
    provider: &'static str,
}

impl RigCompletionService {
    pub(crate) fn new(backend: RigBackend, model: impl Into<String>) -> Self {
        let provider = match backend {
            RigBackend::Anthropic(_) => "anthropic",
            RigBackend::OpenAi(_) => "openai",
        };
        Self {
            backend,
            model: model.into(),
            provider,
        }
    }

    /// Map a rig prompt error onto the crate's error taxonomy.
    ///
    /// rig surfaces provider failures as display strings; match on the
    /// usual markers for rate limiting, timeouts, and auth failures.
    fn classify_error(&self, reason: String) -> CompletionError {
        let lower = reason.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") || lower.contains("overloaded") {
            CompletionError::RateLimited {
                provider: self.provider.to_string(),
                retry_after: Some(Duration::from_secs(10)),
            }
        } else if lower.contains("timed out") || lower.contains("timeout") {
            CompletionError::Timeout {
                provider: self.provider.to_string(),
            }
        } else if lower.contains("401") || lower.contains("403") || lower.contains("authentication")
        {
            CompletionError::AuthFailed {
                provider: self.provider.to_string(),
            }
        } else {
            CompletionError::RequestFailed {
                provider: self.provider.to_string(),
                reason,
            }
        }
    }
}

#[async_trait]
impl CompletionService for RigCompletionService {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let result = match &self.backend {
            RigBackend::Anthropic(client) => {
                let mut builder = client.agent(&self.model).max_tokens(max_tokens);
                if let Some(ref system) = request.system {
                    builder = builder.preamble(system);
                }
                if let Some(temperature) = request.temperature {
                    builder = builder.temperature(temperature);
                }
                let agent = builder.build();
                agent.prompt(request.user.as_str()).await
            }
            RigBackend::OpenAi(client) => {
                let mut builder = client.agent(&self.model).max_tokens(max_tokens);
                if let Some(ref system) = request.system {
                    builder = builder.preamble(system);
                }
                if let Some(temperature) = request.temperature {
                    builder = builder.temperature(temperature);
                }
                let agent = builder.build();
                agent.prompt(request.user.as_str()).await
            }
        };

        match result {
            Ok(content) => Ok(CompletionResponse { content }),
            Err(e) => Err(self.classify_error(e.to_string())),
        }
    }
}
