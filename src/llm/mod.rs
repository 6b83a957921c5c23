//! LLM integration.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! Uses the rig-core crate for HTTP transport and `RigCompletionService` to
//! bridge rig's agent API to the crate's [`CompletionService`] trait.

mod rig_adapter;
pub mod service;

pub use rig_adapter::RigCompletionService;
pub use service::{CompletionRequest, CompletionResponse, CompletionService};

use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::error::CompletionError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

/// Configuration for creating a completion service.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Create a completion service from configuration.
pub fn create_service(config: &LlmConfig) -> Result<Arc<dyn CompletionService>, CompletionError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_service(config),
        LlmBackend::OpenAi => create_openai_service(config),
    }
}

fn create_anthropic_service(
    config: &LlmConfig,
) -> Result<Arc<dyn CompletionService>, CompletionError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            CompletionError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigCompletionService::new(
        rig_adapter::RigBackend::Anthropic(client),
        &config.model,
    )))
}

fn create_openai_service(
    config: &LlmConfig,
) -> Result<Arc<dyn CompletionService>, CompletionError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            CompletionError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigCompletionService::new(
        rig_adapter::RigBackend::OpenAi(client),
        &config.model,
    )))
}
