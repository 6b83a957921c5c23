//! Error types for the triage workflow.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Completion-service errors (classification, synthesis, quality scoring).
///
/// Surfaced only after the local retry/backoff budget is exhausted.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out")]
    Timeout { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

impl CompletionError {
    /// Whether the local retry layer should attempt this call again.
    ///
    /// Rate limits, timeouts, and transport failures are transient; an
    /// unparseable response or a rejected credential will not improve on
    /// retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::RequestFailed { .. }
        )
    }
}

/// Classification failures.
///
/// Unrecoverable by design: a mis-routed category would corrupt every
/// downstream branch, so the workflow reports the failure instead of
/// guessing.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("Classifier returned a label outside the taxonomy: {label:?}")]
    UnknownLabel { label: String },

    #[error("Classifier response could not be parsed: {reason}")]
    Malformed { reason: String },

    #[error("Completion call failed: {0}")]
    Completion(#[from] CompletionError),
}

/// Knowledge-base search errors.
///
/// Never fatal to a workflow run: retrieval degrades to empty grounding.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Knowledge-base search failed: {0}")]
    Backend(String),
}

/// Fleet-data lookup errors.
///
/// Per-entity: one failing lookup does not block facts resolved for other
/// entities.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Fleet lookup failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Fleet API rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid fleet API response: {reason}")]
    InvalidResponse { reason: String },
}

impl FleetError {
    /// Whether the local retry layer should attempt this lookup again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::RequestFailed { .. })
    }
}

/// Workflow-level errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow cancelled between stages")]
    Cancelled,

    #[error("Stage {stage} failed: {reason}")]
    Stage { stage: String, reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
