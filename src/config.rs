//! Configuration types.
//!
//! Configuration is passed explicitly into the orchestrator at construction.
//! Nothing here reads ambient global state, so concurrent runs with
//! different configurations (per-account tuning) are safe.

use std::time::Duration;

/// Retry/backoff policy for a single external call.
///
/// This is local to one call (completion request, fleet lookup) and distinct
/// from the workflow-level revision loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

/// Workflow configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Maximum regenerations of a rejected draft before escalating.
    pub max_revisions: u32,
    /// Passages requested from the knowledge base per run.
    pub retrieval_top_k: usize,
    /// Passages scoring below this are excluded from grounding.
    pub min_relevance: f32,
    /// Upper bound on LLM-constructed retrieval queries per message.
    pub max_queries: usize,
    /// Retry policy applied to every external call.
    pub retry: RetryPolicy,
    /// Concurrent workflow runs in `run_batch`.
    pub max_concurrent_runs: usize,
    /// Drafts shorter than this fail the structural check.
    pub draft_min_chars: usize,
    /// Drafts longer than this fail the structural check.
    pub draft_max_chars: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_revisions: 3,
            retrieval_top_k: 4,
            min_relevance: 0.35,
            max_queries: 3,
            retry: RetryPolicy::default(),
            max_concurrent_runs: 8,
            draft_min_chars: 40,
            draft_max_chars: 4000,
        }
    }
}
