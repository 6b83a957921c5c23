//! Knowledge-base retrieval for retrieval-augmented drafting.
//!
//! The index itself is built elsewhere and queried through the
//! [`KnowledgeBase`] trait. The retriever constructs focused queries from
//! the email (one completion call, with a deterministic fallback), merges
//! ranked results across queries, and yields them as a lazy stream. An
//! empty knowledge base is a normal case, never an error — synthesis falls
//! back to a generic acknowledgment when no grounding is available.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{RetryPolicy, WorkflowConfig};
use crate::error::{CompletionError, SearchError};
use crate::llm::service::extract_json_object;
use crate::llm::{CompletionRequest, CompletionService};
use crate::retry::with_backoff;
use crate::workflow::types::InboundMessage;

/// Max tokens for the query-construction call.
const QUERIES_MAX_TOKENS: u64 = 256;

/// Temperature for query construction.
const QUERIES_TEMPERATURE: f64 = 0.2;

// ── Passage ─────────────────────────────────────────────────────────

/// A ranked passage from the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// Source document identifier.
    pub doc_id: String,
    /// The text span.
    pub text: String,
    /// Relevance score; higher is more relevant.
    pub score: f32,
}

// ── Knowledge base ──────────────────────────────────────────────────

/// Pre-indexed knowledge-base search.
///
/// An empty result is valid, not an error.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, SearchError>;
}

/// Term-overlap knowledge base over in-memory documents.
///
/// Good enough for tests and small static document sets; the production
/// deployment points [`KnowledgeBase`] at a real vector index instead.
pub struct InMemoryKnowledgeBase {
    docs: Vec<(String, String)>,
}

impl InMemoryKnowledgeBase {
    pub fn new(docs: Vec<(String, String)>) -> Self {
        Self { docs }
    }

    pub fn empty() -> Self {
        Self { docs: Vec::new() }
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, SearchError> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| t.len() > 2)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<RetrievedPassage> = self
            .docs
            .iter()
            .filter_map(|(doc_id, text)| {
                let text_lower = text.to_lowercase();
                let matched = terms.iter().filter(|t| text_lower.contains(**t)).count();
                if matched == 0 {
                    return None;
                }
                Some(RetrievedPassage {
                    doc_id: doc_id.clone(),
                    text: text.clone(),
                    score: matched as f32 / terms.len() as f32,
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }
}

// ── Retriever ───────────────────────────────────────────────────────

/// Retrieval front-end: query construction plus ranked, deduplicated
/// passage retrieval.
pub struct Retriever {
    kb: Arc<dyn KnowledgeBase>,
    llm: Arc<dyn CompletionService>,
    top_k: usize,
    min_relevance: f32,
    max_queries: usize,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(
        kb: Arc<dyn KnowledgeBase>,
        llm: Arc<dyn CompletionService>,
        config: &WorkflowConfig,
    ) -> Self {
        Self {
            kb,
            llm,
            top_k: config.retrieval_top_k,
            min_relevance: config.min_relevance,
            max_queries: config.max_queries,
            retry: config.retry.clone(),
        }
    }

    /// Derive up to `max_queries` focused questions from the email.
    ///
    /// One completion call; on failure or unparseable output this degrades
    /// to a single query built from subject+body rather than failing the
    /// run.
    pub async fn build_queries(&self, message: &InboundMessage) -> Vec<String> {
        let request = CompletionRequest::new(format!("Email:\n{}", message.text()))
            .with_system(build_queries_system_prompt(self.max_queries))
            .with_temperature(QUERIES_TEMPERATURE)
            .with_max_tokens(QUERIES_MAX_TOKENS);

        let llm = Arc::clone(&self.llm);
        let result = with_backoff(
            "build_queries",
            &self.retry,
            CompletionError::is_retryable,
            move || {
                let llm = Arc::clone(&llm);
                let request = request.clone();
                async move { llm.complete(request).await }
            },
        )
        .await;

        match result {
            Ok(response) => match parse_queries(&response.content, self.max_queries) {
                Some(queries) if !queries.is_empty() => queries,
                _ => {
                    warn!(
                        id = %message.id,
                        "Unparseable query-construction output, falling back to message text"
                    );
                    vec![message.text()]
                }
            },
            Err(e) => {
                warn!(id = %message.id, error = %e, "Query construction failed, falling back");
                vec![message.text()]
            }
        }
    }

    /// Retrieve ranked passages for the given queries.
    ///
    /// Returns a lazy, finite, non-restartable stream ordered by descending
    /// relevance. Results are merged across queries, deduplicated by
    /// document keeping the best score, filtered by the minimum relevance
    /// threshold, and truncated to `top_k`. Search failures degrade to
    /// fewer (possibly zero) passages.
    pub fn retrieve(&self, queries: Vec<String>) -> BoxStream<'_, RetrievedPassage> {
        stream::once(self.collect_ranked(queries))
            .flat_map(stream::iter)
            .boxed()
    }

    async fn collect_ranked(&self, queries: Vec<String>) -> Vec<RetrievedPassage> {
        let mut best: HashMap<String, RetrievedPassage> = HashMap::new();

        for query in queries {
            match self.kb.search(&query, self.top_k).await {
                Ok(passages) => {
                    for passage in passages {
                        if passage.score < self.min_relevance {
                            continue;
                        }
                        best.entry(passage.doc_id.clone())
                            .and_modify(|existing| {
                                if passage.score > existing.score {
                                    *existing = passage.clone();
                                }
                            })
                            .or_insert(passage);
                    }
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "Knowledge-base search failed, skipping query");
                }
            }
        }

        let mut ranked: Vec<RetrievedPassage> = best.into_values().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(self.top_k);
        debug!(passages = ranked.len(), "Retrieval complete");
        ranked
    }
}

// ── Prompt construction & parsing ───────────────────────────────────

fn build_queries_system_prompt(max_queries: usize) -> String {
    format!(
        "You analyze customer emails to construct the most relevant queries for an \
         internal knowledge base.\n\n\
         Instructions:\n\
         - Identify the main intent or problem in the email.\n\
         - Construct up to {max_queries} concise questions capturing the customer's \
         information needs.\n\
         - If a single question suffices, provide only that.\n\n\
         Respond with ONLY a JSON object: {{\"queries\": [\"...\"]}}"
    )
}

#[derive(Debug, Deserialize)]
struct QueriesResponse {
    queries: Vec<String>,
}

fn parse_queries(raw: &str, max_queries: usize) -> Option<Vec<String>> {
    let json_str = extract_json_object(raw);
    let response: QueriesResponse = serde_json::from_str(&json_str).ok()?;
    let queries: Vec<String> = response
        .queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(max_queries)
        .collect();
    Some(queries)
}
