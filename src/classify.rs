//! Category classification for inbound messages.
//!
//! One tight completion call per message, returning a member of the closed
//! taxonomy. Free-text labels outside the taxonomy are normalized by keyword
//! affinity; anything that still doesn't resolve is a
//! `ClassificationError`, never a guessed category — a bad label here would
//! break every downstream branch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{ClassificationError, CompletionError};
use crate::llm::service::extract_json_object;
use crate::llm::{CompletionRequest, CompletionService};
use crate::retry::with_backoff;
use crate::workflow::types::InboundMessage;

/// Max tokens for the classification call (runs on every message).
const CLASSIFY_MAX_TOKENS: u64 = 128;

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f64 = 0.1;

/// Message body is truncated to this many chars in the prompt.
const BODY_PREVIEW_CHARS: usize = 1500;

// ── Category taxonomy ───────────────────────────────────────────────

/// Closed category taxonomy. Exactly one category per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Dissatisfaction or a complaint about a product or service.
    Complaint,
    /// Seeks information about a feature, service, or pricing.
    ProductInquiry,
    /// Feedback or suggestions regarding a product or service.
    Feedback,
    /// Asks about vehicles, drivers, or locations tracked in the fleet
    /// platform.
    FleetRelated,
    /// Matches none of the above; suppressed without a reply.
    Unrelated,
}

impl Category {
    /// Short label for logging and prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Complaint => "complaint",
            Self::ProductInquiry => "product_inquiry",
            Self::Feedback => "feedback",
            Self::FleetRelated => "fleet_related",
            Self::Unrelated => "unrelated",
        }
    }

    /// All taxonomy members, for prompt construction.
    pub const ALL: [Category; 5] = [
        Self::Complaint,
        Self::ProductInquiry,
        Self::Feedback,
        Self::FleetRelated,
        Self::Unrelated,
    ];
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complaint" => Ok(Self::Complaint),
            "product_inquiry" => Ok(Self::ProductInquiry),
            "feedback" => Ok(Self::Feedback),
            "fleet_related" => Ok(Self::FleetRelated),
            "unrelated" => Ok(Self::Unrelated),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

// ── Classifier ──────────────────────────────────────────────────────

/// LLM-backed category classifier.
pub struct Classifier {
    llm: Arc<dyn CompletionService>,
    retry: RetryPolicy,
}

impl Classifier {
    pub fn new(llm: Arc<dyn CompletionService>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Classify a message into exactly one taxonomy member.
    ///
    /// A message with neither subject nor body text defaults to
    /// `Unrelated` without spending a completion call.
    pub async fn classify(
        &self,
        message: &InboundMessage,
    ) -> Result<Category, ClassificationError> {
        if message.is_blank() {
            debug!(id = %message.id, "Blank message, defaulting to unrelated");
            return Ok(Category::Unrelated);
        }

        let request = CompletionRequest::new(build_user_prompt(message))
            .with_system(build_system_prompt())
            .with_temperature(CLASSIFY_TEMPERATURE)
            .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let llm = Arc::clone(&self.llm);
        let response = with_backoff(
            "classify",
            &self.retry,
            CompletionError::is_retryable,
            move || {
                let llm = Arc::clone(&llm);
                let request = request.clone();
                async move { llm.complete(request).await }
            },
        )
        .await?;

        let category = parse_category(&response.content)?;
        debug!(id = %message.id, category = %category, "Message classified");
        Ok(category)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    "You are a customer support specialist categorizing inbound emails.\n\n\
     Categories:\n\
     - \"complaint\": the email communicates dissatisfaction or a complaint.\n\
     - \"product_inquiry\": the email seeks information about a product feature, service, or pricing.\n\
     - \"feedback\": the email provides feedback or suggestions about a product or service.\n\
     - \"fleet_related\": the email asks about vehicle locations, fleet status, driver information, or tracked assets.\n\
     - \"unrelated\": the email matches none of the above (newsletters, spam, small talk).\n\n\
     Respond with ONLY a JSON object: {\"category\": \"...\"}\n\n\
     Rules:\n\
     - Base the category strictly on the email content; do not overgeneralize.\n\
     - Assign exactly one category."
        .to_string()
}

fn build_user_prompt(message: &InboundMessage) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(&format!("From: {}\n", message.sender));
    if let Some(ref subject) = message.subject {
        prompt.push_str(&format!("Subject: {}\n", subject));
    }
    let body_preview: String = message.body.chars().take(BODY_PREVIEW_CHARS).collect();
    prompt.push_str(&format!("\nEmail:\n{}", body_preview));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CategoryResponse {
    category: String,
}

/// Parse the model output into a taxonomy member.
///
/// Accepts a JSON object (possibly markdown-wrapped), a bare label, or
/// free text containing a recognizable label. Unresolvable output is an
/// error, not a guess.
fn parse_category(raw: &str) -> Result<Category, ClassificationError> {
    let json_str = extract_json_object(raw);

    let label = match serde_json::from_str::<CategoryResponse>(&json_str) {
        Ok(response) => response.category,
        // Not JSON — treat the trimmed output as the label itself.
        Err(_) => json_str.trim().trim_matches('"').to_string(),
    };

    if let Ok(category) = label.parse::<Category>() {
        return Ok(category);
    }

    match normalize_label(&label) {
        Some(category) => {
            warn!(label = %label, category = %category, "Clamped off-taxonomy label");
            Ok(category)
        }
        None => Err(ClassificationError::UnknownLabel { label }),
    }
}

/// Clamp a free-text label to the nearest taxonomy member by keyword
/// affinity. Returns `None` when nothing matches.
fn normalize_label(label: &str) -> Option<Category> {
    let lower = label.to_lowercase();
    if lower.contains("complain") {
        Some(Category::Complaint)
    } else if lower.contains("inquir") || lower.contains("enquir") || lower.contains("product") {
        Some(Category::ProductInquiry)
    } else if lower.contains("feedback") || lower.contains("suggest") {
        Some(Category::Feedback)
    } else if lower.contains("fleet")
        || lower.contains("vehicle")
        || lower.contains("driver")
        || lower.contains("location")
        || lower.contains("telemetry")
    {
        Some(Category::FleetRelated)
    } else if lower.contains("unrelated") || lower.contains("spam") || lower.contains("other") {
        Some(Category::Unrelated)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::llm::CompletionResponse;

    /// Mock completion service that returns a fixed response.
    struct MockLlm {
        response: String,
        calls: AtomicUsize,
    }

    impl MockLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionService for MockLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: self.response.clone(),
            })
        }
    }

    fn message(subject: Option<&str>, body: &str) -> InboundMessage {
        InboundMessage::new(
            "customer@example.com",
            subject.map(String::from),
            body,
            "support@company.com",
        )
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_taxonomy_labels() {
        for category in Category::ALL {
            let raw = format!(r#"{{"category": "{}"}}"#, category.label());
            assert_eq!(parse_category(&raw).unwrap(), category);
        }
    }

    #[test]
    fn parse_markdown_wrapped_response() {
        let raw = "```json\n{\"category\": \"complaint\"}\n```";
        assert_eq!(parse_category(raw).unwrap(), Category::Complaint);
    }

    #[test]
    fn parse_bare_label() {
        assert_eq!(parse_category("product_inquiry").unwrap(), Category::ProductInquiry);
    }

    #[test]
    fn off_taxonomy_label_is_clamped() {
        let raw = r#"{"category": "customer_complaint"}"#;
        assert_eq!(parse_category(raw).unwrap(), Category::Complaint);

        let raw = r#"{"category": "product_enquiry"}"#;
        assert_eq!(parse_category(raw).unwrap(), Category::ProductInquiry);

        let raw = r#"{"category": "samsara_vehicle_query"}"#;
        assert_eq!(parse_category(raw).unwrap(), Category::FleetRelated);
    }

    #[test]
    fn unresolvable_label_is_an_error() {
        let raw = r#"{"category": "banana"}"#;
        let err = parse_category(raw).unwrap_err();
        assert!(matches!(err, ClassificationError::UnknownLabel { .. }));
    }

    #[test]
    fn category_round_trips_through_serde() {
        let json = serde_json::to_string(&Category::FleetRelated).unwrap();
        assert_eq!(json, "\"fleet_related\"");
        let back: Category = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Category::FleetRelated);
    }

    // ── Classifier behavior ─────────────────────────────────────────

    #[tokio::test]
    async fn classifies_via_llm() {
        let llm = Arc::new(MockLlm::new(r#"{"category": "complaint"}"#));
        let classifier = Classifier::new(llm.clone(), RetryPolicy::default());

        let msg = message(Some("Broken again"), "My package arrived broken, 3rd time this month");
        let category = classifier.classify(&msg).await.unwrap();
        assert_eq!(category, Category::Complaint);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_message_defaults_to_unrelated_without_llm() {
        let llm = Arc::new(MockLlm::new(r#"{"category": "complaint"}"#));
        let classifier = Classifier::new(llm.clone(), RetryPolicy::default());

        let msg = message(None, "   ");
        let category = classifier.classify(&msg).await.unwrap();
        assert_eq!(category, Category::Unrelated);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subject_only_message_is_still_classified() {
        let llm = Arc::new(MockLlm::new(r#"{"category": "product_inquiry"}"#));
        let classifier = Classifier::new(llm.clone(), RetryPolicy::default());

        let msg = message(Some("Pricing question"), "");
        let category = classifier.classify(&msg).await.unwrap();
        assert_eq!(category, Category::ProductInquiry);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn user_prompt_includes_subject_and_truncates_body() {
        let long_body = "x".repeat(3000);
        let msg = message(Some("Subject line"), &long_body);
        let prompt = build_user_prompt(&msg);
        assert!(prompt.contains("Subject line"));
        assert!(prompt.len() < 2000);
    }

    #[test]
    fn system_prompt_lists_all_categories() {
        let prompt = build_system_prompt();
        for category in Category::ALL {
            assert!(prompt.contains(category.label()));
        }
    }
}
