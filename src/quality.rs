//! Quality gate for candidate drafts.
//!
//! Checks run in severity order: unfilled template markers (deterministic,
//! immediate reject — no completion call spent), structural completeness
//! (greeting, closing, length), telemetry grounding consistency, then an
//! LLM proofreading pass for tone and passage-grounding consistency. Every
//! failing check is enumerated so a rewrite gets maximal corrective signal.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RetryPolicy, WorkflowConfig};
use crate::error::CompletionError;
use crate::llm::service::extract_json_object;
use crate::llm::{CompletionRequest, CompletionService};
use crate::retry::with_backoff;
use crate::workflow::types::{DraftCandidate, GroundingContext, InboundMessage};

/// Max tokens for the proofreading call.
const JUDGE_MAX_TOKENS: u64 = 512;

/// Temperature for proofreading (deterministic-ish).
const JUDGE_TEMPERATURE: f64 = 0.1;

/// Telemetry attribute values shorter than this are too generic to check
/// for ("OK", "yes").
const MIN_CHECKABLE_VALUE_CHARS: usize = 4;

// ── Verdict ─────────────────────────────────────────────────────────

/// Quality-gate verdict for one draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QAVerdict {
    /// Accept (true) or reject (false).
    pub approved: bool,
    /// Every failing check, phrased as an actionable instruction.
    pub issues: Vec<String>,
    /// Normalized quality score in [0, 1].
    pub score: f32,
}

// ── Gate ────────────────────────────────────────────────────────────

/// Automated acceptance check applied to every candidate draft.
pub struct QualityGate {
    llm: Arc<dyn CompletionService>,
    retry: RetryPolicy,
    min_chars: usize,
    max_chars: usize,
    placeholder: Regex,
    greeting: Regex,
    closing: Regex,
}

impl QualityGate {
    pub fn new(llm: Arc<dyn CompletionService>, config: &WorkflowConfig) -> Self {
        Self {
            llm,
            retry: config.retry.clone(),
            min_chars: config.draft_min_chars,
            max_chars: config.draft_max_chars,
            // "[Customer Name]", "{{variable}}", stray TODO markers.
            placeholder: Regex::new(
                r"\[[^\]\n]*[A-Za-z][^\]\n]*\]|\{\{[^}\n]*\}\}|\b(?:TODO|FIXME|XXX)\b",
            )
            .unwrap(),
            greeting: Regex::new(
                r"(?i)^(?:dear|hello|hi|good (?:morning|afternoon|evening)|greetings)\b",
            )
            .unwrap(),
            closing: Regex::new(
                r"(?i)\b(?:best regards|kind regards|warm regards|regards|sincerely|best wishes|thank you|thanks)\b",
            )
            .unwrap(),
        }
    }

    /// Evaluate a draft against the original message.
    ///
    /// Deterministic checks all run first; if any fail, the draft is
    /// rejected immediately with every failure enumerated and no completion
    /// call is spent. The proofreading call runs only on structurally sound
    /// drafts.
    pub async fn evaluate(
        &self,
        draft: &DraftCandidate,
        message: &InboundMessage,
    ) -> Result<QAVerdict, CompletionError> {
        let (issues, checks_total) = self.deterministic_issues(draft);
        if !issues.is_empty() {
            let passed = checks_total - issues.len();
            let score = 0.5 * passed as f32 / checks_total as f32;
            debug!(
                id = %message.id,
                revision = draft.revision,
                issues = issues.len(),
                "Draft rejected by deterministic checks"
            );
            return Ok(QAVerdict {
                approved: false,
                issues,
                score,
            });
        }

        let verdict = self.judge(draft, message).await?;
        debug!(
            id = %message.id,
            revision = draft.revision,
            approved = verdict.approved,
            score = verdict.score,
            "Proofreader verdict"
        );
        Ok(verdict)
    }

    /// Run every deterministic check; returns (failures, checks run).
    fn deterministic_issues(&self, draft: &DraftCandidate) -> (Vec<String>, usize) {
        let body = draft.body.trim();
        let mut issues = Vec::new();
        let mut checks = 4;

        if let Some(found) = self.placeholder.find(body) {
            issues.push(format!(
                "unfilled template marker present: {:?} — replace it with real content",
                found.as_str()
            ));
        }

        let first_line = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        if !self.greeting.is_match(first_line.trim()) {
            issues.push("missing greeting — open with \"Dear ...\" or \"Hello ...\"".to_string());
        }

        let tail: String = body
            .chars()
            .skip(body.chars().count().saturating_sub(250))
            .collect();
        if !self.closing.is_match(&tail) {
            issues.push("missing closing — end with a sign-off and signature".to_string());
        }

        let len = body.chars().count();
        if len < self.min_chars {
            issues.push(format!(
                "draft too short ({} chars, minimum {})",
                len, self.min_chars
            ));
        } else if len > self.max_chars {
            issues.push(format!(
                "draft too long ({} chars, maximum {})",
                len, self.max_chars
            ));
        }

        if let GroundingContext::Telemetry(bundle) = &draft.context
            && !bundle.facts.is_empty()
        {
            checks += 1;
            if !telemetry_is_referenced(body, bundle) {
                issues.push(
                    "draft ignores the fleet data supplied — quote the specific values \
                     that answer the question"
                        .to_string(),
                );
            }
        }

        (issues, checks)
    }

    /// LLM proofreading pass for tone, relevance, and grounding consistency.
    async fn judge(
        &self,
        draft: &DraftCandidate,
        message: &InboundMessage,
    ) -> Result<QAVerdict, CompletionError> {
        let request = CompletionRequest::new(build_judge_user_prompt(draft, message))
            .with_system(build_judge_system_prompt(draft))
            .with_temperature(JUDGE_TEMPERATURE)
            .with_max_tokens(JUDGE_MAX_TOKENS);

        let llm = Arc::clone(&self.llm);
        let response = with_backoff(
            "quality_judge",
            &self.retry,
            CompletionError::is_retryable,
            move || {
                let llm = Arc::clone(&llm);
                let request = request.clone();
                async move { llm.complete(request).await }
            },
        )
        .await?;

        parse_verdict(&response.content).ok_or_else(|| CompletionError::InvalidResponse {
            provider: self.llm.model_name().to_string(),
            reason: format!("unparseable proofreader output: {}", response.content),
        })
    }
}

/// At least one concrete attribute value from the supplied facts must
/// appear in the draft; otherwise the draft ignored its grounding.
fn telemetry_is_referenced(body: &str, bundle: &crate::telemetry::TelemetryBundle) -> bool {
    let body_lower = body.to_lowercase();
    bundle.facts.iter().any(|fact| {
        fact.attributes
            .values()
            .filter(|v| v.chars().count() >= MIN_CHECKABLE_VALUE_CHARS)
            .any(|v| body_lower.contains(&v.to_lowercase()))
    })
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_judge_system_prompt(draft: &DraftCandidate) -> String {
    format!(
        "You are an email proofreader for a customer support team. Assess whether a \
         generated reply is ready to send.\n\n\
         Judge:\n\
         - Accuracy: does it address the customer's inquiry using the reference \
         information, without contradicting or ignoring it?\n\
         - Tone: professional and appropriate for a {} reply.\n\
         - Quality: clear, concise, well-formed.\n\n\
         Only reject when issues would genuinely hurt customer satisfaction or \
         professionalism. When rejecting, enumerate every problem as a short \
         actionable instruction.\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"approved\": true/false, \"score\": 0.0-1.0, \"issues\": [\"...\"]}}",
        draft.category
    )
}

fn build_judge_user_prompt(draft: &DraftCandidate, message: &InboundMessage) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(&format!("Customer email:\n{}\n", message.body));

    match &draft.context {
        GroundingContext::None => {}
        GroundingContext::Passages(passages) => {
            prompt.push_str("\nReference information supplied to the writer:\n");
            for passage in passages {
                prompt.push_str(&format!("- [{}] {}\n", passage.doc_id, passage.text));
            }
        }
        GroundingContext::Telemetry(bundle) => {
            prompt.push_str("\nFleet data supplied to the writer:\n");
            for fact in &bundle.facts {
                for (name, value) in &fact.attributes {
                    prompt.push_str(&format!(
                        "- {} {} {}: {}\n",
                        fact.entity.kind, fact.entity.id, name, value
                    ));
                }
            }
        }
    }

    prompt.push_str(&format!("\nGenerated reply:\n{}\n", draft.body));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JudgeResponse {
    approved: bool,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    issues: Vec<String>,
}

fn parse_verdict(raw: &str) -> Option<QAVerdict> {
    let json_str = extract_json_object(raw);
    let response: JudgeResponse = serde_json::from_str(&json_str).ok()?;

    let mut issues: Vec<String> = response
        .issues
        .into_iter()
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .collect();
    // A rejection with no stated issues gives the rewrite nothing to fix.
    if !response.approved && issues.is_empty() {
        issues.push("quality below bar — rewrite more carefully".to_string());
    }

    Some(QAVerdict {
        approved: response.approved,
        issues,
        score: response.score.clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::classify::Category;
    use crate::llm::CompletionResponse;
    use crate::telemetry::{EntityKind, EntityRef, TelemetryBundle, TelemetryFact};

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

    const APPROVE: &str = r#"{"approved": true, "score": 0.92, "issues": []}"#;

    fn gate(llm: Arc<MockLlm>) -> QualityGate {
        QualityGate::new(llm, &WorkflowConfig::default())
    }

    fn message() -> InboundMessage {
        InboundMessage::new(
            "customer@example.com",
            Some("Question".into()),
            "What is your return policy?",
            "support@company.com",
        )
    }

    fn draft(body: &str) -> DraftCandidate {
        DraftCandidate {
            body: body.to_string(),
            category: Category::ProductInquiry,
            context: GroundingContext::None,
            revision: 0,
            prior_feedback: vec![],
        }
    }

    const GOOD_BODY: &str = "Dear Customer,\n\nReturns are accepted within 30 days of \
                             purchase with a receipt.\n\nBest regards,\nThe Support Team";

    #[tokio::test]
    async fn sound_draft_goes_to_judge_and_passes() {
        let llm = Arc::new(MockLlm::new(APPROVE));
        let verdict = gate(llm.clone())
            .evaluate(&draft(GOOD_BODY), &message())
            .await
            .unwrap();
        assert!(verdict.approved);
        assert!(verdict.issues.is_empty());
        assert!((verdict.score - 0.92).abs() < 0.01);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn placeholder_rejects_without_llm_call() {
        let llm = Arc::new(MockLlm::new(APPROVE));
        let body = "Dear [Customer Name],\n\nReturns are accepted within 30 days.\n\n\
                    Best regards,\nThe Support Team";
        let verdict = gate(llm.clone())
            .evaluate(&draft(body), &message())
            .await
            .unwrap();
        assert!(!verdict.approved);
        assert!(verdict.issues[0].contains("template marker"));
        // Immediate reject: no completion call spent.
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn every_failing_check_is_enumerated() {
        let llm = Arc::new(MockLlm::new(APPROVE));
        // No greeting, no closing, too short.
        let verdict = gate(llm).evaluate(&draft("ok"), &message()).await.unwrap();
        assert!(!verdict.approved);
        assert_eq!(verdict.issues.len(), 3);
        assert!(verdict.issues.iter().any(|i| i.contains("greeting")));
        assert!(verdict.issues.iter().any(|i| i.contains("closing")));
        assert!(verdict.issues.iter().any(|i| i.contains("too short")));
        assert!(verdict.score < 0.5);
    }

    #[tokio::test]
    async fn overlong_draft_is_rejected() {
        let llm = Arc::new(MockLlm::new(APPROVE));
        let body = format!(
            "Dear Customer,\n\n{}\n\nBest regards,\nThe Support Team",
            "x".repeat(5000)
        );
        let verdict = gate(llm).evaluate(&draft(&body), &message()).await.unwrap();
        assert!(!verdict.approved);
        assert!(verdict.issues.iter().any(|i| i.contains("too long")));
    }

    #[tokio::test]
    async fn telemetry_ignored_by_draft_is_rejected() {
        let llm = Arc::new(MockLlm::new(APPROVE));

        let mut attributes = BTreeMap::new();
        attributes.insert("location".to_string(), "I-95 near Richmond".to_string());
        let mut candidate = draft(GOOD_BODY);
        candidate.category = Category::FleetRelated;
        candidate.context = GroundingContext::Telemetry(TelemetryBundle {
            facts: vec![TelemetryFact {
                entity: EntityRef::new(EntityKind::Vehicle, "482"),
                attributes,
            }],
            unresolved: vec![],
        });

        let verdict = gate(llm).evaluate(&candidate, &message()).await.unwrap();
        assert!(!verdict.approved);
        assert!(verdict.issues.iter().any(|i| i.contains("fleet data")));
    }

    #[tokio::test]
    async fn telemetry_referenced_in_draft_passes_grounding_check() {
        let llm = Arc::new(MockLlm::new(APPROVE));

        let mut attributes = BTreeMap::new();
        attributes.insert("location".to_string(), "I-95 near Richmond".to_string());
        let body = "Dear Customer,\n\nTruck 482 is currently on I-95 near Richmond.\n\n\
                    Best regards,\nThe Support Team";
        let mut candidate = draft(body);
        candidate.category = Category::FleetRelated;
        candidate.context = GroundingContext::Telemetry(TelemetryBundle {
            facts: vec![TelemetryFact {
                entity: EntityRef::new(EntityKind::Vehicle, "482"),
                attributes,
            }],
            unresolved: vec![],
        });

        let verdict = gate(llm).evaluate(&candidate, &message()).await.unwrap();
        assert!(verdict.approved);
    }

    #[tokio::test]
    async fn judge_rejection_enumerates_issues() {
        let llm = Arc::new(MockLlm::new(
            r#"{"approved": false, "score": 0.4, "issues": ["tone too informal", "does not cite the policy"]}"#,
        ));
        let verdict = gate(llm)
            .evaluate(&draft(GOOD_BODY), &message())
            .await
            .unwrap();
        assert!(!verdict.approved);
        assert_eq!(verdict.issues.len(), 2);
        assert_eq!(verdict.issues[0], "tone too informal");
    }

    #[tokio::test]
    async fn unparseable_judge_output_is_an_error() {
        let llm = Arc::new(MockLlm::new("looks fine to me!"));
        let result = gate(llm).evaluate(&draft(GOOD_BODY), &message()).await;
        assert!(matches!(
            result,
            Err(CompletionError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn rejection_without_issues_gets_a_generic_one() {
        let verdict = parse_verdict(r#"{"approved": false, "score": 0.3}"#).unwrap();
        assert!(!verdict.approved);
        assert_eq!(verdict.issues.len(), 1);
    }

    #[test]
    fn score_is_clamped() {
        let verdict = parse_verdict(r#"{"approved": true, "score": 1.7}"#).unwrap();
        assert!((verdict.score - 1.0).abs() < f32::EPSILON);
    }
}
