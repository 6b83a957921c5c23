//! Reply draft synthesis.
//!
//! One completion call per draft. Category-specific tone and structure
//! guidance is injected deterministically; grounding context (knowledge-base
//! passages or fleet telemetry) is rendered into the prompt when present; on
//! a rewrite the rejected draft is replayed together with the accumulated
//! quality-gate feedback as explicit corrective instructions. No randomness
//! beyond the completion service itself.

use std::sync::Arc;

use tracing::debug;

use crate::classify::Category;
use crate::config::RetryPolicy;
use crate::error::CompletionError;
use crate::llm::{CompletionRequest, CompletionService};
use crate::retry::with_backoff;
use crate::telemetry::TelemetryBundle;
use crate::workflow::types::{DraftCandidate, GroundingContext, InboundMessage};

/// Max tokens for a draft.
const DRAFT_MAX_TOKENS: u64 = 1024;

/// Temperature for drafting — some variety in phrasing, stable structure.
const DRAFT_TEMPERATURE: f64 = 0.4;

/// Fixed sign-off appended by instruction, never left as a placeholder.
const SIGNATURE: &str = "The Support Team";

/// LLM-backed draft synthesizer.
pub struct DraftSynthesizer {
    llm: Arc<dyn CompletionService>,
    retry: RetryPolicy,
}

impl DraftSynthesizer {
    pub fn new(llm: Arc<dyn CompletionService>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Produce a reply draft for the message.
    ///
    /// On a rewrite, `previous_draft` is the rejected attempt and
    /// `prior_feedback` carries the accumulated gate feedback; `revision`
    /// is 0 for the first draft.
    pub async fn synthesize(
        &self,
        message: &InboundMessage,
        category: Category,
        context: &GroundingContext,
        prior_feedback: &[String],
        previous_draft: Option<&str>,
        revision: u32,
    ) -> Result<DraftCandidate, CompletionError> {
        let request = CompletionRequest::new(build_user_prompt(
            message,
            category,
            context,
            prior_feedback,
            previous_draft,
        ))
        .with_system(build_system_prompt(category))
        .with_temperature(DRAFT_TEMPERATURE)
        .with_max_tokens(DRAFT_MAX_TOKENS);

        let llm = Arc::clone(&self.llm);
        let response = with_backoff(
            "synthesize",
            &self.retry,
            CompletionError::is_retryable,
            move || {
                let llm = Arc::clone(&llm);
                let request = request.clone();
                async move { llm.complete(request).await }
            },
        )
        .await?;

        debug!(
            id = %message.id,
            category = %category,
            revision,
            grounding = context.label(),
            "Draft synthesized"
        );

        Ok(DraftCandidate {
            body: response.content.trim().to_string(),
            category,
            context: context.clone(),
            revision,
            prior_feedback: prior_feedback.to_vec(),
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Category-specific tone and structure guidance.
fn category_guidance(category: Category) -> &'static str {
    match category {
        Category::Complaint => {
            "Express empathy, assure the customer their concerns are valued, and \
             commit to resolving the issue. Do not argue or assign blame."
        }
        Category::ProductInquiry => {
            "Answer the customer's question clearly and directly using the supplied \
             information. If the information does not cover the question, say so and \
             offer to follow up — never invent product details."
        }
        Category::Feedback => {
            "Thank the customer for their input and assure them their feedback will \
             be passed to the relevant team."
        }
        Category::FleetRelated => {
            "Answer using the fleet data supplied. Quote the specific values \
             (locations, names, statuses) that address the question. If data for an \
             entity is missing or could not be retrieved, acknowledge that clearly \
             instead of guessing."
        }
        // The workflow suppresses unrelated mail before drafting; guidance
        // exists only so the match is exhaustive.
        Category::Unrelated => {
            "Politely ask the customer for more detail about their request."
        }
    }
}

fn build_system_prompt(category: Category) -> String {
    format!(
        "You are a professional support agent drafting a reply email.\n\n\
         Structure requirements:\n\
         - Open with a greeting (\"Dear ...\" or \"Hello ...\"); use \"Dear Customer\" \
         if no name is available.\n\
         - Address the customer's specific question or concern in the body.\n\
         - Close with a sign-off and the signature \"{SIGNATURE}\".\n\
         - Return only the email text, no preamble or commentary.\n\
         - Never leave template markers like [Name] or {{{{placeholder}}}} in the text.\n\n\
         Tone for this reply: {}",
        category_guidance(category)
    )
}

fn build_user_prompt(
    message: &InboundMessage,
    category: Category,
    context: &GroundingContext,
    prior_feedback: &[String],
    previous_draft: Option<&str>,
) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str(&format!("Category: {}\n", category));
    if let Some(ref subject) = message.subject {
        prompt.push_str(&format!("Subject: {}\n", subject));
    }
    prompt.push_str(&format!("\nCustomer email:\n{}\n", message.body));

    prompt.push_str("\nInformation:\n");
    prompt.push_str(&render_context(context));

    if let Some(previous) = previous_draft {
        prompt.push_str(&format!("\nYour previous draft was rejected:\n{}\n", previous));
    }
    if !prior_feedback.is_empty() {
        prompt.push_str("\nApply every item of this feedback in the rewrite:\n");
        for item in prior_feedback {
            prompt.push_str(&format!("- {}\n", item));
        }
    }

    prompt
}

/// Render grounding context for the prompt.
///
/// When no grounding is available the synthesizer is told so explicitly, so
/// it writes a generic acknowledgment instead of inventing facts.
fn render_context(context: &GroundingContext) -> String {
    match context {
        GroundingContext::None => {
            "(no reference information available — acknowledge the message and \
             respond in general terms without inventing specifics)\n"
                .to_string()
        }
        GroundingContext::Passages(passages) => {
            let mut out = String::new();
            for passage in passages {
                out.push_str(&format!("- [{}] {}\n", passage.doc_id, passage.text));
            }
            out
        }
        GroundingContext::Telemetry(bundle) => render_telemetry(bundle),
    }
}

fn render_telemetry(bundle: &TelemetryBundle) -> String {
    let mut out = String::new();
    for fact in &bundle.facts {
        out.push_str(&format!("{} {}:\n", fact.entity.kind, fact.entity.id));
        for (name, value) in &fact.attributes {
            out.push_str(&format!("  - {}: {}\n", name, value));
        }
    }
    if !bundle.unresolved.is_empty() {
        out.push_str("Data could not be retrieved for:\n");
        for entity in &bundle.unresolved {
            out.push_str(&format!("  - {} {}\n", entity.kind, entity.id));
        }
    }
    if bundle.facts.is_empty() {
        out.push_str(
            "(no fleet data was found — acknowledge this clearly, do not invent values)\n",
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use crate::llm::CompletionResponse;
    use crate::retrieval::RetrievedPassage;
    use crate::telemetry::{EntityKind, EntityRef, TelemetryFact};

    /// Mock that records the requests it receives.
    struct RecordingLlm {
        response: String,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl RecordingLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> CompletionRequest {
            self.requests.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionService for RecordingLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            self.requests.lock().unwrap().push(request);
            Ok(CompletionResponse {
                content: self.response.clone(),
            })
        }
    }

    fn message(body: &str) -> InboundMessage {
        InboundMessage::new(
            "customer@example.com",
            Some("Question".into()),
            body,
            "support@company.com",
        )
    }

    const DRAFT: &str = "Dear Customer,\n\nThanks for reaching out.\n\nBest regards,\nThe Support Team";

    #[tokio::test]
    async fn first_draft_has_revision_zero_and_no_feedback() {
        let llm = Arc::new(RecordingLlm::new(DRAFT));
        let synthesizer = DraftSynthesizer::new(llm.clone(), RetryPolicy::default());

        let draft = synthesizer
            .synthesize(
                &message("My package arrived broken"),
                Category::Complaint,
                &GroundingContext::None,
                &[],
                None,
                0,
            )
            .await
            .unwrap();

        assert_eq!(draft.revision, 0);
        assert!(draft.prior_feedback.is_empty());
        assert_eq!(draft.body, DRAFT);

        let request = llm.last_request();
        assert!(request.user.contains("complaint"));
        assert!(request.user.contains("no reference information available"));
        assert!(!request.user.contains("previous draft was rejected"));
    }

    #[tokio::test]
    async fn passages_are_rendered_into_prompt() {
        let llm = Arc::new(RecordingLlm::new(DRAFT));
        let synthesizer = DraftSynthesizer::new(llm.clone(), RetryPolicy::default());

        let context = GroundingContext::Passages(vec![RetrievedPassage {
            doc_id: "returns".into(),
            text: "Returns accepted within 30 days.".into(),
            score: 0.9,
        }]);
        synthesizer
            .synthesize(
                &message("What is your return policy?"),
                Category::ProductInquiry,
                &context,
                &[],
                None,
                0,
            )
            .await
            .unwrap();

        let request = llm.last_request();
        assert!(request.user.contains("[returns] Returns accepted within 30 days."));
    }

    #[tokio::test]
    async fn telemetry_facts_and_gaps_are_rendered() {
        let llm = Arc::new(RecordingLlm::new(DRAFT));
        let synthesizer = DraftSynthesizer::new(llm.clone(), RetryPolicy::default());

        let mut attributes = BTreeMap::new();
        attributes.insert("location".to_string(), "I-95 near Richmond, VA".to_string());
        let context = GroundingContext::Telemetry(TelemetryBundle {
            facts: vec![TelemetryFact {
                entity: EntityRef::new(EntityKind::Vehicle, "482"),
                attributes,
            }],
            unresolved: vec![EntityRef::new(EntityKind::Vehicle, "901")],
        });

        synthesizer
            .synthesize(
                &message("Where are trucks 482 and 901?"),
                Category::FleetRelated,
                &context,
                &[],
                None,
                0,
            )
            .await
            .unwrap();

        let request = llm.last_request();
        assert!(request.user.contains("vehicle 482"));
        assert!(request.user.contains("location: I-95 near Richmond, VA"));
        assert!(request.user.contains("Data could not be retrieved for"));
        assert!(request.user.contains("vehicle 901"));
    }

    #[tokio::test]
    async fn feedback_becomes_corrective_instructions() {
        let llm = Arc::new(RecordingLlm::new(DRAFT));
        let synthesizer = DraftSynthesizer::new(llm.clone(), RetryPolicy::default());

        let feedback = vec!["tone too informal".to_string(), "missing greeting".to_string()];
        let rejected = "Hey!\n\nSorry about that, we'll sort it.\n\nCheers";
        let draft = synthesizer
            .synthesize(
                &message("My package arrived broken"),
                Category::Complaint,
                &GroundingContext::None,
                &feedback,
                Some(rejected),
                2,
            )
            .await
            .unwrap();

        assert_eq!(draft.revision, 2);
        assert_eq!(draft.prior_feedback, feedback);

        let request = llm.last_request();
        assert!(request.user.contains("previous draft was rejected"));
        assert!(request.user.contains(rejected));
        assert!(request.user.contains("- tone too informal"));
        assert!(request.user.contains("- missing greeting"));
    }

    #[tokio::test]
    async fn system_prompt_carries_category_tone() {
        let llm = Arc::new(RecordingLlm::new(DRAFT));
        let synthesizer = DraftSynthesizer::new(llm.clone(), RetryPolicy::default());

        synthesizer
            .synthesize(
                &message("I love the new dashboard!"),
                Category::Feedback,
                &GroundingContext::None,
                &[],
                None,
                0,
            )
            .await
            .unwrap();

        let request = llm.last_request();
        let system = request.system.unwrap();
        assert!(system.contains("Thank the customer"));
        assert!(system.contains(SIGNATURE));
    }

    #[test]
    fn empty_telemetry_bundle_renders_no_data_note() {
        let rendered = render_telemetry(&TelemetryBundle::default());
        assert!(rendered.contains("no fleet data was found"));
    }
}
