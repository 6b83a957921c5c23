//! Shared types for the triage workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::Category;
use crate::error::{Error, WorkflowError};
use crate::quality::QAVerdict;
use crate::retrieval::RetrievedPassage;
use crate::telemetry::TelemetryBundle;

// ── Inbound message ─────────────────────────────────────────────────

/// An inbound support email, immutable once ingested.
///
/// The mailbox connector converts its provider-native format into this
/// struct before handing it to the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique ID (provider-native or generated UUID).
    pub id: String,
    /// Sender address.
    pub sender: String,
    /// Subject line, if present.
    pub subject: Option<String>,
    /// Body text.
    pub body: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Which configured account the message arrived on.
    pub account: String,
}

impl InboundMessage {
    /// Build a message with a generated id, received now.
    pub fn new(
        sender: impl Into<String>,
        subject: Option<String>,
        body: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            subject,
            body: body.into(),
            received_at: Utc::now(),
            account: account.into(),
        }
    }

    /// Subject and body joined for classification and query construction.
    pub fn text(&self) -> String {
        match &self.subject {
            Some(subject) if !subject.trim().is_empty() => {
                format!("{}\n\n{}", subject, self.body)
            }
            _ => self.body.clone(),
        }
    }

    /// True when there is nothing to classify on.
    pub fn is_blank(&self) -> bool {
        self.body.trim().is_empty()
            && self
                .subject
                .as_deref()
                .is_none_or(|s| s.trim().is_empty())
    }
}

// ── Grounding context ───────────────────────────────────────────────

/// External facts supplied to the synthesizer to reduce unsupported claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroundingContext {
    /// No grounding available — synthesis falls back to a generic
    /// acknowledgment.
    None,
    /// Knowledge-base passages, ordered by descending relevance.
    Passages(Vec<RetrievedPassage>),
    /// Live fleet telemetry, possibly partial.
    Telemetry(TelemetryBundle),
}

impl GroundingContext {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Passages(passages) => passages.is_empty(),
            Self::Telemetry(bundle) => bundle.facts.is_empty(),
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Passages(_) => "passages",
            Self::Telemetry(_) => "telemetry",
        }
    }
}

// ── Draft candidate ─────────────────────────────────────────────────

/// A generated reply draft, together with what it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftCandidate {
    /// The reply body.
    pub body: String,
    /// Category the draft was written for.
    pub category: Category,
    /// Grounding context the draft was built from.
    pub context: GroundingContext,
    /// Regeneration count: 0 for the first draft, incremented on every
    /// rewrite.
    pub revision: u32,
    /// Gate feedback that triggered this revision (accumulated across the
    /// run; empty for the first draft).
    pub prior_feedback: Vec<String>,
}

// ── Workflow result ─────────────────────────────────────────────────

/// Terminal state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Quality gate accepted a draft; ready for human review and send.
    Drafted,
    /// Message was unrelated; no reply drafted.
    Suppressed,
    /// Retry budget exhausted with the gate still rejecting; the best
    /// candidate needs a human.
    Escalated,
    /// Infrastructure failure (classification or external call).
    Failed,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Drafted => "drafted",
            Self::Suppressed => "suppressed",
            Self::Escalated => "escalated",
            Self::Failed => "failed",
        }
    }
}

/// How grounding went, recorded for observability. Degradation is not an
/// error: the workflow proceeds with reduced context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroundingNote {
    /// Which grounding path ran ("passages", "telemetry", "none").
    pub kind: Option<String>,
    /// Present when grounding was partial or empty; explains why.
    pub degraded: Option<String>,
}

/// Observability trace for one workflow run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowTrace {
    /// Message this run processed.
    pub message_id: String,
    /// Resolved category, once classification succeeds.
    pub category: Option<Category>,
    /// Final revision counter (bounded by the configured maximum).
    pub revisions: u32,
    /// Grounding annotation.
    pub grounding: GroundingNote,
    /// The last quality verdict observed, if gating ran.
    pub last_verdict: Option<QAVerdict>,
    /// Stage labels in visit order.
    pub stages: Vec<String>,
}

/// The single exit artifact of the workflow core.
///
/// The mailbox connector persists `Drafted`/`Escalated` results as
/// provider-side drafts and marks `Suppressed` messages handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Terminal state tag.
    pub outcome: Outcome,
    /// Final draft: present for `Drafted` (the accepted draft) and
    /// `Escalated` (best-scoring attempt).
    pub draft: Option<DraftCandidate>,
    /// Unresolved quality issues, for `Escalated`.
    pub outstanding_issues: Vec<String>,
    /// Failure description, for `Failed`.
    pub failure: Option<String>,
    /// Run trace.
    pub trace: WorkflowTrace,
}

impl WorkflowResult {
    /// Convert into a `Result` for an outer retry-at-the-message-level
    /// policy: only `Failed` becomes an error.
    pub fn into_result(self) -> Result<Self, Error> {
        match self.outcome {
            Outcome::Failed => {
                let reason = self
                    .failure
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string());
                Err(Error::Workflow(WorkflowError::Stage {
                    stage: self
                        .trace
                        .stages
                        .last()
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string()),
                    reason,
                }))
            }
            _ => Ok(self),
        }
    }
}
