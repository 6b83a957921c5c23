//! Workflow orchestrator — the per-message state machine.
//!
//! States:
//! `Received → Classified → {Suppressed | Grounding → Drafting → Gating →
//! {Accepted | Revising → Drafting} | Escalated | Failed}`.
//!
//! Every transition is one [`Orchestrator::advance`] step over a tagged
//! [`WorkflowState`] variant, so each is testable in isolation. [`run`]
//! drives the machine to a terminal state and renders the single exit
//! artifact, [`WorkflowResult`]. Runs share no mutable state; `run_batch`
//! multiplexes many runs under a concurrency bound.
//!
//! [`run`]: Orchestrator::run

pub mod types;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::classify::{Category, Classifier};
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::llm::CompletionService;
use crate::quality::{QAVerdict, QualityGate};
use crate::retrieval::{KnowledgeBase, Retriever};
use crate::synthesis::DraftSynthesizer;
use crate::telemetry::{FleetDataService, TelemetryResolver};
use crate::workflow::types::{
    DraftCandidate, GroundingContext, InboundMessage, Outcome, WorkflowResult, WorkflowTrace,
};

// ── State machine ───────────────────────────────────────────────────

/// Tagged workflow states. The four terminal variants map 1:1 onto
/// [`Outcome`].
#[derive(Debug)]
pub enum WorkflowState {
    /// Raw message accepted for processing.
    Received { message: InboundMessage },
    /// Category assigned.
    Classified {
        message: InboundMessage,
        category: Category,
    },
    /// Gathering grounding context for the category's strategy.
    Grounding {
        message: InboundMessage,
        category: Category,
    },
    /// Synthesizing a draft (first pass or rewrite).
    Drafting {
        message: InboundMessage,
        category: Category,
        context: GroundingContext,
        feedback: Vec<String>,
        /// The rejected draft body, replayed to the synthesizer on a
        /// rewrite.
        prior_body: Option<String>,
        revision: u32,
    },
    /// Draft under quality evaluation.
    Gating {
        message: InboundMessage,
        draft: DraftCandidate,
    },
    /// Draft rejected; deciding between rewrite and escalation.
    Revising {
        message: InboundMessage,
        draft: DraftCandidate,
        verdict: QAVerdict,
    },
    /// Terminal: unrelated message, no reply drafted.
    Suppressed,
    /// Terminal: gate accepted the draft.
    Accepted {
        draft: DraftCandidate,
        verdict: QAVerdict,
    },
    /// Terminal: revision budget exhausted with the gate still rejecting.
    Escalated { issues: Vec<String> },
    /// Terminal: infrastructure failure.
    Failed {
        stage: &'static str,
        reason: String,
    },
}

impl WorkflowState {
    /// Short label for the trace.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Received { .. } => "received",
            Self::Classified { .. } => "classified",
            Self::Grounding { .. } => "grounding",
            Self::Drafting { .. } => "drafting",
            Self::Gating { .. } => "gating",
            Self::Revising { .. } => "revising",
            Self::Suppressed => "suppressed",
            Self::Accepted { .. } => "accepted",
            Self::Escalated { .. } => "escalated",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Suppressed | Self::Accepted { .. } | Self::Escalated { .. } | Self::Failed { .. }
        )
    }
}

/// Per-run bookkeeping threaded through the transitions.
#[derive(Debug, Default)]
pub struct RunContext {
    pub trace: WorkflowTrace,
    /// Best-scoring (draft, verdict) pair seen at the gate, retained for
    /// escalation.
    pub best: Option<(DraftCandidate, QAVerdict)>,
}

// ── Orchestrator ────────────────────────────────────────────────────

/// Drives inbound messages through the triage workflow.
pub struct Orchestrator {
    classifier: Classifier,
    retriever: Retriever,
    telemetry: TelemetryResolver,
    synthesizer: DraftSynthesizer,
    gate: QualityGate,
    config: WorkflowConfig,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn CompletionService>,
        kb: Arc<dyn KnowledgeBase>,
        fleet: Arc<dyn FleetDataService>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            classifier: Classifier::new(Arc::clone(&llm), config.retry.clone()),
            retriever: Retriever::new(kb, Arc::clone(&llm), &config),
            telemetry: TelemetryResolver::new(fleet, config.retry.clone()),
            synthesizer: DraftSynthesizer::new(Arc::clone(&llm), config.retry.clone()),
            gate: QualityGate::new(llm, &config),
            config,
        }
    }

    /// Run the workflow for one message to a terminal outcome.
    ///
    /// Total: every failure mode is rendered into the result. Use
    /// [`WorkflowResult::into_result`] to surface `Failed` as an error for
    /// an outer retry policy.
    pub async fn run(&self, message: InboundMessage) -> WorkflowResult {
        // The never-set flag makes the cancellable driver infallible here.
        static NEVER: AtomicBool = AtomicBool::new(false);
        self.drive(message, &NEVER)
            .await
            .expect("uncancellable run cannot be cancelled")
    }

    /// Run the workflow, checking `cancel` between stages.
    ///
    /// A cancelled run discards all intermediate work; in-flight external
    /// calls complete but their results are dropped. The core persists
    /// nothing, so cancellation leaves no partial side effect.
    pub async fn run_cancellable(
        &self,
        message: InboundMessage,
        cancel: &AtomicBool,
    ) -> Result<WorkflowResult, WorkflowError> {
        self.drive(message, cancel).await
    }

    /// Process a batch of messages concurrently.
    ///
    /// Each run is an independent unit of work; failures terminate only
    /// their own run. Result order is not guaranteed to match input order.
    pub async fn run_batch(&self, messages: Vec<InboundMessage>) -> Vec<WorkflowResult> {
        let concurrency = self.config.max_concurrent_runs.max(1);
        let count = messages.len();
        info!(count, concurrency, "Processing message batch");

        let results: Vec<WorkflowResult> = stream::iter(messages)
            .map(|message| self.run(message))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        info!(processed = results.len(), total = count, "Batch complete");
        results
    }

    async fn drive(
        &self,
        message: InboundMessage,
        cancel: &AtomicBool,
    ) -> Result<WorkflowResult, WorkflowError> {
        let mut ctx = RunContext::default();
        ctx.trace.message_id = message.id.clone();

        info!(id = %message.id, sender = %message.sender, "Workflow started");

        let mut state = WorkflowState::Received { message };
        ctx.trace.stages.push(state.label().to_string());

        while !state.is_terminal() {
            if cancel.load(Ordering::Relaxed) {
                info!(id = %ctx.trace.message_id, "Workflow cancelled, discarding run");
                return Err(WorkflowError::Cancelled);
            }
            state = self.advance(state, &mut ctx).await;
            ctx.trace.stages.push(state.label().to_string());
        }

        Ok(self.finish(state, ctx))
    }

    /// Execute exactly one state transition.
    pub async fn advance(&self, state: WorkflowState, ctx: &mut RunContext) -> WorkflowState {
        match state {
            WorkflowState::Received { message } => match self.classifier.classify(&message).await {
                Ok(category) => {
                    ctx.trace.category = Some(category);
                    info!(id = %message.id, category = %category, "Message classified");
                    WorkflowState::Classified { message, category }
                }
                Err(e) => {
                    warn!(id = %message.id, error = %e, "Classification failed");
                    WorkflowState::Failed {
                        stage: "classify",
                        reason: e.to_string(),
                    }
                }
            },

            WorkflowState::Classified { message, category } => {
                if category == Category::Unrelated {
                    info!(id = %message.id, "Unrelated message, suppressing");
                    WorkflowState::Suppressed
                } else {
                    WorkflowState::Grounding { message, category }
                }
            }

            WorkflowState::Grounding { message, category } => {
                let context = self.ground(&message, category, ctx).await;
                WorkflowState::Drafting {
                    message,
                    category,
                    context,
                    feedback: Vec::new(),
                    prior_body: None,
                    revision: 0,
                }
            }

            WorkflowState::Drafting {
                message,
                category,
                context,
                feedback,
                prior_body,
                revision,
            } => {
                ctx.trace.revisions = revision;
                match self
                    .synthesizer
                    .synthesize(
                        &message,
                        category,
                        &context,
                        &feedback,
                        prior_body.as_deref(),
                        revision,
                    )
                    .await
                {
                    Ok(draft) => WorkflowState::Gating { message, draft },
                    Err(e) => {
                        warn!(id = %message.id, error = %e, "Synthesis failed");
                        WorkflowState::Failed {
                            stage: "drafting",
                            reason: e.to_string(),
                        }
                    }
                }
            }

            WorkflowState::Gating { message, draft } => {
                match self.gate.evaluate(&draft, &message).await {
                    Ok(verdict) => {
                        ctx.trace.last_verdict = Some(verdict.clone());
                        let improves = ctx
                            .best
                            .as_ref()
                            .is_none_or(|(_, best)| verdict.score > best.score);
                        if improves {
                            ctx.best = Some((draft.clone(), verdict.clone()));
                        }
                        if verdict.approved {
                            WorkflowState::Accepted { draft, verdict }
                        } else {
                            debug!(
                                id = %message.id,
                                revision = draft.revision,
                                issues = verdict.issues.len(),
                                "Draft rejected by quality gate"
                            );
                            WorkflowState::Revising {
                                message,
                                draft,
                                verdict,
                            }
                        }
                    }
                    Err(e) => {
                        warn!(id = %message.id, error = %e, "Quality gate failed");
                        WorkflowState::Failed {
                            stage: "gating",
                            reason: e.to_string(),
                        }
                    }
                }
            }

            WorkflowState::Revising {
                message,
                draft,
                verdict,
            } => {
                if draft.revision >= self.config.max_revisions {
                    info!(
                        id = %message.id,
                        revisions = draft.revision,
                        "Revision budget exhausted, escalating"
                    );
                    WorkflowState::Escalated {
                        issues: verdict.issues,
                    }
                } else {
                    let DraftCandidate {
                        body,
                        category,
                        context,
                        revision,
                        prior_feedback: mut feedback,
                    } = draft;
                    for issue in verdict.issues {
                        if !feedback.contains(&issue) {
                            feedback.push(issue);
                        }
                    }
                    WorkflowState::Drafting {
                        message,
                        category,
                        context,
                        feedback,
                        prior_body: Some(body),
                        revision: revision + 1,
                    }
                }
            }

            // Terminal states do not advance.
            terminal => terminal,
        }
    }

    /// Gather grounding context for the category's response strategy.
    ///
    /// Degradation (empty knowledge base, no entities, failed lookups) is
    /// recorded in the trace and never fails the run.
    async fn ground(
        &self,
        message: &InboundMessage,
        category: Category,
        ctx: &mut RunContext,
    ) -> GroundingContext {
        match category {
            Category::FleetRelated => {
                ctx.trace.grounding.kind = Some("telemetry".to_string());
                let bundle = self.telemetry.resolve(message).await;
                if bundle.is_empty() {
                    ctx.trace.grounding.degraded =
                        Some("no fleet entities recognized in message".to_string());
                    return GroundingContext::None;
                }
                if bundle.facts.is_empty() {
                    ctx.trace.grounding.degraded = Some(format!(
                        "no entities resolved ({} unresolved)",
                        bundle.unresolved.len()
                    ));
                } else if !bundle.unresolved.is_empty() {
                    ctx.trace.grounding.degraded = Some(format!(
                        "partial telemetry ({} of {} entities resolved)",
                        bundle.facts.len(),
                        bundle.facts.len() + bundle.unresolved.len()
                    ));
                }
                GroundingContext::Telemetry(bundle)
            }
            Category::Complaint | Category::ProductInquiry | Category::Feedback => {
                ctx.trace.grounding.kind = Some("passages".to_string());
                let queries = self.retriever.build_queries(message).await;
                let passages: Vec<_> = self.retriever.retrieve(queries).collect().await;
                if passages.is_empty() {
                    ctx.trace.grounding.degraded =
                        Some("no passages cleared the relevance threshold".to_string());
                    GroundingContext::None
                } else {
                    GroundingContext::Passages(passages)
                }
            }
            // Unrelated is suppressed before grounding.
            Category::Unrelated => GroundingContext::None,
        }
    }

    /// Render a terminal state into the exit artifact.
    fn finish(&self, state: WorkflowState, ctx: RunContext) -> WorkflowResult {
        let RunContext { trace, best } = ctx;
        let result = match state {
            WorkflowState::Suppressed => WorkflowResult {
                outcome: Outcome::Suppressed,
                draft: None,
                outstanding_issues: Vec::new(),
                failure: None,
                trace,
            },
            WorkflowState::Accepted { draft, .. } => WorkflowResult {
                outcome: Outcome::Drafted,
                draft: Some(draft),
                outstanding_issues: Vec::new(),
                failure: None,
                trace,
            },
            WorkflowState::Escalated { issues } => WorkflowResult {
                outcome: Outcome::Escalated,
                draft: best.map(|(draft, _)| draft),
                outstanding_issues: issues,
                failure: None,
                trace,
            },
            WorkflowState::Failed { stage, reason } => WorkflowResult {
                outcome: Outcome::Failed,
                draft: None,
                outstanding_issues: Vec::new(),
                failure: Some(format!("{}: {}", stage, reason)),
                trace,
            },
            other => unreachable!("finish called on non-terminal state {:?}", other.label()),
        };

        info!(
            id = %result.trace.message_id,
            outcome = result.outcome.label(),
            revisions = result.trace.revisions,
            "Workflow finished"
        );
        result
    }
}
