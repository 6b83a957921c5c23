//! Inbox Triage — automated triage and reply drafting for support email.
//!
//! The crate implements the per-message decision workflow: classify an
//! inbound email, gather grounding context (knowledge-base passages or live
//! fleet telemetry), synthesize a reply draft, and run it through a quality
//! gate with a bounded revise-on-reject loop. Mailbox I/O, credential
//! handling, and the dashboard live outside this crate — they consume the
//! `WorkflowResult` this core produces.

pub mod classify;
pub mod config;
pub mod error;
pub mod llm;
pub mod quality;
pub mod retrieval;
mod retry;
pub mod synthesis;
pub mod telemetry;
pub mod workflow;
