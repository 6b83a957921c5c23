//! Fleet telemetry resolution for fleet-related messages.
//!
//! Two phases: entity extraction (pure regex pass over the message text)
//! and one live lookup per distinct entity. Lookups are per-entity: a
//! failing lookup lands its entity in `unresolved` without blocking facts
//! already resolved for other entities.

mod extract;
pub mod fleet_api;

pub use extract::EntityExtractor;
pub use fleet_api::HttpFleetService;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::FleetError;
use crate::retry::with_backoff;
use crate::workflow::types::InboundMessage;

// ── Entities and facts ──────────────────────────────────────────────

/// Kinds of fleet entities the resolver recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Vehicle,
    Driver,
    Location,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vehicle => write!(f, "vehicle"),
            Self::Driver => write!(f, "driver"),
            Self::Location => write!(f, "location"),
        }
    }
}

/// A fleet entity reference extracted from message text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// A resolved fact: the entity plus the attribute mapping the live lookup
/// returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryFact {
    pub entity: EntityRef,
    pub attributes: BTreeMap<String, String>,
}

/// Resolution output: resolved facts plus the entities that could not be
/// resolved (lookup failure or unknown to the fleet platform).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryBundle {
    pub facts: Vec<TelemetryFact>,
    pub unresolved: Vec<EntityRef>,
}

impl TelemetryBundle {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.unresolved.is_empty()
    }
}

// ── Fleet-data service ──────────────────────────────────────────────

/// Live fleet-data lookup.
///
/// `Ok(None)` means the entity is unknown to the platform — distinct from
/// a transport failure.
#[async_trait]
pub trait FleetDataService: Send + Sync {
    async fn lookup(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<BTreeMap<String, String>>, FleetError>;
}

// ── Resolver ────────────────────────────────────────────────────────

/// Telemetry resolver: entity extraction plus per-entity live lookups.
pub struct TelemetryResolver {
    fleet: Arc<dyn FleetDataService>,
    extractor: EntityExtractor,
    retry: RetryPolicy,
}

impl TelemetryResolver {
    pub fn new(fleet: Arc<dyn FleetDataService>, retry: RetryPolicy) -> Self {
        Self {
            fleet,
            extractor: EntityExtractor::new(),
            retry,
        }
    }

    /// Resolve telemetry facts for a fleet-related message.
    ///
    /// Never fails the workflow: an empty bundle (no entity recognized, or
    /// every lookup failed) is reported as degraded grounding by the
    /// orchestrator.
    pub async fn resolve(&self, message: &InboundMessage) -> TelemetryBundle {
        let entities = self.extractor.extract(&message.text());
        if entities.is_empty() {
            debug!(id = %message.id, "No fleet entities recognized");
            return TelemetryBundle::default();
        }

        let mut bundle = TelemetryBundle::default();
        for entity in entities {
            match self.lookup_with_retry(&entity).await {
                Ok(Some(attributes)) => {
                    debug!(
                        entity = %entity.kind,
                        entity_id = %entity.id,
                        attrs = attributes.len(),
                        "Fleet lookup resolved"
                    );
                    bundle.facts.push(TelemetryFact {
                        entity,
                        attributes,
                    });
                }
                Ok(None) => {
                    debug!(
                        entity = %entity.kind,
                        entity_id = %entity.id,
                        "Entity unknown to fleet platform"
                    );
                    bundle.unresolved.push(entity);
                }
                Err(e) => {
                    warn!(
                        entity = %entity.kind,
                        entity_id = %entity.id,
                        error = %e,
                        "Fleet lookup failed, continuing with remaining entities"
                    );
                    bundle.unresolved.push(entity);
                }
            }
        }
        bundle
    }

    async fn lookup_with_retry(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<BTreeMap<String, String>>, FleetError> {
        let fleet = Arc::clone(&self.fleet);
        let kind = entity.kind;
        let id = entity.id.clone();
        with_backoff("fleet_lookup", &self.retry, FleetError::is_retryable, move || {
            let fleet = Arc::clone(&fleet);
            let id = id.clone();
            async move { fleet.lookup(kind, &id).await }
        })
        .await
    }
}
