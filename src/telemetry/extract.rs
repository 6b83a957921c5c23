//! Entity extraction from message text.
//!
//! Pure regex pass. Ambiguity is resolved by preferring the most specific
//! pattern (an entity noun or `#` prefix followed by an id-shaped token)
//! and otherwise skipping silently — a skipped entity never fails the
//! workflow, and no guess is ever reported as a fact.

use regex::Regex;

use super::{EntityKind, EntityRef};

/// Compiled extraction patterns.
pub struct EntityExtractor {
    vehicle: Regex,
    vehicle_hash: Regex,
    driver: Regex,
    location: Regex,
    vehicle_id_shape: Regex,
    name_or_id_shape: Regex,
    phone_like: Regex,
}

impl EntityExtractor {
    pub fn new() -> Self {
        Self {
            // "truck #482", "vehicle 17", "van A-12" — capture the next token
            // broadly, validate its shape afterwards.
            vehicle: Regex::new(
                r"(?i)\b(?:truck|vehicle|van|trailer|unit)s?\b\s*#?\s*([A-Za-z0-9'().+-]{1,20})",
            )
            .unwrap(),
            // bare "#482" with no entity noun
            vehicle_hash: Regex::new(r"#(\d{1,6})\b").unwrap(),
            // "driver 77", "driver #77", "driver Smith"
            driver: Regex::new(r"(?i)\bdrivers?\b\s*#?\s*([A-Za-z0-9'().+-]{1,20})").unwrap(),
            // "depot Atlanta", "yard 12", "terminal East"
            location: Regex::new(
                r"(?i)\b(?:depot|yard|warehouse|terminal|site)s?\b\s*#?\s*([A-Za-z0-9'().+-]{1,20})",
            )
            .unwrap(),
            // Vehicle ids: digits, optionally with a short letter prefix
            // ("482", "17", "A-12").
            vehicle_id_shape: Regex::new(r"^(?:[A-Za-z]{1,3}-)?\d{1,6}$").unwrap(),
            // Driver/location ids: a capitalized name or a numeric id.
            // Lowercase following words ("info", "was") are prose, not ids.
            name_or_id_shape: Regex::new(r"^(?:[A-Z][A-Za-z'-]{1,19}|\d{1,6})$").unwrap(),
            // 7+ digit runs with optional separators read as phone numbers.
            phone_like: Regex::new(r"^\+?\d[\d\s().-]{6,}$").unwrap(),
        }
    }

    /// Extract distinct entity references in order of first mention.
    pub fn extract(&self, text: &str) -> Vec<EntityRef> {
        let mut entities: Vec<EntityRef> = Vec::new();

        for capture in self.vehicle.captures_iter(text) {
            let token = trim_token(&capture[1]);
            if self.phone_like.is_match(token) || !self.vehicle_id_shape.is_match(token) {
                continue;
            }
            push_unique(&mut entities, EntityRef::new(EntityKind::Vehicle, token));
        }

        for capture in self.driver.captures_iter(text) {
            let token = trim_token(&capture[1]);
            if self.phone_like.is_match(token)
                || !self.name_or_id_shape.is_match(token)
                || is_stopword(token)
            {
                continue;
            }
            push_unique(&mut entities, EntityRef::new(EntityKind::Driver, token));
        }

        for capture in self.location.captures_iter(text) {
            let token = trim_token(&capture[1]);
            if self.phone_like.is_match(token)
                || !self.name_or_id_shape.is_match(token)
                || is_stopword(token)
            {
                continue;
            }
            push_unique(&mut entities, EntityRef::new(EntityKind::Location, token));
        }

        // Bare "#N" only counts when no prefixed pattern already claimed
        // the same id.
        for capture in self.vehicle_hash.captures_iter(text) {
            let id = &capture[1];
            if !entities.iter().any(|e| e.id == id) {
                push_unique(&mut entities, EntityRef::new(EntityKind::Vehicle, id));
            }
        }

        entities
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn push_unique(entities: &mut Vec<EntityRef>, entity: EntityRef) {
    if !entities.contains(&entity) {
        entities.push(entity);
    }
}

/// Strip trailing punctuation picked up by the broad token capture.
fn trim_token(token: &str) -> &str {
    token.trim_end_matches(['.', ',', '?', '!', ')', '\'', '-'])
}

/// Capitalized words that follow entity nouns without naming an entity.
fn is_stopword(token: &str) -> bool {
    matches!(
        token.to_lowercase().as_str(),
        "info" | "information" | "status" | "details" | "list" | "the"
            | "assignments" | "assignment" | "name" | "names"
    )
}
