//! HTTP adapter for the fleet-data platform.
//!
//! Thin REST client: one GET per entity lookup, bearer-token auth, and
//! rate-limit-aware error classification so the retry layer can back off.
//! The attribute mapping is flattened from the platform's JSON `data`
//! payload; nested objects flatten one level with dotted keys
//! (`gps.latitude`).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{EntityKind, FleetDataService};
use crate::error::FleetError;

/// Fleet-data platform client.
pub struct HttpFleetService {
    http: reqwest::Client,
    base_url: String,
    api_token: SecretString,
}

impl HttpFleetService {
    pub fn new(base_url: impl Into<String>, api_token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        }
    }

    fn endpoint(&self, kind: EntityKind, id: &str) -> String {
        let resource = match kind {
            EntityKind::Vehicle => "vehicles",
            EntityKind::Driver => "drivers",
            EntityKind::Location => "addresses",
        };
        format!("{}/fleet/{}/{}", self.base_url, resource, id)
    }
}

#[async_trait]
impl FleetDataService for HttpFleetService {
    async fn lookup(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<BTreeMap<String, String>>, FleetError> {
        let url = self.endpoint(kind, id);
        debug!(%url, "Fleet lookup");

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.api_token.expose_secret())
            .send()
            .await
            .map_err(|e| FleetError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FleetError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(FleetError::RequestFailed {
                reason: format!("HTTP {}", status),
            });
        }

        let payload: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| FleetError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        let data = payload.get("data").unwrap_or(&payload);
        if data.is_null() {
            return Ok(None);
        }
        let object = data.as_object().ok_or_else(|| FleetError::InvalidResponse {
            reason: "expected a JSON object in `data`".to_string(),
        })?;

        Ok(Some(flatten_attributes(object)))
    }
}

/// Flatten a JSON object into name→value pairs, one nested level deep.
fn flatten_attributes(
    object: &serde_json::Map<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    for (key, value) in object {
        match value {
            serde_json::Value::Object(nested) => {
                for (nested_key, nested_value) in nested {
                    if let Some(text) = scalar_to_string(nested_value) {
                        attributes.insert(format!("{}.{}", key, nested_key), text);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                let joined: Vec<String> =
                    items.iter().filter_map(scalar_to_string).collect();
                if !joined.is_empty() {
                    attributes.insert(key.clone(), joined.join(", "));
                }
            }
            other => {
                if let Some(text) = scalar_to_string(other) {
                    attributes.insert(key.clone(), text);
                }
            }
        }
    }
    attributes
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
