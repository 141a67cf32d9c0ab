//! Observation ingestion: extractor payload → matcher → observed-value
//! updates → push events.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use waitwatch_common::{ObservationRecord, ObservedValueEvent};
use waitwatch_store::PersistenceGateway;

use crate::broadcast::Broadcaster;
use crate::matcher::EntityMatcher;

#[derive(Deserialize)]
#[serde(untagged)]
enum PayloadShape {
    Wrapped(WrappedPayload),
    Bare(Vec<ExtractedItem>),
}

#[derive(Deserialize)]
struct WrappedPayload {
    #[serde(alias = "hospitals")]
    facilities: Vec<ExtractedItem>,
}

#[derive(Deserialize)]
struct ExtractedItem {
    #[serde(default, alias = "hospital_name")]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default, alias = "wait_time")]
    observed_value: Option<Value>,
}

/// Drop a surrounding Markdown code fence (with or without a language tag).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn value_text(v: Option<Value>) -> String {
    match v {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Parse the extraction step's JSON into observation records for one
/// source label. Malformed payloads yield an empty batch; items without a
/// name are dropped.
pub fn parse_extraction_payload(raw: &str, source_label: &str) -> Vec<ObservationRecord> {
    let body = strip_code_fence(raw);
    let items = match serde_json::from_str::<PayloadShape>(body) {
        Ok(PayloadShape::Wrapped(w)) => w.facilities,
        Ok(PayloadShape::Bare(items)) => items,
        Err(e) => {
            warn!(source_label, error = %e, "Unparseable extraction payload, ignoring batch");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| {
            let name = item.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
            Some(ObservationRecord::new(
                name,
                item.address.unwrap_or_default().trim(),
                value_text(item.observed_value),
                source_label,
            ))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub source_label: String,
    pub observations: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub applied: usize,
    /// Matched identifiers with no stored row by the time of the update.
    pub missing_rows: usize,
    pub failed_updates: usize,
}

/// Runs one batch of observations through matching and persistence.
/// Batches for different labels may run concurrently; each claims
/// candidates only within itself.
#[derive(Clone)]
pub struct ObservationIngestor {
    matcher: Arc<EntityMatcher>,
    gateway: PersistenceGateway,
    broadcaster: Arc<dyn Broadcaster>,
}

impl ObservationIngestor {
    pub fn new(
        matcher: Arc<EntityMatcher>,
        gateway: PersistenceGateway,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            matcher,
            gateway,
            broadcaster,
        }
    }

    pub async fn ingest(
        &self,
        source_label: &str,
        observations: &[ObservationRecord],
    ) -> Result<IngestReport> {
        let mut report = IngestReport {
            source_label: source_label.to_string(),
            observations: observations.len(),
            ..IngestReport::default()
        };
        if observations.is_empty() {
            info!(source_label, "Empty observation batch");
            return Ok(report);
        }

        let candidates = self
            .gateway
            .store()
            .list_candidates()
            .await
            .context("Failed to load match candidates")?;
        let outcome = self
            .matcher
            .match_batch(observations, &candidates, source_label)
            .await;
        report.matched = outcome.matches.len();
        report.unmatched = outcome.unmatched.len();

        for matched in &outcome.matches {
            match self.gateway.apply_observed_value(matched, true).await {
                Ok(true) => {
                    report.applied += 1;
                    self.broadcaster.publish(ObservedValueEvent {
                        identifier: matched.identifier.clone(),
                        new_value: matched.observation.observed_value.trim().to_string(),
                        is_live: true,
                    });
                }
                Ok(false) => {
                    warn!(
                        identifier = matched.identifier.as_str(),
                        observation = matched.observation.name.as_str(),
                        "Matched facility no longer stored, update skipped"
                    );
                    report.missing_rows += 1;
                }
                Err(e) if e.is_connectivity() => {
                    return Err(anyhow::Error::new(e).context("Store unreachable while applying observations"));
                }
                Err(e) => {
                    warn!(identifier = matched.identifier.as_str(), error = %e, "Observed value update failed");
                    report.failed_updates += 1;
                }
            }
        }

        info!(
            source_label,
            observations = report.observations,
            matched = report.matched,
            applied = report.applied,
            unmatched = report.unmatched,
            "Observation batch ingested"
        );
        Ok(report)
    }
}
