use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use waitwatch_common::{is_meaningful_value, CanonicalEntity, MatchResult};

use crate::error::Result;
use crate::store::{FacilityStore, ObservedValueUpdate};

/// One row the store refused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    pub identifier: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpsertReport {
    /// True when the whole batch went through in one transaction.
    pub batch_ok: bool,
    pub upserted: usize,
    pub failed: Vec<RowFailure>,
}

/// Write path into the facility store.
///
/// A failed batch degrades to row-by-row writes so one bad row never costs
/// the rest. Only a connectivity failure is returned as an error.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn FacilityStore>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn FacilityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn FacilityStore> {
        &self.store
    }

    pub async fn upsert(&self, entities: &[CanonicalEntity]) -> Result<UpsertReport> {
        if entities.is_empty() {
            return Ok(UpsertReport::default());
        }

        match self.store.upsert_batch(entities).await {
            Ok(()) => {
                return Ok(UpsertReport {
                    batch_ok: true,
                    upserted: entities.len(),
                    failed: Vec::new(),
                })
            }
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                warn!(
                    rows = entities.len(),
                    error = %e,
                    "Batch upsert failed, falling back to per-row writes"
                );
            }
        }

        let mut report = UpsertReport::default();
        for entity in entities {
            match self.store.upsert_one(entity).await {
                Ok(()) => report.upserted += 1,
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    warn!(identifier = entity.identifier.as_str(), error = %e, "Row upsert failed");
                    report.failed.push(RowFailure {
                        identifier: entity.identifier.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            upserted = report.upserted,
            failed = report.failed.len(),
            "Per-row upsert fallback finished"
        );
        Ok(report)
    }

    /// Write the matched observation's value onto its facility. Only the
    /// observed-value fields change. `Ok(false)` when the identifier has no
    /// row.
    pub async fn apply_observed_value(&self, matched: &MatchResult, is_live: bool) -> Result<bool> {
        let value = matched.observation.observed_value.trim().to_string();
        let update = ObservedValueUpdate {
            identifier: matched.identifier.clone(),
            has_value: is_meaningful_value(&value),
            value,
            is_live,
            at: Utc::now(),
        };
        self.store.apply_observed_value(&update).await
    }
}
