//! SyncController: incremental canonical-registry sync with resumable
//! progress.
//!
//! 1. Fetch raw rows, clean, collapse duplicate identifiers
//! 2. Compute the delta against the stored checkpoint and known identifiers
//! 3. Skip rows below a saved progress offset (interrupted run)
//! 4. Per chunk: geocode with a bounded worker pool, upsert, save progress
//! 5. On completion advance `last_run` and reset the offset

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use waitwatch_common::{CanonicalEntity, SyncCheckpoint, SyncConfig};
use waitwatch_geocode::{AddressComponents, GeocodeResolver, Resolution};
use waitwatch_store::{FacilityStore, PersistenceGateway};

use crate::source::{clean_record, dedupe_latest, CanonicalSource, SourceRecord};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub fetched: usize,
    /// Rows dropped during cleaning (no identifier).
    pub skipped: usize,
    /// Rows folded into a later row with the same identifier.
    pub duplicates: usize,
    pub full_run: bool,
    /// Records selected for processing, including any below the resume offset.
    pub delta: usize,
    pub resumed_from: usize,
    pub processed: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub upserted: usize,
    pub row_failures: usize,
}

pub struct SyncController {
    source: Arc<dyn CanonicalSource>,
    resolver: Arc<GeocodeResolver>,
    gateway: PersistenceGateway,
    config: SyncConfig,
}

/// Outcome of processing one record in a worker.
enum Processed {
    Ready { entity: CanonicalEntity, resolved: bool },
    Failed,
}

impl SyncController {
    pub fn new(
        source: Arc<dyn CanonicalSource>,
        resolver: Arc<GeocodeResolver>,
        gateway: PersistenceGateway,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            resolver,
            gateway,
            config,
        }
    }

    fn store(&self) -> &Arc<dyn FacilityStore> {
        self.gateway.store()
    }

    /// Load this job's checkpoint and run one pass.
    pub async fn run(&self) -> Result<SyncReport> {
        let checkpoint = self
            .store()
            .load_checkpoint(&self.config.job_name)
            .await
            .context("Failed to load sync checkpoint")?;
        self.sync(checkpoint).await
    }

    /// One idempotent pass. Safe to re-run after any failure.
    pub async fn sync(&self, checkpoint: Option<SyncCheckpoint>) -> Result<SyncReport> {
        let mut report = SyncReport {
            run_id: Uuid::new_v4(),
            ..SyncReport::default()
        };
        let job_name = self.config.job_name.as_str();
        info!(run_id = %report.run_id, job_name, source = self.source.describe(), "Sync starting");

        let raw = self
            .source
            .fetch()
            .await
            .with_context(|| format!("Failed to fetch canonical records from {}", self.source.describe()))?;
        report.fetched = raw.len();

        let cleaned: Vec<SourceRecord> = raw
            .iter()
            .enumerate()
            .filter_map(|(i, r)| clean_record(r, i))
            .collect();
        report.skipped = report.fetched - cleaned.len();
        let records = dedupe_latest(cleaned);
        report.duplicates = report.fetched - report.skipped - records.len();

        let stored = self.store().count().await.context("Failed to count stored facilities")?;
        let since = checkpoint
            .as_ref()
            .and_then(|c| c.last_run)
            .map(|t| t.date_naive());
        report.full_run = stored == 0 || since.is_none();

        let known = if report.full_run {
            HashSet::new()
        } else {
            self.store()
                .known_identifiers()
                .await
                .context("Failed to load known identifiers")?
        };

        let selected: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| report.full_run || in_delta(r, since, &known))
            .map(|(i, _)| i)
            .collect();
        report.delta = selected.len();

        let offset = resume_offset(checkpoint.as_ref(), records.len());
        report.resumed_from = offset;
        if offset > 0 {
            info!(offset, total = records.len(), "Resuming interrupted sync");
        }

        let pending: Vec<usize> = selected.into_iter().filter(|&i| i >= offset).collect();
        info!(
            fetched = report.fetched,
            unique = records.len(),
            delta = report.delta,
            pending = pending.len(),
            full_run = report.full_run,
            "Delta computed"
        );

        let last_run = checkpoint.as_ref().and_then(|c| c.last_run);
        let chunk_size = self.config.checkpoint_interval.max(1);
        let workers = self.config.worker_limit.max(1);

        for chunk in pending.chunks(chunk_size) {
            let processed: Vec<Processed> =
                stream::iter(chunk.iter().copied().map(|i| self.process(&records[i])))
                    .buffered(workers)
                    .collect()
                    .await;

            let mut ready = Vec::with_capacity(processed.len());
            for p in processed {
                match p {
                    Processed::Ready { entity, resolved } => {
                        report.processed += 1;
                        if !resolved {
                            report.unresolved += 1;
                        }
                        ready.push(entity);
                    }
                    Processed::Failed => report.failed += 1,
                }
            }

            let upsert = self
                .gateway
                .upsert(&ready)
                .await
                .context("Store unreachable during upsert")?;
            report.upserted += upsert.upserted;
            report.row_failures += upsert.failed.len();

            self.resolver.flush_cache().await;

            // The chunk is committed; everything below the last index is done.
            let next = chunk.last().map_or(offset, |&i| i + 1);
            let progress = SyncCheckpoint {
                job_name: job_name.to_string(),
                last_run,
                progress_offset: next,
                source_len: records.len(),
            };
            self.save_progress(&progress).await?;
            info!(
                progress = next,
                total = records.len(),
                upserted = report.upserted,
                "Sync progress saved"
            );
        }

        let done = SyncCheckpoint {
            job_name: job_name.to_string(),
            last_run: Some(Utc::now()),
            progress_offset: 0,
            source_len: records.len(),
        };
        self.store()
            .save_checkpoint(&done)
            .await
            .context("Failed to advance sync checkpoint")?;

        info!(
            run_id = %report.run_id,
            processed = report.processed,
            failed = report.failed,
            unresolved = report.unresolved,
            upserted = report.upserted,
            row_failures = report.row_failures,
            geocode_calls = self.resolver.stats().external_calls(),
            geocode_cache_hits = self.resolver.stats().cache_hits(),
            "Sync complete"
        );
        Ok(report)
    }

    /// Resolve coordinates for one record. Unresolved still yields an entity
    /// with a null coordinate.
    async fn process(&self, record: &SourceRecord) -> Processed {
        let entity = &record.entity;
        if entity.name.trim().is_empty() {
            warn!(identifier = entity.identifier.as_str(), "Canonical record has no name, skipping");
            return Processed::Failed;
        }

        let resolution = self.resolver.resolve(&AddressComponents::from(entity)).await;
        let coordinate = match resolution {
            Resolution::Resolved(c) if c.is_valid() => Some(c),
            Resolution::Resolved(c) => {
                warn!(
                    identifier = entity.identifier.as_str(),
                    lat = c.lat,
                    lng = c.lng,
                    "Geocoder returned an out-of-range coordinate, ignoring"
                );
                None
            }
            Resolution::Unresolved => None,
        };

        Processed::Ready {
            resolved: coordinate.is_some(),
            entity: CanonicalEntity {
                coordinate,
                ..entity.clone()
            },
        }
    }

    /// Progress saves only abort the run when the store is unreachable; a
    /// lost marker just means some rework after a crash.
    async fn save_progress(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        match self.store().save_checkpoint(checkpoint).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_connectivity() => {
                error!(error = %e, "Store unreachable while saving progress");
                Err(anyhow::Error::new(e).context("Failed to save sync progress"))
            }
            Err(e) => {
                warn!(error = %e, "Failed to save sync progress, continuing");
                Ok(())
            }
        }
    }
}

/// New identifiers, undated records and records changed after the last
/// completed run.
fn in_delta(record: &SourceRecord, since: Option<NaiveDate>, known: &HashSet<String>) -> bool {
    if !known.contains(&record.entity.identifier) {
        return true;
    }
    match (record.modified, since) {
        (None, _) | (_, None) => true,
        (Some(modified), Some(since)) => modified > since,
    }
}

/// Offset to resume from, or 0 when the saved offset refers to a different
/// input.
fn resume_offset(checkpoint: Option<&SyncCheckpoint>, current_len: usize) -> usize {
    let Some(cp) = checkpoint else {
        return 0;
    };
    if cp.progress_offset == 0 {
        return 0;
    }
    if cp.source_len != current_len {
        warn!(
            saved_len = cp.source_len,
            current_len,
            offset = cp.progress_offset,
            "Source changed since interrupted run, discarding progress offset"
        );
        return 0;
    }
    cp.progress_offset.min(current_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use waitwatch_common::AddressParts;

    fn record(id: &str, modified: Option<NaiveDate>) -> SourceRecord {
        SourceRecord {
            entity: CanonicalEntity::builder()
                .identifier(id)
                .name("X")
                .address(AddressParts::default())
                .build(),
            modified,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn delta_rules() {
        let known: HashSet<String> = ["old".to_string()].into();
        let since = date(2024, 3, 1);

        assert!(in_delta(&record("new", date(2020, 1, 1)), since, &known));
        assert!(in_delta(&record("old", None), since, &known));
        assert!(in_delta(&record("old", date(2024, 3, 2)), since, &known));
        assert!(!in_delta(&record("old", date(2024, 3, 1)), since, &known));
        assert!(!in_delta(&record("old", date(2024, 2, 1)), since, &known));
    }

    #[test]
    fn resume_offset_requires_matching_source_len() {
        let cp = SyncCheckpoint {
            job_name: "j".into(),
            last_run: None,
            progress_offset: 50,
            source_len: 200,
        };
        assert_eq!(resume_offset(Some(&cp), 200), 50);
        assert_eq!(resume_offset(Some(&cp), 201), 0);
        assert_eq!(resume_offset(None, 200), 0);
    }
}
