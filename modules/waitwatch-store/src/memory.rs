//! In-memory FacilityStore for tests. Same merge rules as the Postgres
//! upsert, plus failure injection for exercising the gateway fallback.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use waitwatch_common::{CanonicalEntity, SyncCheckpoint};

use crate::error::{Result, StoreError};
use crate::store::{FacilityFilter, FacilityStore, ObservedValueUpdate};

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<String, CanonicalEntity>>,
    checkpoints: RwLock<HashMap<String, SyncCheckpoint>>,
    rejected: RwLock<HashSet<String>>,
    offline: AtomicBool,
    batch_calls: AtomicUsize,
    checkpoint_saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_entities(entities: impl IntoIterator<Item = CanonicalEntity>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.write().await;
            for e in entities {
                rows.insert(e.identifier.clone(), e.normalized_for_insert());
            }
        }
        store
    }

    /// Rows with this identifier fail with a constraint error, singly or in
    /// any batch that contains them.
    pub async fn reject_identifier(&self, identifier: &str) {
        self.rejected.write().await.insert(identifier.to_string());
    }

    /// Every call fails with a connectivity error while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn checkpoint_saves(&self) -> usize {
        self.checkpoint_saves.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Vec<CanonicalEntity> {
        self.rows.read().await.values().cloned().collect()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn check_accepted(&self, entity: &CanonicalEntity) -> Result<()> {
        if self.rejected.read().await.contains(&entity.identifier) {
            return Err(StoreError::Constraint {
                identifier: entity.identifier.clone(),
                reason: "rejected by test store".to_string(),
            });
        }
        Ok(())
    }

    fn merge_into(rows: &mut BTreeMap<String, CanonicalEntity>, entity: &CanonicalEntity) {
        let merged = match rows.get(&entity.identifier) {
            Some(existing) => existing.merged_with(entity),
            None => entity.normalized_for_insert(),
        };
        rows.insert(entity.identifier.clone(), merged);
    }

    async fn filtered(&self, filter: &FacilityFilter) -> Vec<CanonicalEntity> {
        let mut matching: Vec<_> = self
            .rows
            .read()
            .await
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        matching
    }
}

#[async_trait]
impl FacilityStore for MemoryStore {
    async fn count(&self) -> Result<u64> {
        self.check_online()?;
        Ok(self.rows.read().await.len() as u64)
    }

    async fn known_identifiers(&self) -> Result<HashSet<String>> {
        self.check_online()?;
        Ok(self.rows.read().await.keys().cloned().collect())
    }

    async fn get(&self, identifier: &str) -> Result<Option<CanonicalEntity>> {
        self.check_online()?;
        Ok(self.rows.read().await.get(identifier).cloned())
    }

    async fn upsert_batch(&self, entities: &[CanonicalEntity]) -> Result<()> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        for entity in entities {
            self.check_accepted(entity).await?;
        }
        let mut rows = self.rows.write().await;
        for entity in entities {
            Self::merge_into(&mut rows, entity);
        }
        Ok(())
    }

    async fn upsert_one(&self, entity: &CanonicalEntity) -> Result<()> {
        self.check_online()?;
        self.check_accepted(entity).await?;
        Self::merge_into(&mut *self.rows.write().await, entity);
        Ok(())
    }

    async fn apply_observed_value(&self, update: &ObservedValueUpdate) -> Result<bool> {
        self.check_online()?;
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&update.identifier) else {
            return Ok(false);
        };
        row.observed_value = Some(update.value.clone());
        row.has_observed_value = update.has_value;
        row.is_live = update.is_live;
        row.last_modified = update.at;
        Ok(true)
    }

    async fn list_candidates(&self) -> Result<Vec<CanonicalEntity>> {
        self.check_online()?;
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn count_matching(&self, filter: &FacilityFilter) -> Result<u64> {
        self.check_online()?;
        Ok(self.filtered(filter).await.len() as u64)
    }

    async fn fetch_page(
        &self,
        filter: &FacilityFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<CanonicalEntity>> {
        self.check_online()?;
        Ok(self
            .filtered(filter)
            .await
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn load_checkpoint(&self, job_name: &str) -> Result<Option<SyncCheckpoint>> {
        self.check_online()?;
        Ok(self.checkpoints.read().await.get(job_name).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        self.check_online()?;
        self.checkpoint_saves.fetch_add(1, Ordering::SeqCst);
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.job_name.clone(), checkpoint.clone());
        Ok(())
    }
}
