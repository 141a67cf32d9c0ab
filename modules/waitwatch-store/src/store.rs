use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use waitwatch_common::{CanonicalEntity, Coordinate, SyncCheckpoint};

use crate::error::Result;

/// Great-circle containment filter. Radius in miles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFilter {
    pub center: Coordinate,
    pub radius_miles: f64,
}

/// Conjunctive read predicate shared by `count_matching` and `fetch_page`
/// so page slices and totals always agree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacilityFilter {
    /// Case-insensitive substring on name or joined address.
    pub search: Option<String>,
    pub geo: Option<GeoFilter>,
}

/// Observed-value write for one facility. Touches nothing else.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedValueUpdate {
    pub identifier: String,
    pub value: String,
    pub has_value: bool,
    pub is_live: bool,
    pub at: DateTime<Utc>,
}

/// Persisted facility store.
///
/// Upserts follow the field-ownership merge of
/// [`CanonicalEntity::merged_with`]: identity fields overwritten, coordinates
/// only replaced by non-null values, observed-value fields only replaced by
/// meaningful values.
#[async_trait]
pub trait FacilityStore: Send + Sync {
    async fn count(&self) -> Result<u64>;

    async fn known_identifiers(&self) -> Result<HashSet<String>>;

    async fn get(&self, identifier: &str) -> Result<Option<CanonicalEntity>>;

    /// All-or-nothing upsert of a batch.
    async fn upsert_batch(&self, entities: &[CanonicalEntity]) -> Result<()>;

    async fn upsert_one(&self, entity: &CanonicalEntity) -> Result<()>;

    /// Returns false when no row has this identifier.
    async fn apply_observed_value(&self, update: &ObservedValueUpdate) -> Result<bool>;

    /// Every stored facility, for matching.
    async fn list_candidates(&self) -> Result<Vec<CanonicalEntity>>;

    async fn count_matching(&self, filter: &FacilityFilter) -> Result<u64>;

    /// Ordered by name, then identifier.
    async fn fetch_page(
        &self,
        filter: &FacilityFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<CanonicalEntity>>;

    async fn load_checkpoint(&self, job_name: &str) -> Result<Option<SyncCheckpoint>>;

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()>;
}

impl FacilityFilter {
    /// In-process evaluation of the predicate, for stores without SQL.
    pub fn matches(&self, entity: &CanonicalEntity) -> bool {
        if let Some(term) = &self.search {
            let term = term.to_lowercase();
            let in_name = entity.name.to_lowercase().contains(&term);
            let in_address = entity.address.joined().to_lowercase().contains(&term);
            if !in_name && !in_address {
                return false;
            }
        }
        if let Some(geo) = &self.geo {
            match entity.coordinate {
                Some(c) if c.within_miles(&geo.center, geo.radius_miles) => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waitwatch_common::AddressParts;

    fn mercy() -> CanonicalEntity {
        CanonicalEntity::builder()
            .identifier("1")
            .name("Mercy General")
            .address(AddressParts::new("1 Main St", "Reno", "NV", "89501"))
            .coordinate(Some(Coordinate::new(39.5296, -119.8138)))
            .build()
    }

    #[test]
    fn search_is_case_insensitive_over_name_and_address() {
        let by_name = FacilityFilter {
            search: Some("MERCY".into()),
            geo: None,
        };
        let by_city = FacilityFilter {
            search: Some("reno".into()),
            geo: None,
        };
        let miss = FacilityFilter {
            search: Some("sparks".into()),
            geo: None,
        };
        assert!(by_name.matches(&mercy()));
        assert!(by_city.matches(&mercy()));
        assert!(!miss.matches(&mercy()));
    }

    #[test]
    fn geo_filter_excludes_unplaced_facilities() {
        let filter = FacilityFilter {
            search: None,
            geo: Some(GeoFilter {
                center: Coordinate::new(39.5296, -119.8138),
                radius_miles: 10.0,
            }),
        };
        assert!(filter.matches(&mercy()));

        let mut unplaced = mercy();
        unplaced.coordinate = None;
        assert!(!filter.matches(&unplaced));
    }
}
