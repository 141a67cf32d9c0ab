use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::observed::is_meaningful_value;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Structured postal address as published by the canonical registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressParts {
    pub street: String,
    pub locality: String,
    pub region: String,
    pub postal_code: String,
}

impl AddressParts {
    pub fn new(
        street: impl Into<String>,
        locality: impl Into<String>,
        region: impl Into<String>,
        postal_code: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            locality: locality.into(),
            region: region.into(),
            postal_code: postal_code.into(),
        }
    }

    /// Non-blank parts joined with ", ". A locality of literally "none" is
    /// dropped; the registry uses it for unincorporated areas.
    pub fn joined(&self) -> String {
        [
            self.street.trim(),
            self.locality.trim(),
            self.region.trim(),
            self.postal_code.trim(),
        ]
        .into_iter()
        .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("none"))
        .collect::<Vec<_>>()
        .join(", ")
    }
}

// --- Canonical entity ---

/// Authoritative facility record keyed by the registry's external identifier.
///
/// Identity and address fields are owned by the sync job. The observed-value
/// fields (`has_observed_value`, `observed_value`, `is_live`) are only ever
/// written by observation ingestion; the upsert path preserves them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct CanonicalEntity {
    #[builder(setter(into))]
    pub identifier: String,
    #[builder(setter(into))]
    pub name: String,
    #[builder(default)]
    pub address: AddressParts,
    #[builder(default, setter(into))]
    pub county: String,
    #[builder(default, setter(into))]
    pub phone: String,
    #[builder(default, setter(into))]
    pub facility_type: String,
    #[builder(default)]
    pub emergency_services: bool,
    #[builder(default)]
    pub coordinate: Option<Coordinate>,
    #[builder(default)]
    pub has_observed_value: bool,
    #[builder(default)]
    pub observed_value: Option<String>,
    #[builder(default)]
    pub is_live: bool,
    #[builder(default = DateTime::<Utc>::UNIX_EPOCH)]
    pub last_modified: DateTime<Utc>,
}

impl CanonicalEntity {
    /// Field-ownership merge applied when an incoming record collides with a
    /// stored one on `identifier`.
    ///
    /// - identity/address fields: incoming wins
    /// - coordinate: incoming only when present
    /// - observed value: incoming only when meaningful; the flag never flips
    ///   back to false through an upsert
    pub fn merged_with(&self, incoming: &CanonicalEntity) -> CanonicalEntity {
        let incoming_meaningful = incoming
            .observed_value
            .as_deref()
            .is_some_and(is_meaningful_value);

        CanonicalEntity {
            identifier: self.identifier.clone(),
            name: incoming.name.clone(),
            address: incoming.address.clone(),
            county: incoming.county.clone(),
            phone: incoming.phone.clone(),
            facility_type: incoming.facility_type.clone(),
            emergency_services: incoming.emergency_services,
            coordinate: incoming.coordinate.or(self.coordinate),
            has_observed_value: self.has_observed_value || incoming_meaningful,
            observed_value: if incoming_meaningful {
                incoming.observed_value.clone()
            } else {
                self.observed_value.clone()
            },
            is_live: if incoming_meaningful {
                incoming.is_live
            } else {
                self.is_live
            },
            last_modified: incoming.last_modified,
        }
    }

    /// Canonical entity as first inserted: the observed flag is derived from
    /// the value instead of trusted from the caller.
    pub fn normalized_for_insert(&self) -> CanonicalEntity {
        CanonicalEntity {
            has_observed_value: self.carries_observed_value(),
            ..self.clone()
        }
    }

    /// Whether `observed_value` holds real data rather than a sentinel.
    pub fn carries_observed_value(&self) -> bool {
        self.observed_value
            .as_deref()
            .is_some_and(is_meaningful_value)
    }
}

// --- Observations ---

/// Noisy record produced by the extraction step for one source group.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub name: String,
    pub address: String,
    pub observed_value: String,
    pub source_label: String,
}

impl ObservationRecord {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        observed_value: impl Into<String>,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            observed_value: observed_value.into(),
            source_label: source_label.into(),
        }
    }
}

/// One observation linked to one canonical entity, with the composite score
/// that decided it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub observation_index: usize,
    pub identifier: String,
    pub observation: ObservationRecord,
    pub score: f64,
}

// --- Sync bookkeeping ---

/// Per-job marker of the last fully committed run plus the in-flight resume
/// offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub job_name: String,
    pub last_run: Option<DateTime<Utc>>,
    /// Index into the deduplicated raw input of the first record not yet
    /// committed by an interrupted run. Zero when no run is in flight.
    pub progress_offset: usize,
    /// Length of the input the offset refers to.
    pub source_len: usize,
}

impl SyncCheckpoint {
    pub fn fresh(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            last_run: None,
            progress_offset: 0,
            source_len: 0,
        }
    }
}

// --- Push surface ---

/// Broadcast to subscribers after an observed value lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedValueEvent {
    pub identifier: String,
    pub new_value: String,
    pub is_live: bool,
}
