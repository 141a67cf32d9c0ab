use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use waitwatch_common::text::{is_unknown_address, tokens};
use waitwatch_common::{CanonicalEntity, Coordinate, MatchResult, MatchingConfig, ObservationRecord};
use waitwatch_geocode::GeocodeResolver;

use crate::fuzzy::token_set_ratio;

/// Concurrent best-effort geocodes while locating a batch of observations.
const LOCATE_CONCURRENCY: usize = 4;

/// Result of one matching pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub matches: Vec<MatchResult>,
    /// Input indices of observations that cleared no candidate.
    pub unmatched: Vec<usize>,
}

/// Links noisy observations to canonical entities.
///
/// Composite score on a 0-100 scale:
/// `w_name·name + w_addr·address + w_source·source_hint + w_geo·proximity`.
/// Assignment is greedy in input order; a candidate claimed by an earlier
/// observation is not offered to later ones.
pub struct EntityMatcher {
    config: MatchingConfig,
    resolver: Option<Arc<GeocodeResolver>>,
}

impl EntityMatcher {
    pub fn new(config: MatchingConfig, resolver: Option<Arc<GeocodeResolver>>) -> Self {
        Self { config, resolver }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Geocode the observations, then assign.
    pub async fn match_batch(
        &self,
        observations: &[ObservationRecord],
        candidates: &[CanonicalEntity],
        source_label: &str,
    ) -> MatchOutcome {
        let located = self.locate(observations).await;
        let outcome = self.assign(observations, &located, candidates, source_label);
        info!(
            source_label,
            observations = observations.len(),
            candidates = candidates.len(),
            matched = outcome.matches.len(),
            unmatched = outcome.unmatched.len(),
            "Matching pass finished"
        );
        outcome
    }

    /// Best-effort coordinates for each observation. Misses are `None` and
    /// simply contribute no proximity. New lookups are flushed to the cache.
    pub async fn locate(&self, observations: &[ObservationRecord]) -> Vec<Option<Coordinate>> {
        let Some(resolver) = &self.resolver else {
            return vec![None; observations.len()];
        };

        let queries: Vec<String> = observations
            .iter()
            .map(|obs| {
                if is_unknown_address(&obs.address) {
                    obs.name.trim().to_string()
                } else {
                    format!("{}, {}", obs.name.trim(), obs.address.trim())
                }
            })
            .collect();

        let pool = resolver.clone();
        let located: Vec<Option<Coordinate>> = stream::iter(queries.into_iter().map(move |query| {
            let resolver = pool.clone();
            async move { resolver.resolve_free_text(&query).await }
        }))
        .buffered(LOCATE_CONCURRENCY)
        .collect()
        .await;

        resolver.flush_cache().await;
        located
    }

    /// Greedy one-to-one assignment. `located[i]` is the coordinate of
    /// `observations[i]`, if any.
    pub fn assign(
        &self,
        observations: &[ObservationRecord],
        located: &[Option<Coordinate>],
        candidates: &[CanonicalEntity],
        source_label: &str,
    ) -> MatchOutcome {
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut outcome = MatchOutcome::default();

        for (index, obs) in observations.iter().enumerate() {
            let coord = located.get(index).copied().flatten();

            let mut best: Option<(usize, f64)> = None;
            for (ci, candidate) in candidates.iter().enumerate() {
                if claimed.contains(&ci) {
                    continue;
                }
                let score = self.score(obs, coord, candidate, source_label);
                if best.is_none_or(|(_, top)| score > top) {
                    best = Some((ci, score));
                }
            }

            match best {
                Some((ci, score)) if score >= self.config.threshold => {
                    claimed.insert(ci);
                    let candidate = &candidates[ci];
                    debug!(
                        observation = obs.name.as_str(),
                        identifier = candidate.identifier.as_str(),
                        candidate = candidate.name.as_str(),
                        score,
                        "Matched observation"
                    );
                    outcome.matches.push(MatchResult {
                        observation_index: index,
                        identifier: candidate.identifier.clone(),
                        observation: obs.clone(),
                        score,
                    });
                }
                other => {
                    warn!(
                        source_label,
                        observation = obs.name.as_str(),
                        best_score = other.map(|(_, s)| s).unwrap_or(0.0),
                        threshold = self.config.threshold,
                        "No suitable match found"
                    );
                    outcome.unmatched.push(index);
                }
            }
        }

        outcome
    }

    /// Composite score for one pair. When the observation's address is
    /// unknown the address term is dropped and the other weights are
    /// rescaled to sum to one, so the sentinel neither helps nor hurts.
    pub fn score(
        &self,
        obs: &ObservationRecord,
        obs_coord: Option<Coordinate>,
        candidate: &CanonicalEntity,
        source_label: &str,
    ) -> f64 {
        let c = &self.config;
        let name = token_set_ratio(&obs.name, &candidate.name);
        let hint = source_hint(source_label, candidate);
        let geo = match (obs_coord, candidate.coordinate) {
            (Some(a), Some(b)) => geo_proximity(a.distance_miles(&b), c.geo_horizon_miles),
            _ => 0.0,
        };

        if is_unknown_address(&obs.address) {
            let total = c.name_weight + c.source_weight + c.geo_weight;
            if total <= 0.0 {
                return 0.0;
            }
            return (c.name_weight * name + c.source_weight * hint + c.geo_weight * geo) / total;
        }

        let address = token_set_ratio(&obs.address, &candidate.address.joined());
        c.name_weight * name + c.address_weight * address + c.source_weight * hint + c.geo_weight * geo
    }
}

/// Share of the source label's tokens (0-100) that appear in the candidate's
/// name or locality. A page labelled "renown" hints at Renown facilities.
pub fn source_hint(label: &str, candidate: &CanonicalEntity) -> f64 {
    let wanted: HashSet<String> = tokens(label).into_iter().collect();
    if wanted.is_empty() {
        return 0.0;
    }
    let have: HashSet<String> = tokens(&candidate.name)
        .into_iter()
        .chain(tokens(&candidate.address.locality))
        .collect();
    let found = wanted.iter().filter(|t| have.contains(*t)).count();
    found as f64 / wanted.len() as f64 * 100.0
}

/// 100 at zero distance, falling linearly to 0 at the horizon.
pub fn geo_proximity(distance_miles: f64, horizon_miles: f64) -> f64 {
    if horizon_miles <= 0.0 {
        return 0.0;
    }
    (horizon_miles - distance_miles).max(0.0) / horizon_miles * 100.0
}
