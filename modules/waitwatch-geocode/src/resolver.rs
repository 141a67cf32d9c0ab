use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use waitwatch_common::{Coordinate, GeocodeConfig};

use crate::address::AddressComponents;
use crate::cache::{CachedResolution, GeocodeCache};
use crate::error::GeocodeError;
use crate::geocoder::Geocoder;
use crate::postal::PostalCentroids;

/// Terminal answer for one resolution request. `Unresolved` is a valid
/// outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Resolved(Coordinate),
    Unresolved,
}

impl Resolution {
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            Self::Resolved(c) => Some(*c),
            Self::Unresolved => None,
        }
    }
}

impl From<CachedResolution> for Resolution {
    fn from(c: CachedResolution) -> Self {
        c.coordinate().map_or(Self::Unresolved, Self::Resolved)
    }
}

/// Retry schedule for a single query.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt.
    pub base_backoff: Duration,
    /// Fixed wait after a quota refusal, used instead of the exponential step.
    pub quota_backoff: Duration,
}

impl RetrySettings {
    /// No sleeping. For tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            quota_backoff: Duration::ZERO,
        }
    }

    /// Exponential delay before zero-based attempt `attempt` (> 0).
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        self.base_backoff * (1u32 << exponent)
    }
}

impl From<&GeocodeConfig> for RetrySettings {
    fn from(c: &GeocodeConfig) -> Self {
        Self {
            max_attempts: c.max_attempts.max(1),
            base_backoff: Duration::from_millis(c.base_backoff_ms),
            quota_backoff: Duration::from_secs(c.quota_backoff_secs),
        }
    }
}

/// Counters for the run summary.
#[derive(Debug, Default)]
pub struct ResolverStats {
    pub external_calls: AtomicU64,
    pub cache_hits: AtomicU64,
    pub fallback_hits: AtomicU64,
    pub centroid_hits: AtomicU64,
    pub unresolved: AtomicU64,
}

impl ResolverStats {
    pub fn external_calls(&self) -> u64 {
        self.external_calls.load(Ordering::SeqCst)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::SeqCst)
    }

    pub fn unresolved(&self) -> u64 {
        self.unresolved.load(Ordering::SeqCst)
    }
}

/// Outcome of retrying one query string.
enum QueryOutcome {
    Found(Coordinate),
    /// The collaborator definitively answered "nothing here".
    NoResults,
    /// Retries exhausted or a non-retryable failure.
    Failed,
}

/// Address → coordinate with read-through cache, bounded retries and the
/// fallback chain.
pub struct GeocodeResolver {
    geocoder: Arc<dyn Geocoder>,
    cache: Arc<dyn GeocodeCache>,
    centroids: Arc<dyn PostalCentroids>,
    retry: RetrySettings,
    stats: ResolverStats,
    /// Per-key locks so concurrent requests for one address share one lookup.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl GeocodeResolver {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        cache: Arc<dyn GeocodeCache>,
        centroids: Arc<dyn PostalCentroids>,
        retry: RetrySettings,
    ) -> Self {
        Self {
            geocoder,
            cache,
            centroids,
            retry,
            stats: ResolverStats::default(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    pub fn cache(&self) -> &Arc<dyn GeocodeCache> {
        &self.cache
    }

    /// Flush pending cache writes. Failures are logged, not propagated: a
    /// lost cache write only costs a redundant lookup next run.
    pub async fn flush_cache(&self) {
        if let Err(e) = self.cache.flush().await {
            warn!(error = %e, "Failed to flush geocode cache");
        }
    }

    /// Resolve a structured address.
    ///
    /// 1. Cache hit → return, no external call
    /// 2. Primary query with retry
    /// 3. Fallback chain (name+region, name+locality+region, postal code)
    /// 4. Postal centroid table
    ///
    /// Any hit is cached under the original key. A miss is cached as
    /// `Unresolved` only when every query got a definitive zero-result answer.
    pub async fn resolve(&self, components: &AddressComponents) -> Resolution {
        let key = components.cache_key();
        if key.is_empty() && components.name.trim().is_empty() {
            self.stats.unresolved.fetch_add(1, Ordering::SeqCst);
            return Resolution::Unresolved;
        }

        let key_lock = self.key_lock(&key);
        let guard = key_lock.lock().await;
        let resolution = self.resolve_locked(&key, components).await;
        drop(guard);
        self.release_key(&key, &key_lock);
        resolution
    }

    async fn resolve_locked(&self, key: &str, components: &AddressComponents) -> Resolution {
        if let Some(hit) = self.cached(key).await {
            return hit;
        }

        let mut definitive = true;
        let primary = components.primary_query();
        let mut found = None;

        if !primary.is_empty() {
            match self.query_with_retry(&primary).await {
                QueryOutcome::Found(c) => found = Some(c),
                QueryOutcome::NoResults => {}
                QueryOutcome::Failed => definitive = false,
            }
        }

        if found.is_none() {
            for query in components.fallback_queries() {
                match self.query_with_retry(&query).await {
                    QueryOutcome::Found(c) => {
                        info!(name = components.name.as_str(), query, "Fallback geocoding succeeded");
                        self.stats.fallback_hits.fetch_add(1, Ordering::SeqCst);
                        found = Some(c);
                        break;
                    }
                    QueryOutcome::NoResults => {}
                    QueryOutcome::Failed => definitive = false,
                }
            }
        }

        if found.is_none() {
            if let Some(c) = self.centroids.centroid(&components.parts.postal_code) {
                info!(
                    name = components.name.as_str(),
                    postal_code = components.parts.postal_code.as_str(),
                    "Using postal code centroid"
                );
                self.stats.centroid_hits.fetch_add(1, Ordering::SeqCst);
                found = Some(c);
            }
        }

        let resolution = found.map_or(Resolution::Unresolved, Resolution::Resolved);
        match resolution {
            Resolution::Resolved(c) => self.remember(key, c.into()).await,
            Resolution::Unresolved => {
                self.stats.unresolved.fetch_add(1, Ordering::SeqCst);
                warn!(name = components.name.as_str(), address = primary, "Address unresolved");
                if definitive {
                    self.remember(key, CachedResolution::Unresolved).await;
                }
            }
        }
        resolution
    }

    /// Best-effort single query: cache plus retry, no fallback chain.
    pub async fn resolve_free_text(&self, query: &str) -> Option<Coordinate> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        let key = waitwatch_common::text::compact_key(query);

        let key_lock = self.key_lock(&key);
        let guard = key_lock.lock().await;
        let result = self.resolve_free_text_locked(&key, query).await;
        drop(guard);
        self.release_key(&key, &key_lock);
        result
    }

    async fn resolve_free_text_locked(&self, key: &str, query: &str) -> Option<Coordinate> {
        if let Some(hit) = self.cached(key).await {
            return hit.coordinate();
        }

        match self.query_with_retry(query).await {
            QueryOutcome::Found(c) => {
                self.remember(key, c.into()).await;
                Some(c)
            }
            QueryOutcome::NoResults => {
                self.remember(key, CachedResolution::Unresolved).await;
                None
            }
            QueryOutcome::Failed => None,
        }
    }

    async fn cached(&self, key: &str) -> Option<Resolution> {
        if key.is_empty() {
            return None;
        }
        match self.cache.get(key).await {
            Ok(Some(hit)) => {
                self.stats.cache_hits.fetch_add(1, Ordering::SeqCst);
                Some(hit.into())
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Geocode cache read failed, treating as miss");
                None
            }
        }
    }

    async fn remember(&self, key: &str, value: CachedResolution) {
        if key.is_empty() {
            return;
        }
        if let Err(e) = self.cache.put(key, value).await {
            warn!(key, error = %e, "Geocode cache write failed");
        }
    }

    async fn query_with_retry(&self, query: &str) -> QueryOutcome {
        let mut skip_backoff = false;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 && !skip_backoff {
                tokio::time::sleep(self.retry.backoff_before(attempt)).await;
            }
            skip_backoff = false;

            self.stats.external_calls.fetch_add(1, Ordering::SeqCst);
            match self.geocoder.geocode(query).await {
                Ok(Some(c)) => return QueryOutcome::Found(c),
                Ok(None) => {
                    debug!(query, "Geocoder returned zero results");
                    return QueryOutcome::NoResults;
                }
                Err(GeocodeError::OverQuota) => {
                    if attempt + 1 >= self.retry.max_attempts {
                        warn!(query, attempt = attempt + 1, "Geocoding quota exceeded on final attempt");
                        break;
                    }
                    warn!(
                        query,
                        attempt = attempt + 1,
                        wait_secs = self.retry.quota_backoff.as_secs(),
                        "Geocoding quota exceeded, waiting before retry"
                    );
                    tokio::time::sleep(self.retry.quota_backoff).await;
                    skip_backoff = true;
                }
                Err(e) if e.is_retryable() => {
                    warn!(query, attempt = attempt + 1, error = %e, "Geocoding attempt failed");
                }
                Err(e) => {
                    error!(query, error = %e, "Geocoding failed with non-retryable error");
                    return QueryOutcome::Failed;
                }
            }
        }

        error!(
            query,
            attempts = self.retry.max_attempts,
            "Geocoding failed after all attempts"
        );
        QueryOutcome::Failed
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the per-key lock once no other caller holds or awaits it. The
    /// map keeps one reference and the releasing caller another.
    fn release_key(&self, key: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        if Arc::strong_count(lock) <= 2 {
            inflight.remove(key);
        }
    }

    #[cfg(test)]
    fn inflight_keys(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let retry = RetrySettings {
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            quota_backoff: Duration::from_secs(60),
        };
        assert_eq!(retry.backoff_before(1), Duration::from_secs(1));
        assert_eq!(retry.backoff_before(2), Duration::from_secs(2));
        assert_eq!(retry.backoff_before(4), Duration::from_secs(8));
    }

    #[test]
    fn settings_from_config_never_zero_attempts() {
        let config = GeocodeConfig {
            max_attempts: 0,
            ..GeocodeConfig::default()
        };
        assert_eq!(RetrySettings::from(&config).max_attempts, 1);
    }

    struct FailingGeocoder;

    #[async_trait::async_trait]
    impl Geocoder for FailingGeocoder {
        async fn geocode(&self, _query: &str) -> crate::Result<Option<Coordinate>> {
            Err(GeocodeError::Transient("unavailable".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn failing_resolver() -> GeocodeResolver {
        GeocodeResolver::new(
            Arc::new(FailingGeocoder),
            Arc::new(crate::cache::MemoryCache::new()),
            Arc::new(crate::postal::CsvPostalCentroids::empty()),
            RetrySettings::immediate(1),
        )
    }

    #[test]
    fn key_lock_survives_while_a_waiter_holds_it() {
        let resolver = failing_resolver();
        let holder = resolver.key_lock("k");
        let waiter = resolver.key_lock("k");

        resolver.release_key("k", &holder);
        drop(holder);
        assert_eq!(resolver.inflight_keys(), 1);

        // A newcomer queues behind the waiter instead of getting a fresh lock.
        let newcomer = resolver.key_lock("k");
        assert!(Arc::ptr_eq(&waiter, &newcomer));
        drop(newcomer);

        resolver.release_key("k", &waiter);
        drop(waiter);
        assert_eq!(resolver.inflight_keys(), 0);
    }

    #[tokio::test]
    async fn failed_lookups_leave_no_lock_behind() {
        let resolver = Arc::new(failing_resolver());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let r = resolver.clone();
                tokio::spawn(async move { r.resolve_free_text("Mercy General, Reno").await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap(), None);
        }
        assert_eq!(resolver.inflight_keys(), 0);
    }
}
