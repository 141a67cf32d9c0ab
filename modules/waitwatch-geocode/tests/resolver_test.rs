//! Resolver behavior against a scripted geocoder. No network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use waitwatch_common::{AddressParts, Coordinate};
use waitwatch_geocode::{
    AddressComponents, CachedResolution, CsvPostalCentroids, GeocodeCache, GeocodeError,
    GeocodeResolver, Geocoder, MemoryCache, Resolution, RetrySettings,
};

/// Answers per query string, consumed front to back. Once a script runs
/// out (or a query was never scripted) the geocoder answers zero results.
#[derive(Default)]
struct ScriptedGeocoder {
    scripts: Mutex<HashMap<String, VecDeque<Result<Option<Coordinate>, GeocodeError>>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedGeocoder {
    fn on(self, query: &str, answers: Vec<Result<Option<Coordinate>, GeocodeError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(query.to_string(), answers.into());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Geocoder for ScriptedGeocoder {
    async fn geocode(&self, query: &str) -> waitwatch_geocode::Result<Option<Coordinate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(query.to_string());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(query)
            .and_then(|s| s.pop_front())
            .unwrap_or(Ok(None))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

const RENO: Coordinate = Coordinate {
    lat: 39.5296,
    lng: -119.8138,
};

fn mercy() -> AddressComponents {
    AddressComponents::new(
        "Mercy General",
        AddressParts::new("1 Main St", "Reno", "NV", "89501"),
    )
}

fn resolver(
    geocoder: Arc<ScriptedGeocoder>,
    cache: Arc<MemoryCache>,
    centroids: CsvPostalCentroids,
) -> GeocodeResolver {
    GeocodeResolver::new(geocoder, cache, Arc::new(centroids), RetrySettings::immediate(3))
}

#[tokio::test]
async fn same_address_twice_calls_geocoder_once() {
    let geocoder = Arc::new(
        ScriptedGeocoder::default().on("1 Main St, Reno, NV, 89501", vec![Ok(Some(RENO))]),
    );
    let resolver = resolver(geocoder.clone(), Arc::new(MemoryCache::new()), CsvPostalCentroids::empty());

    let first = resolver.resolve(&mercy()).await;
    let second = resolver.resolve(&mercy()).await;

    assert_eq!(first, Resolution::Resolved(RENO));
    assert_eq!(second, Resolution::Resolved(RENO));
    assert_eq!(geocoder.calls(), 1);
    assert_eq!(resolver.stats().cache_hits(), 1);
}

#[tokio::test]
async fn differently_spaced_address_hits_the_cache() {
    let geocoder = Arc::new(
        ScriptedGeocoder::default().on("1 Main St, Reno, NV, 89501", vec![Ok(Some(RENO))]),
    );
    let resolver = resolver(geocoder.clone(), Arc::new(MemoryCache::new()), CsvPostalCentroids::empty());

    resolver.resolve(&mercy()).await;
    let shouty = AddressComponents::new(
        "Mercy General",
        AddressParts::new("1 MAIN  ST", "RENO", "nv", "89501"),
    );
    assert_eq!(resolver.resolve(&shouty).await, Resolution::Resolved(RENO));
    assert_eq!(geocoder.calls(), 1);
}

#[tokio::test]
async fn concurrent_requests_for_one_address_share_a_lookup() {
    let geocoder = Arc::new(
        ScriptedGeocoder::default().on("1 Main St, Reno, NV, 89501", vec![Ok(Some(RENO))]),
    );
    let resolver = Arc::new(resolver(
        geocoder.clone(),
        Arc::new(MemoryCache::new()),
        CsvPostalCentroids::empty(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let r = resolver.clone();
            tokio::spawn(async move { r.resolve(&mercy()).await })
        })
        .collect();
    for h in handles {
        assert_eq!(h.await.unwrap(), Resolution::Resolved(RENO));
    }
    assert_eq!(geocoder.calls(), 1);
}

#[tokio::test]
async fn exhausted_fallback_chain_is_unresolved() {
    let geocoder = Arc::new(ScriptedGeocoder::default());
    let cache = Arc::new(MemoryCache::new());
    let resolver = resolver(geocoder.clone(), cache.clone(), CsvPostalCentroids::empty());

    assert_eq!(resolver.resolve(&mercy()).await, Resolution::Unresolved);
    assert_eq!(
        geocoder.seen(),
        vec![
            "1 Main St, Reno, NV, 89501".to_string(),
            "Mercy General, NV".to_string(),
            "Mercy General, Reno, NV".to_string(),
            "89501".to_string(),
        ]
    );
    assert_eq!(resolver.stats().unresolved(), 1);

    // Every answer was a definitive "nothing", so the miss is remembered.
    assert_eq!(
        cache.get(&mercy().cache_key()).await.unwrap(),
        Some(CachedResolution::Unresolved)
    );
    assert_eq!(resolver.resolve(&mercy()).await, Resolution::Unresolved);
    assert_eq!(geocoder.calls(), 4);
}

#[tokio::test]
async fn fallback_hit_is_cached_under_original_key() {
    let geocoder = Arc::new(
        ScriptedGeocoder::default().on("Mercy General, Reno, NV", vec![Ok(Some(RENO))]),
    );
    let cache = Arc::new(MemoryCache::new());
    let resolver = resolver(geocoder.clone(), cache.clone(), CsvPostalCentroids::empty());

    assert_eq!(resolver.resolve(&mercy()).await, Resolution::Resolved(RENO));
    assert_eq!(
        cache
            .get("1mainst,reno,nv,89501")
            .await
            .unwrap()
            .and_then(|c| c.coordinate()),
        Some(RENO)
    );
}

#[tokio::test]
async fn over_quota_is_retried() {
    let geocoder = Arc::new(ScriptedGeocoder::default().on(
        "1 Main St, Reno, NV, 89501",
        vec![Err(GeocodeError::OverQuota), Ok(Some(RENO))],
    ));
    let resolver = resolver(geocoder.clone(), Arc::new(MemoryCache::new()), CsvPostalCentroids::empty());

    assert_eq!(resolver.resolve(&mercy()).await, Resolution::Resolved(RENO));
    assert_eq!(geocoder.calls(), 2);
}

#[tokio::test]
async fn transient_failures_stop_at_max_attempts_and_are_not_cached() {
    let geocoder = Arc::new(ScriptedGeocoder::default().on(
        "1 Main St, Reno, NV, 89501",
        vec![
            Err(GeocodeError::Transient("timeout".into())),
            Err(GeocodeError::Transient("timeout".into())),
            Err(GeocodeError::Transient("timeout".into())),
        ],
    ));
    let cache = Arc::new(MemoryCache::new());
    let resolver = resolver(geocoder.clone(), cache.clone(), CsvPostalCentroids::empty());

    assert_eq!(resolver.resolve(&mercy()).await, Resolution::Unresolved);
    // 3 attempts on the primary query, then one definitive miss per fallback.
    assert_eq!(geocoder.calls(), 3 + 3);
    assert_eq!(cache.get(&mercy().cache_key()).await.unwrap(), None);
}

#[tokio::test]
async fn postal_centroid_is_the_last_resort() {
    let geocoder = Arc::new(ScriptedGeocoder::default());
    let centroids = CsvPostalCentroids::from_csv_str("zip,lat,lng\n89501,39.526,-119.812\n").unwrap();
    let resolver = resolver(geocoder.clone(), Arc::new(MemoryCache::new()), centroids);

    assert_eq!(
        resolver.resolve(&mercy()).await,
        Resolution::Resolved(Coordinate::new(39.526, -119.812))
    );
    assert_eq!(geocoder.calls(), 4);
}

#[tokio::test]
async fn free_text_lookup_skips_the_fallback_chain() {
    let geocoder = Arc::new(ScriptedGeocoder::default());
    let resolver = resolver(geocoder.clone(), Arc::new(MemoryCache::new()), CsvPostalCentroids::empty());

    assert_eq!(resolver.resolve_free_text("Mercy General, Reno").await, None);
    assert_eq!(resolver.resolve_free_text("mercy general,  reno").await, None);
    assert_eq!(geocoder.calls(), 1);
}

#[tokio::test]
async fn quota_refusal_on_the_last_attempt_returns_without_waiting() {
    let geocoder = Arc::new(ScriptedGeocoder::default().on(
        "Mercy General, Reno",
        vec![Err(GeocodeError::OverQuota), Err(GeocodeError::OverQuota)],
    ));
    let retry = RetrySettings {
        max_attempts: 2,
        base_backoff: std::time::Duration::ZERO,
        quota_backoff: std::time::Duration::from_secs(1),
    };
    let resolver = GeocodeResolver::new(
        geocoder.clone(),
        Arc::new(MemoryCache::new()),
        Arc::new(CsvPostalCentroids::empty()),
        retry,
    );

    let started = std::time::Instant::now();
    assert_eq!(resolver.resolve_free_text("Mercy General, Reno").await, None);

    // One quota wait between the two attempts, none after the last.
    assert_eq!(geocoder.calls(), 2);
    assert!(started.elapsed() < std::time::Duration::from_millis(1900));
}
