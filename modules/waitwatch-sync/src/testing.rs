// Test doubles for the sync pipeline.
//
// - MockGeocoder (Geocoder): query → coordinate map, counts calls
// - StaticSource (CanonicalSource): fixed raw rows, optionally failing
// - RecordingBroadcaster (Broadcaster): keeps every published event
//
// Plus helpers for building registry rows and a wired-up Services.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use waitwatch_common::{Coordinate, FileConfig, ObservedValueEvent};
use waitwatch_geocode::{CsvPostalCentroids, Geocoder, MemoryCache};
use waitwatch_store::MemoryStore;

use crate::broadcast::Broadcaster;
use crate::services::Services;
use crate::source::{CanonicalSource, RawRecord, SourceError};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Reno, NV.
pub const RENO: Coordinate = Coordinate {
    lat: 39.5296,
    lng: -119.8138,
};
/// Sparks, NV.
pub const SPARKS: Coordinate = Coordinate {
    lat: 39.5349,
    lng: -119.7527,
};
/// Las Vegas, NV.
pub const LAS_VEGAS: Coordinate = Coordinate {
    lat: 36.1699,
    lng: -115.1398,
};

// ---------------------------------------------------------------------------
// MockGeocoder
// ---------------------------------------------------------------------------

/// Exact-query geocoder. Unregistered queries answer zero results.
#[derive(Default)]
pub struct MockGeocoder {
    answers: HashMap<String, Coordinate>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, query: &str, at: Coordinate) -> Self {
        self.answers.insert(query.to_string(), at);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, query: &str) -> waitwatch_geocode::Result<Option<Coordinate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(query.to_string());
        Ok(self.answers.get(query).copied())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// StaticSource
// ---------------------------------------------------------------------------

/// Canonical source returning a fixed set of rows. Rows can be swapped
/// between runs to simulate registry updates.
#[derive(Default)]
pub struct StaticSource {
    rows: Mutex<Vec<RawRecord>>,
    failing: bool,
}

impl StaticSource {
    pub fn new(rows: Vec<RawRecord>) -> Self {
        Self {
            rows: Mutex::new(rows),
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn replace(&self, rows: Vec<RawRecord>) {
        *self.rows.lock().unwrap_or_else(|p| p.into_inner()) = rows;
    }
}

#[async_trait]
impl CanonicalSource for StaticSource {
    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        if self.failing {
            return Err(SourceError::Format("static source set to fail".into()));
        }
        Ok(self.rows.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// Registry row in the CMS export layout.
pub fn cms_row(
    id: &str,
    name: &str,
    street: &str,
    city: &str,
    zip: &str,
    last_updated: &str,
) -> RawRecord {
    [
        ("Facility ID", id),
        ("Facility Name", name),
        ("Address", street),
        ("City/Town", city),
        ("State", "NV"),
        ("ZIP Code", zip),
        ("Last Updated Date", last_updated),
    ]
    .into_iter()
    .filter(|(_, v)| !v.is_empty())
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// ---------------------------------------------------------------------------
// RecordingBroadcaster
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<ObservedValueEvent>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedValueEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn publish(&self, event: ObservedValueEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Everything a pipeline test needs, with handles kept for assertions.
pub struct TestHarness {
    pub services: Services,
    pub store: Arc<MemoryStore>,
    pub geocoder: Arc<MockGeocoder>,
    pub cache: Arc<MemoryCache>,
    pub source: Arc<StaticSource>,
    pub broadcaster: Arc<RecordingBroadcaster>,
}

impl TestHarness {
    pub fn new(store: MemoryStore, geocoder: MockGeocoder, source: StaticSource) -> Self {
        Self::with_config(store, geocoder, source, FileConfig::default())
    }

    pub fn with_config(
        store: MemoryStore,
        geocoder: MockGeocoder,
        source: StaticSource,
        mut config: FileConfig,
    ) -> Self {
        // No sleeping between retries in tests.
        config.geocode.base_backoff_ms = 0;
        config.geocode.quota_backoff_secs = 0;

        let store = Arc::new(store);
        let geocoder = Arc::new(geocoder);
        let cache = Arc::new(MemoryCache::new());
        let source = Arc::new(source);
        let broadcaster = Arc::new(RecordingBroadcaster::new());

        let services = Services::assemble(
            store.clone(),
            geocoder.clone(),
            cache.clone(),
            Arc::new(CsvPostalCentroids::empty()),
            Some(source.clone()),
            broadcaster.clone(),
            config,
        );

        Self {
            services,
            store,
            geocoder,
            cache,
            source,
            broadcaster,
        }
    }
}
