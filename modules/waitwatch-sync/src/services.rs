use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use waitwatch_common::{AppConfig, FileConfig};
use waitwatch_geocode::{
    CsvPostalCentroids, GeocodeCache, GeocodeResolver, Geocoder, JsonFileCache, NominatimGeocoder,
    PgGeocodeCache, PostalCentroids, RetrySettings,
};
use waitwatch_store::{FacilityStore, PersistenceGateway, PgFacilityStore, QueryService};

use crate::broadcast::Broadcaster;
use crate::ingest::ObservationIngestor;
use crate::jobs::{JobRunner, SubmitOutcome};
use crate::matcher::EntityMatcher;
use crate::source::{source_for, CanonicalSource};
use crate::sync::SyncController;

/// Background jobs allowed to run at once.
const MAX_CONCURRENT_JOBS: usize = 2;

/// Every long-lived component, built once at process start and shared by
/// reference. Cloning is cheap.
#[derive(Clone)]
pub struct Services {
    pub config: FileConfig,
    pub store: Arc<dyn FacilityStore>,
    pub resolver: Arc<GeocodeResolver>,
    pub gateway: PersistenceGateway,
    pub query: QueryService,
    pub matcher: Arc<EntityMatcher>,
    pub ingestor: ObservationIngestor,
    pub jobs: JobRunner,
    source: Option<Arc<dyn CanonicalSource>>,
}

impl Services {
    /// Production wiring: Postgres store (migrated), Nominatim geocoder,
    /// file or Postgres geocode cache, optional postal centroid table.
    pub async fn from_config(
        app: &AppConfig,
        config: FileConfig,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Self> {
        let pg = PgFacilityStore::connect(&app.database_url)
            .await
            .context("Failed to connect to Postgres")?;
        pg.migrate().await.context("Failed to run store migrations")?;

        let cache: Arc<dyn GeocodeCache> = match &app.geocode_cache_path {
            Some(path) => Arc::new(
                JsonFileCache::open(path)
                    .await
                    .with_context(|| format!("Failed to open geocode cache {path}"))?,
            ),
            None => Arc::new(PgGeocodeCache::new(pg.pool().clone())),
        };

        let centroids: Arc<dyn PostalCentroids> = match &app.postal_centroids_path {
            Some(path) => Arc::new(
                CsvPostalCentroids::load(path)
                    .with_context(|| format!("Failed to load postal centroids {path}"))?,
            ),
            None => Arc::new(CsvPostalCentroids::empty()),
        };

        let timeout = Duration::from_secs(config.geocode.request_timeout_secs);
        let geocoder: Arc<dyn Geocoder> = Arc::new(
            NominatimGeocoder::new(&app.geocoder_url, &app.geocoder_user_agent, timeout)
                .context("Failed to build geocoder client")?,
        );

        let source: Option<Arc<dyn CanonicalSource>> = match app.canonical_source.as_deref() {
            Some(location) => Some(Arc::from(
                source_for(location, timeout).context("Failed to build canonical source")?,
            )),
            None => None,
        };

        info!(
            geocoder = geocoder.name(),
            file_cache = app.geocode_cache_path.is_some(),
            canonical_source = source.is_some(),
            "Services initialized"
        );

        Ok(Self::assemble(
            Arc::new(pg),
            geocoder,
            cache,
            centroids,
            source,
            broadcaster,
            config,
        ))
    }

    /// Wire components from already-built adapters.
    pub fn assemble(
        store: Arc<dyn FacilityStore>,
        geocoder: Arc<dyn Geocoder>,
        cache: Arc<dyn GeocodeCache>,
        centroids: Arc<dyn PostalCentroids>,
        source: Option<Arc<dyn CanonicalSource>>,
        broadcaster: Arc<dyn Broadcaster>,
        config: FileConfig,
    ) -> Self {
        let resolver = Arc::new(GeocodeResolver::new(
            geocoder,
            cache,
            centroids,
            RetrySettings::from(&config.geocode),
        ));
        let gateway = PersistenceGateway::new(store.clone());
        let query = QueryService::new(store.clone(), config.query.clone());
        let matcher = Arc::new(EntityMatcher::new(
            config.matching.clone(),
            Some(resolver.clone()),
        ));
        let ingestor = ObservationIngestor::new(matcher.clone(), gateway.clone(), broadcaster);

        Self {
            config,
            store,
            resolver,
            gateway,
            query,
            matcher,
            ingestor,
            jobs: JobRunner::new(MAX_CONCURRENT_JOBS),
            source,
        }
    }

    pub fn sync_controller(&self) -> Result<SyncController> {
        let source = self
            .source
            .clone()
            .context("No canonical source configured (set CANONICAL_SOURCE)")?;
        Ok(SyncController::new(
            source,
            self.resolver.clone(),
            self.gateway.clone(),
            self.config.sync.clone(),
        ))
    }

    /// Run a sync pass in the background under the configured job name.
    pub fn submit_sync(&self) -> Result<SubmitOutcome> {
        let controller = self.sync_controller()?;
        Ok(self.jobs.submit(&self.config.sync.job_name, async move {
            controller.run().await.map(|_| ())
        }))
    }
}
