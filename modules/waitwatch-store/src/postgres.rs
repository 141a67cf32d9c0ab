//! PgFacilityStore: facilities, geocode cache and sync checkpoints in Postgres.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use waitwatch_common::{AddressParts, CanonicalEntity, Coordinate, SyncCheckpoint};

use crate::error::Result;
use crate::store::{FacilityFilter, FacilityStore, ObservedValueUpdate};

const COLUMNS: &str = "identifier, name, street, locality, region, postal_code, county, phone, \
     facility_type, emergency_services, lat, lng, has_observed_value, observed_value, is_live, \
     last_modified";

/// Field-ownership merge on conflict. `$13` (`has_observed_value`) is bound to
/// "the incoming value is meaningful", so the CASE arms only take observed
/// fields from a real observation.
const UPSERT_SQL: &str = r#"
    INSERT INTO facilities (identifier, name, street, locality, region, postal_code, county, phone,
                            facility_type, emergency_services, lat, lng, has_observed_value,
                            observed_value, is_live, last_modified)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
    ON CONFLICT (identifier) DO UPDATE SET
        name               = EXCLUDED.name,
        street             = EXCLUDED.street,
        locality           = EXCLUDED.locality,
        region             = EXCLUDED.region,
        postal_code        = EXCLUDED.postal_code,
        county             = EXCLUDED.county,
        phone              = EXCLUDED.phone,
        facility_type      = EXCLUDED.facility_type,
        emergency_services = EXCLUDED.emergency_services,
        lat                = COALESCE(EXCLUDED.lat, facilities.lat),
        lng                = COALESCE(EXCLUDED.lng, facilities.lng),
        has_observed_value = facilities.has_observed_value OR EXCLUDED.has_observed_value,
        observed_value     = CASE WHEN EXCLUDED.has_observed_value
                                  THEN EXCLUDED.observed_value
                                  ELSE facilities.observed_value END,
        is_live            = CASE WHEN EXCLUDED.has_observed_value
                                  THEN EXCLUDED.is_live
                                  ELSE facilities.is_live END,
        last_modified      = EXCLUDED.last_modified
"#;

/// Shared WHERE clause for counting and paging.
/// `$1` search pattern, `$2`/`$3` center, `$4` radius in miles.
const FILTER_SQL: &str = r#"
    ($1::text IS NULL
        OR name ILIKE $1
        OR concat_ws(', ', street, locality, region, postal_code) ILIKE $1)
    AND ($2::float8 IS NULL
        OR (lat IS NOT NULL AND lng IS NOT NULL
            AND 3958.8 * 2 * ASIN(LEAST(1.0, SQRT(
                  POWER(SIN(RADIANS(lat - $2) / 2), 2)
                + COS(RADIANS($2)) * COS(RADIANS(lat)) * POWER(SIN(RADIANS(lng - $3) / 2), 2)
            ))) <= $4))
"#;

#[derive(sqlx::FromRow)]
struct FacilityRow {
    identifier: String,
    name: String,
    street: String,
    locality: String,
    region: String,
    postal_code: String,
    county: String,
    phone: String,
    facility_type: String,
    emergency_services: bool,
    lat: Option<f64>,
    lng: Option<f64>,
    has_observed_value: bool,
    observed_value: Option<String>,
    is_live: bool,
    last_modified: DateTime<Utc>,
}

impl From<FacilityRow> for CanonicalEntity {
    fn from(r: FacilityRow) -> Self {
        let coordinate = match (r.lat, r.lng) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
            _ => None,
        };
        CanonicalEntity {
            identifier: r.identifier,
            name: r.name,
            address: AddressParts::new(r.street, r.locality, r.region, r.postal_code),
            county: r.county,
            phone: r.phone,
            facility_type: r.facility_type,
            emergency_services: r.emergency_services,
            coordinate,
            has_observed_value: r.has_observed_value,
            observed_value: r.observed_value,
            is_live: r.is_live,
            last_modified: r.last_modified,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    job_name: String,
    last_run: Option<DateTime<Utc>>,
    progress_offset: i64,
    source_len: i64,
}

/// Bind values for the WHERE clause in [`FILTER_SQL`].
struct FilterBinds {
    pattern: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    radius: Option<f64>,
}

impl From<&FacilityFilter> for FilterBinds {
    fn from(f: &FacilityFilter) -> Self {
        Self {
            pattern: f
                .search
                .as_deref()
                .map(|s| format!("%{}%", escape_like(s))),
            lat: f.geo.map(|g| g.center.lat),
            lng: f.geo.map(|g| g.center.lng),
            radius: f.geo.map(|g| g.radius_miles),
        }
    }
}

/// Escape LIKE metacharacters so a search term matches literally.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Postgres-backed facility store.
#[derive(Clone)]
pub struct PgFacilityStore {
    pool: PgPool,
}

impl PgFacilityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Store migrations applied");
        Ok(())
    }

    async fn upsert_in(tx: &mut Transaction<'_, Postgres>, entity: &CanonicalEntity) -> Result<()> {
        bind_upsert(entity).execute(&mut **tx).await?;
        Ok(())
    }
}

fn bind_upsert(
    e: &CanonicalEntity,
) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(UPSERT_SQL)
        .bind(&e.identifier)
        .bind(&e.name)
        .bind(&e.address.street)
        .bind(&e.address.locality)
        .bind(&e.address.region)
        .bind(&e.address.postal_code)
        .bind(&e.county)
        .bind(&e.phone)
        .bind(&e.facility_type)
        .bind(e.emergency_services)
        .bind(e.coordinate.map(|c| c.lat))
        .bind(e.coordinate.map(|c| c.lng))
        .bind(e.carries_observed_value())
        .bind(&e.observed_value)
        .bind(e.is_live)
        .bind(e.last_modified)
}

#[async_trait]
impl FacilityStore for PgFacilityStore {
    async fn count(&self) -> Result<u64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM facilities")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn known_identifiers(&self) -> Result<HashSet<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT identifier FROM facilities")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn get(&self, identifier: &str) -> Result<Option<CanonicalEntity>> {
        let row = sqlx::query_as::<_, FacilityRow>(&format!(
            "SELECT {COLUMNS} FROM facilities WHERE identifier = $1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn upsert_batch(&self, entities: &[CanonicalEntity]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entity in entities {
            Self::upsert_in(&mut tx, entity).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_one(&self, entity: &CanonicalEntity) -> Result<()> {
        bind_upsert(entity).execute(&self.pool).await?;
        Ok(())
    }

    async fn apply_observed_value(&self, update: &ObservedValueUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE facilities
            SET observed_value = $2,
                has_observed_value = $3,
                is_live = $4,
                last_modified = $5
            WHERE identifier = $1
            "#,
        )
        .bind(&update.identifier)
        .bind(&update.value)
        .bind(update.has_value)
        .bind(update.is_live)
        .bind(update.at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_candidates(&self) -> Result<Vec<CanonicalEntity>> {
        let rows = sqlx::query_as::<_, FacilityRow>(&format!(
            "SELECT {COLUMNS} FROM facilities ORDER BY identifier"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_matching(&self, filter: &FacilityFilter) -> Result<u64> {
        let b = FilterBinds::from(filter);
        let n = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM facilities WHERE {FILTER_SQL}"
        ))
        .bind(b.pattern)
        .bind(b.lat)
        .bind(b.lng)
        .bind(b.radius)
        .fetch_one(&self.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn fetch_page(
        &self,
        filter: &FacilityFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<CanonicalEntity>> {
        let b = FilterBinds::from(filter);
        let rows = sqlx::query_as::<_, FacilityRow>(&format!(
            "SELECT {COLUMNS} FROM facilities WHERE {FILTER_SQL} \
             ORDER BY name, identifier LIMIT $5 OFFSET $6"
        ))
        .bind(b.pattern)
        .bind(b.lat)
        .bind(b.lng)
        .bind(b.radius)
        .bind(limit.min(i64::MAX as u64) as i64)
        .bind(offset.min(i64::MAX as u64) as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn load_checkpoint(&self, job_name: &str) -> Result<Option<SyncCheckpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT job_name, last_run, progress_offset, source_len \
             FROM sync_checkpoints WHERE job_name = $1",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SyncCheckpoint {
            job_name: r.job_name,
            last_run: r.last_run,
            progress_offset: r.progress_offset.max(0) as usize,
            source_len: r.source_len.max(0) as usize,
        }))
    }

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (job_name, last_run, progress_offset, source_len, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (job_name) DO UPDATE SET
                last_run = EXCLUDED.last_run,
                progress_offset = EXCLUDED.progress_offset,
                source_len = EXCLUDED.source_len,
                updated_at = now()
            "#,
        )
        .bind(&checkpoint.job_name)
        .bind(checkpoint.last_run)
        .bind(checkpoint.progress_offset as i64)
        .bind(checkpoint.source_len as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
