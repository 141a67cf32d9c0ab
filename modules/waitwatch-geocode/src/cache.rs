// Geocode cache port and adapters.
//
// Contract: read-through on every resolution, write on every new resolution.
// `flush` makes pending writes durable; adapters that write through on `put`
// treat it as a no-op.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{info, warn};

use waitwatch_common::Coordinate;

use crate::error::Result;

/// A cached answer for one normalized address key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CachedResolution {
    Resolved { lat: f64, lng: f64 },
    Unresolved,
}

impl CachedResolution {
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            Self::Resolved { lat, lng } => Some(Coordinate::new(*lat, *lng)),
            Self::Unresolved => None,
        }
    }
}

impl From<Coordinate> for CachedResolution {
    fn from(c: Coordinate) -> Self {
        Self::Resolved {
            lat: c.lat,
            lng: c.lng,
        }
    }
}

#[async_trait]
pub trait GeocodeCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedResolution>>;
    async fn put(&self, key: &str, value: CachedResolution) -> Result<()>;
    async fn flush(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

/// Process-lifetime cache. Used in tests and when no cache path is configured.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CachedResolution>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl GeocodeCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CachedResolution>> {
        Ok(self.entries.read().await.get(key).copied())
    }

    async fn put(&self, key: &str, value: CachedResolution) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonFileCache
// ---------------------------------------------------------------------------

/// Flat JSON map on disk, loaded once at startup.
///
/// Writes stay in memory until `flush`, which rewrites the file through a
/// temp file + rename so a crash mid-write leaves the previous version. A
/// corrupt file is treated as empty: the worst outcome is a redundant
/// geocode call.
pub struct JsonFileCache {
    path: PathBuf,
    entries: RwLock<HashMap<String, CachedResolution>>,
    dirty: AtomicBool,
}

impl JsonFileCache {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, CachedResolution>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Geocode cache unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), entries = entries.len(), "Geocode cache loaded");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl GeocodeCache for JsonFileCache {
    async fn get(&self, key: &str) -> Result<Option<CachedResolution>> {
        Ok(self.entries.read().await.get(key).copied())
    }

    async fn put(&self, key: &str, value: CachedResolution) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // Serialize under the read lock; latest write wins on disk.
        let bytes = {
            let entries = self.entries.read().await;
            serde_json::to_vec(&*entries)?
        };

        let tmp = self.path.with_extension("json.tmp");
        let written = async {
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = written {
            // Leave the flag set so the next flush retries.
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PgGeocodeCache
// ---------------------------------------------------------------------------

/// `geocode_cache` table. Writes go straight through, so `flush` does nothing.
#[derive(Clone)]
pub struct PgGeocodeCache {
    pool: PgPool,
}

impl PgGeocodeCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    lat: Option<f64>,
    lng: Option<f64>,
    resolved: bool,
}

#[async_trait]
impl GeocodeCache for PgGeocodeCache {
    async fn get(&self, key: &str) -> Result<Option<CachedResolution>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT lat, lng, resolved FROM geocode_cache WHERE cache_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| match (r.resolved, r.lat, r.lng) {
            (true, Some(lat), Some(lng)) => CachedResolution::Resolved { lat, lng },
            _ => CachedResolution::Unresolved,
        }))
    }

    async fn put(&self, key: &str, value: CachedResolution) -> Result<()> {
        let coord = value.coordinate();
        sqlx::query(
            "INSERT INTO geocode_cache (cache_key, lat, lng, resolved)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (cache_key)
             DO UPDATE SET lat = EXCLUDED.lat,
                           lng = EXCLUDED.lng,
                           resolved = EXCLUDED.resolved,
                           created_at = now()",
        )
        .bind(key)
        .bind(coord.map(|c| c.lat))
        .bind(coord.map(|c| c.lng))
        .bind(coord.is_some())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_cache_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode_cache.json");

        let cache = JsonFileCache::open(&path).await.unwrap();
        cache
            .put("1mainst,reno,nv,89501", Coordinate::new(39.5, -119.8).into())
            .await
            .unwrap();
        cache.put("nowhere", CachedResolution::Unresolved).await.unwrap();
        cache.flush().await.unwrap();

        let reopened = JsonFileCache::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        assert_eq!(
            reopened
                .get("1mainst,reno,nv,89501")
                .await
                .unwrap()
                .and_then(|r| r.coordinate()),
            Some(Coordinate::new(39.5, -119.8))
        );
        assert_eq!(
            reopened.get("nowhere").await.unwrap(),
            Some(CachedResolution::Unresolved)
        );
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode_cache.json");
        std::fs::write(&path, b"{not json").unwrap();

        let cache = JsonFileCache::open(&path).await.unwrap();
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn unflushed_writes_are_not_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode_cache.json");

        let cache = JsonFileCache::open(&path).await.unwrap();
        cache.put("k", CachedResolution::Unresolved).await.unwrap();
        assert!(!path.exists());
        cache.flush().await.unwrap();
        assert!(path.exists());
    }
}
