use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// TOML-backed tuning configuration loaded from disk.
/// Secrets (DB URL, endpoints) stay as env vars. Every section is optional
/// and falls back to the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileConfig {
    pub sync: SyncConfig,
    pub geocode: GeocodeConfig,
    pub matching: MatchingConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SyncConfig {
    pub job_name: String,
    /// Concurrent geocoding workers. Kept small for the geocoder's rate limit.
    pub worker_limit: usize,
    /// Completed records between progress checkpoints.
    pub checkpoint_interval: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            job_name: "canonical_sync".to_string(),
            worker_limit: 5,
            checkpoint_interval: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GeocodeConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub quota_backoff_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1000,
            quota_backoff_secs: 60,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MatchingConfig {
    pub name_weight: f64,
    pub address_weight: f64,
    pub source_weight: f64,
    pub geo_weight: f64,
    /// Minimum composite score (0-100) for a link.
    pub threshold: f64,
    /// Distance at which geo proximity drops to zero.
    pub geo_horizon_miles: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            name_weight: 0.4,
            address_weight: 0.3,
            source_weight: 0.1,
            geo_weight: 0.2,
            threshold: 70.0,
            geo_horizon_miles: 100.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QueryConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<FileConfig> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.sync.worker_limit, 5);
        assert_eq!(config.sync.checkpoint_interval, 50);
        assert_eq!(config.matching.threshold, 70.0);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = parse_config("[matching]\nthreshold = 80.0\n").unwrap();
        assert_eq!(config.matching.threshold, 80.0);
        assert_eq!(config.matching.name_weight, 0.4);
        assert_eq!(config.geocode.max_attempts, 5);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_config("[sync]\nworkers = 3\n").is_err());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waitwatch.toml");
        std::fs::write(&path, "[sync]\njob_name = \"nightly\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.sync.job_name, "nightly");
    }
}
