use anyhow::{Context, Result};

const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_USER_AGENT: &str = "waitwatch/0.1";

/// Application configuration loaded from environment variables.
/// Contains only secrets and env-specific values; tuning knobs live in the
/// TOML FileConfig.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,

    // Geocoding
    pub geocoder_url: String,
    pub geocoder_user_agent: String,
    pub geocode_cache_path: Option<String>,
    pub postal_centroids_path: Option<String>,

    // Canonical registry (file path or http(s) URL)
    pub canonical_source: Option<String>,

    // Web server
    pub api_host: String,
    pub api_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            geocoder_url: std::env::var("GEOCODER_URL")
                .unwrap_or_else(|_| DEFAULT_GEOCODER_URL.to_string()),
            geocoder_user_agent: std::env::var("GEOCODER_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            geocode_cache_path: std::env::var("GEOCODE_CACHE_PATH").ok(),
            postal_centroids_path: std::env::var("POSTAL_CENTROIDS_PATH").ok(),
            canonical_source: std::env::var("CANONICAL_SOURCE").ok(),
            api_host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("API_PORT must be a number")?,
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => v.clone(),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", redact_url(&self.database_url));
        tracing::info!("  GEOCODER_URL: {}", self.geocoder_url);
        tracing::info!("  GEOCODE_CACHE_PATH: {}", preview_opt(&self.geocode_cache_path));
        tracing::info!("  POSTAL_CENTROIDS_PATH: {}", preview_opt(&self.postal_centroids_path));
        tracing::info!("  CANONICAL_SOURCE: {}", preview_opt(&self.canonical_source));
    }
}

/// Strip credentials from a connection URL for logging.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_credentials() {
        assert_eq!(
            redact_url("postgres://user:secret@db:5432/waitwatch"),
            "postgres://***@db:5432/waitwatch"
        );
        assert_eq!(redact_url("postgres://db/waitwatch"), "postgres://db/waitwatch");
    }
}
