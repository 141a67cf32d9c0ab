/// Result type alias for geocoding operations.
pub type Result<T> = std::result::Result<T, GeocodeError>;

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    /// The collaborator refused the request for rate/quota reasons.
    #[error("Geocoder quota exceeded")]
    OverQuota,

    /// Timeouts, connection resets, 5xx. Worth retrying.
    #[error("Transient geocoder failure: {0}")]
    Transient(String),

    /// The collaborator answered but the request or response is unusable.
    #[error("Geocoder rejected request: {0}")]
    Rejected(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Postal centroid table error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl GeocodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OverQuota | Self::Transient(_))
    }
}

impl From<reqwest::Error> for GeocodeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Rejected(e.to_string())
        } else {
            Self::Transient(e.to_string())
        }
    }
}
