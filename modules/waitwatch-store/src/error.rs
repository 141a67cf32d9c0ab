/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Row rejected for {identifier}: {reason}")]
    Constraint { identifier: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// The store itself is unreachable, as opposed to one row being bad.
    /// Callers abort the whole run on these instead of isolating per row.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Configuration(_)
            ),
            _ => false,
        }
    }
}
