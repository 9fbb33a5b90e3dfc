//! Error types for Lore

use thiserror::Error;

/// Result type alias using Lore's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Lore error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors (E001-E099)
    #[error("'{0}' not found in the knowledge graph.")]
    NotFound(String),

    // Storage errors (E400-E499)
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Pattern '{pattern_id}' was stored in memory but not persisted: {reason}")]
    NotPersisted { pattern_id: String, reason: String },

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Retrieval backend errors (E1200-E1299)
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Retrieval source '{source_name}' failed: {reason}")]
    SourceFailed { source_name: String, reason: String },

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    // Cache errors (E1300-E1399)
    #[error("Cache is at its hard limit of {capacity} entries and nothing can be evicted")]
    CapacityExceeded { capacity: usize },

    // Generic errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E001",
            Self::StorageError(_) => "E400",
            Self::DatabaseError(_) => "E401",
            Self::NotPersisted { .. } => "E402",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::EmbeddingFailed(_) => "E1201",
            Self::SourceFailed { .. } => "E1202",
            Self::Timeout { .. } => "E1203",
            Self::CapacityExceeded { .. } => "E1300",
            Self::Serialization(_) => "E9001",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NotPersisted { pattern_id, .. } => Some(format!(
                "Re-add pattern '{}' once storage is reachable; entity creation is idempotent",
                pattern_id
            )),
            Self::DatabaseError(_) | Self::StorageError(_) => {
                Some("Check the database path with `lore config get storage.database_path`".to_string())
            }
            Self::ConfigError(_) => Some("lore config list".to_string()),
            Self::CapacityExceeded { .. } => {
                Some("Increase the limit with `lore config set cache.max_entries <n>`".to_string())
            }
            _ => None,
        }
    }

    /// Whether the operation that produced this error may succeed if retried
    ///
    /// Validation failures are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageError(_) | Self::DatabaseError(_) | Self::Timeout { .. } | Self::Io(_)
        )
    }
}
