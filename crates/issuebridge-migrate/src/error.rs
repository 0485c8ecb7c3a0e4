//! Error types for migration operations.

use thiserror::Error;

/// Migration-specific errors.
///
/// Every variant except the benign cases handled inside the submitter aborts
/// the run: once an issue cannot be placed at its source number, every later
/// cross-reference would point at the wrong issue.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Failed to authenticate with either platform.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Repository not found on either platform.
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    /// A request returned a status the migration cannot continue from.
    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// A payload did not match the expected schema.
    #[error("Unexpected source schema in {context}: {source}")]
    UnexpectedSchema {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// A required timestamp was missing or unreadable.
    #[error("Unexpected source schema in {context}: invalid timestamp {value:?}")]
    InvalidTimestamp {
        context: String,
        value: Option<String>,
    },

    /// The import endpoint rejected an issue with validation errors.
    #[error("Import of issue #{source_id} rejected: {errors}")]
    ImportRejected {
        source_id: u64,
        errors: serde_json::Value,
    },

    /// The asynchronous import job for an issue failed.
    #[error("Import of issue #{source_id} failed: {errors}")]
    ImportFailed {
        source_id: u64,
        errors: serde_json::Value,
    },

    /// The target assigned a different number than the source issue had.
    #[error(
        "Issue number mismatch: expected #{expected}, target created #{actual}; \
         the target tracker must be empty before migrating"
    )]
    Misaligned { expected: u64, actual: u64 },

    /// User existence check returned something other than 200 or 404.
    #[error("User lookup for '{username}' failed with status {status}")]
    UserLookup { username: String, status: u16 },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded, retry after {0} seconds")]
    RateLimitExceeded(u64),

    /// Checkpoint belongs to another source/target pair.
    #[error("Checkpoint was recorded for '{found}', not '{expected}'")]
    CheckpointMismatch { expected: String, found: String },

    /// Checkpoint store failure.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Network error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Export archive could not be read.
    #[error("Archive error: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl MigrationError {
    /// Builds an [`MigrationError::UnexpectedSchema`] for the given context.
    pub fn schema(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::UnexpectedSchema {
            context: context.into(),
            source,
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
