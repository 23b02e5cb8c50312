use reqwest::StatusCode;
use thiserror::Error;

use crate::domain::models::ProgramId;

/// `SQLite` extended result codes for lock contention, which clear on their own.
///
/// BUSY (5), LOCKED (6), BUSY_RECOVERY (261), LOCKED_SHAREDCACHE (262),
/// BUSY_SNAPSHOT (517), BUSY_TIMEOUT (773).
const TRANSIENT_SQLITE_CODES: &[&str] = &["5", "6", "261", "262", "517", "773"];

/// Program store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("Program not found: {0}")]
    ProgramNotFound(ProgramId),

    #[error("Parent program {parent_id} not found in version {version}")]
    ParentNotFound { parent_id: ProgramId, version: i64 },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl StoreError {
    /// Returns true for network, pool and lock-contention failures that are
    /// worth retrying. Constraint violations and malformed data are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueryFailed(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::Protocol(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db) => db
                    .code()
                    .is_some_and(|code| TRANSIENT_SQLITE_CODES.contains(&code.as_ref())),
                _ => false,
            },
            Self::ConnectionPoolError(_) => true,
            _ => false,
        }
    }
}

/// Errors that can occur when talking to the language-model service
#[derive(Error, Debug)]
pub enum ModelError {
    /// Invalid request parameters (HTTP 400)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid or missing API key (HTTP 401)
    #[error("Invalid API key - authentication failed")]
    InvalidApiKey,

    /// Forbidden - permission denied (HTTP 403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource or model not found (HTTP 404)
    #[error("Resource not found")]
    NotFound,

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limit exceeded - too many requests")]
    RateLimitExceeded,

    /// Server error from the service (HTTP 5xx)
    #[error("Server error ({0}): {1}")]
    ServerError(StatusCode, String),

    /// Network or connection error
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Unknown or unexpected status
    #[error("Unknown error ({0}): {1}")]
    UnknownError(StatusCode, String),
}

impl ModelError {
    /// Map a non-success HTTP status to an error
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            400 => Self::InvalidRequest(body),
            401 => Self::InvalidApiKey,
            403 => Self::Forbidden(body),
            404 => Self::NotFound,
            408 => Self::Timeout,
            429 => Self::RateLimitExceeded,
            500..=599 => Self::ServerError(status, body),
            _ => Self::UnknownError(status, body),
        }
    }

    /// Returns true if this error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimitExceeded | Self::ServerError(_, _) | Self::Timeout => true,
            Self::NetworkError(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            _ => false,
        }
    }
}

/// Errors raised by the environment collaborator
#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("Environment request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Environment returned {0}: {1}")]
    Status(StatusCode, String),

    #[error("Environment payload error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Environment returned {actual} results for {expected} programs")]
    BatchSizeMismatch { expected: usize, actual: usize },
}

/// Errors raised while choosing a parent
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid sampler parameter: {0}")]
    InvalidParameter(String),
}
