use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Invalid node: {message}")]
    InvalidNode { message: String },

    #[error("Node {node_id} references missing parent {parent_id}")]
    DanglingParent { node_id: String, parent_id: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Timeline actor unavailable: {timeline_id}")]
    ActorUnavailable { timeline_id: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl StorageError {
    /// Whether the write may succeed if attempted again.
    ///
    /// Connection loss, pool exhaustion and lock contention are transient.
    /// Validation failures, undecodable rows and constraint violations are
    /// permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Connection { .. } | StorageError::ActorUnavailable { .. } => true,
            StorageError::Sqlx(err) => match err {
                sqlx::Error::Database(db) => matches!(db.kind(), sqlx::error::ErrorKind::Other),
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
                _ => false,
            },
            StorageError::Query { .. }
            | StorageError::Migration { .. }
            | StorageError::InvalidNode { .. }
            | StorageError::DanglingParent { .. }
            | StorageError::RunNotFound { .. } => false,
        }
    }
}

/// Generation capability errors
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GenerationError {
    /// Whether a retry may succeed (timeouts, rate limits, upstream 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Timeout { .. } => true,
            GenerationError::Api { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            GenerationError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            GenerationError::InvalidResponse { .. } | GenerationError::EmptyResponse => false,
        }
    }
}

/// Pipeline orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Invalid pipeline definition: {message}")]
    InvalidDefinition { message: String },

    #[error("Stage {stage} failed after {attempts} attempt(s): {message}")]
    StageFailed {
        stage: String,
        attempts: u32,
        message: String,
    },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Run already in progress: {run_id}")]
    RunInProgress { run_id: String },

    #[error("Run already completed: {run_id}")]
    AlreadyCompleted { run_id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// HTTP surface errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidNode { .. } | StorageError::DanglingParent { .. } => {
                ApiError::BadRequest {
                    message: err.to_string(),
                }
            }
            StorageError::RunNotFound { .. } => ApiError::NotFound {
                message: err.to_string(),
            },
            _ => ApiError::Internal {
                message: err.to_string(),
            },
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidInput { .. } => ApiError::BadRequest {
                message: err.to_string(),
            },
            PipelineError::RunNotFound { .. } => ApiError::NotFound {
                message: err.to_string(),
            },
            PipelineError::RunInProgress { .. } | PipelineError::AlreadyCompleted { .. } => {
                ApiError::Conflict {
                    message: err.to_string(),
                }
            }
            PipelineError::Storage(e) => e.into(),
            _ => ApiError::Internal {
                message: err.to_string(),
            },
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for generation calls
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type alias for HTTP handlers
pub type ApiResult<T> = Result<T, ApiError>;
