use platform_traits::PlatformError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Credentials invalid or revoked. Aborts the whole job, never retried.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Retry budget exhausted against a rate-limited or flaky remote.
    #[error("retries exhausted after {attempts} attempts: {cause}")]
    RetriesExhausted { attempts: u32, cause: String },

    /// Adapter capability or safety-gate refusal.
    #[error("not permitted: {0}")]
    NotPermitted(String),

    /// External id unknown to the platform; the change is skipped.
    #[error("not found on platform: {0}")]
    NotFound(String),

    /// Non-retryable platform failure that is none of the above.
    #[error("platform failure: {0}")]
    Platform(String),

    #[error(transparent)]
    Library(#[from] core_library::LibraryError),

    #[error("sync job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("sync already in progress for binding {binding_id}")]
    SyncInProgress { binding_id: i64 },

    #[error("no adapter registered for platform {0}")]
    AdapterMissing(String),

    #[error("invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    /// Cooperative cancellation. Terminal.
    #[error("sync cancelled")]
    Cancelled,

    /// Emergency stop engaged. Terminal.
    #[error("emergency stop active")]
    Stopped,
}

impl SyncError {
    /// Whether the error aborts the whole job (as opposed to failing a
    /// single change). Repository conflicts and infrastructure failures
    /// roll back the local transaction; bad per-item input only fails the
    /// change at hand.
    pub fn is_job_fatal(&self) -> bool {
        match self {
            SyncError::AuthFailed(_)
            | SyncError::RetriesExhausted { .. }
            | SyncError::Cancelled
            | SyncError::Stopped => true,
            SyncError::Library(inner) => !matches!(
                inner,
                core_library::LibraryError::InvalidInput { .. }
                    | core_library::LibraryError::NotFound { .. }
            ),
            _ => false,
        }
    }
}

impl From<PlatformError> for SyncError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::AuthFailed(message) => SyncError::AuthFailed(message),
            PlatformError::NotPermitted(message) => SyncError::NotPermitted(message),
            PlatformError::NotFound(message) => SyncError::NotFound(message),
            PlatformError::RateLimited { .. } | PlatformError::Transient(_) => {
                SyncError::Platform(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
