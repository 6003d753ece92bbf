use thiserror::Error;

/// Error taxonomy shared by every platform adapter.
///
/// The executor classifies these to decide retry vs. abort: transient and
/// rate-limit failures are retried with backoff, everything else surfaces
/// immediately.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Credentials invalid, expired or revoked. Never retried.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The remote asked us to slow down. Retried with backoff.
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Network blip or remote 5xx. Retried with backoff.
    #[error("transient platform failure: {0}")]
    Transient(String),

    /// The adapter does not support the operation, or the remote refused it
    /// (e.g. modifying a playlist the user does not own). Never retried.
    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    /// The external id is unknown to the platform (e.g. a track removed
    /// globally). Never retried; the corresponding change is skipped.
    #[error("not found on platform: {0}")]
    NotFound(String),
}

impl PlatformError {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited { .. } | PlatformError::Transient(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
