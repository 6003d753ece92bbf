use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("snapshot unreadable: {0}")]
    Snapshot(String),
}

impl LibraryError {
    /// Map a sqlx write error, converting uniqueness violations into
    /// [`LibraryError::Conflict`] so callers can tell invariant breaches
    /// apart from infrastructure failures.
    pub fn from_write(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return LibraryError::Conflict(format!("{what}: {db_err}"));
            }
        }
        LibraryError::Database(err)
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
