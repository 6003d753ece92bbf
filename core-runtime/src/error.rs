use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("invalid configuration: {field} - {message}")]
    Config { field: String, message: String },

    #[error("logging initialization failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
