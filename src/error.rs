use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Display error [{backend}]: {reason}")]
    Display { backend: String, reason: String },

    #[error("Playback supervisor is shut down")]
    SupervisorClosed,
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
