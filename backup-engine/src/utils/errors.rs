//! Error types for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Gate busy, sync drain timed out, or a restart is pending.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid backup archive: {0}")]
    InvalidArchive(String),

    #[error("Invalid backup name: {0}")]
    InvalidName(String),

    #[error("Database integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Coarse error category, stable across the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    InvalidArchive,
    InvalidName,
    IntegrityFailure,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidArchive(_) => ErrorKind::InvalidArchive,
            EngineError::InvalidName(_) => ErrorKind::InvalidName,
            EngineError::IntegrityFailure(_) => ErrorKind::IntegrityFailure,
            EngineError::Io(_)
            | EngineError::Database(_)
            | EngineError::Zip(_)
            | EngineError::Serialization(_)
            | EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Message safe to show to a caller.
    pub fn public_message(&self) -> String {
        super::sanitize::sanitize_message(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
