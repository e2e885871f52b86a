use thiserror::Error;

/// Top-level error type for the Mentor system.
///
/// Each variant corresponds to one failure kind the matching engine can
/// surface. Subsystem code converts external errors (SQLite, ONNX runtime,
/// HTTP) into the appropriate variant so that `?` works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MentorError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Profile has no embeddable content")]
    NoEmbeddableContent,

    #[error("Embedding provider unavailable: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    #[error("Upstream feed error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MentorError {
    /// Whether this error is the caller's fault (bad input, missing record)
    /// as opposed to an internal failure. Callers that translate errors to
    /// transport responses use this to pick the status class.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            MentorError::NotFound(_)
                | MentorError::Validation(_)
                | MentorError::NoEmbeddableContent
        )
    }
}

impl From<toml::de::Error> for MentorError {
    fn from(err: toml::de::Error) -> Self {
        MentorError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for MentorError {
    fn from(err: toml::ser::Error) -> Self {
        MentorError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for MentorError {
    fn from(err: serde_json::Error) -> Self {
        MentorError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Mentor operations.
pub type Result<T> = std::result::Result<T, MentorError>;
