use thiserror::Error;

/// Core error type for the flowsync engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Referenced entity is absent (edge endpoint, node to remove, document)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Structural invariant violation
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Persistence-side rejection of a value
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Structural operation rejected because the server graph diverged
    #[error("Conflict error: {0}")]
    ConflictError(String),

    /// The persistence call itself failed to complete
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Discriminant of a [`CoreError`] without its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`CoreError::NotFound`]
    NotFound,
    /// See [`CoreError::Duplicate`]
    Duplicate,
    /// See [`CoreError::ValidationError`]
    Validation,
    /// See [`CoreError::ConflictError`]
    Conflict,
    /// See [`CoreError::TransportError`]
    Transport,
    /// See [`CoreError::SerializationError`]
    Serialization,
    /// See [`CoreError::ConfigurationError`]
    Configuration,
    /// See [`CoreError::Other`]
    Other,
}

impl CoreError {
    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Duplicate(_) => ErrorKind::Duplicate,
            CoreError::ValidationError(_) => ErrorKind::Validation,
            CoreError::ConflictError(_) => ErrorKind::Conflict,
            CoreError::TransportError(_) => ErrorKind::Transport,
            CoreError::SerializationError(_) => ErrorKind::Serialization,
            CoreError::ConfigurationError(_) => ErrorKind::Configuration,
            CoreError::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether the error was raised by the persistence layer rather than
    /// detected locally before any view was touched
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::Transport
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
