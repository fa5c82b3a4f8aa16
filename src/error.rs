//! Error types for PersonaChat
//!
//! This module defines the error taxonomy shared by the store, the stream
//! ingestor, configuration loading and the command handlers, using
//! `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for PersonaChat operations
///
/// Store operations return this type directly so callers can match on
/// [`PersonaChatError::NotFound`]; command and configuration code wraps it
/// in [`anyhow::Error`] through the [`Result`] alias.
#[derive(Error, Debug)]
pub enum PersonaChatError {
    /// A chat or message referenced by an operation does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The usage metadata trailing a response stream could not be parsed
    #[error("Malformed usage metadata: {0}")]
    MalformedMetadata(String),

    /// Sending the generation request or reading its body failed
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// A reply is still in progress on the chat
    #[error("Turn already in progress for chat {0}")]
    TurnInProgress(String),

    /// Caller supplied a value that cannot be accepted
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PersonaChatError {
    /// Returns true if this is a [`PersonaChatError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for PersonaChat operations
///
/// Uses `anyhow::Error` as the error type, allowing rich error context and
/// easy propagation at command boundaries.
pub type Result<T> = anyhow::Result<T>;

/// Result type returned by store operations
pub type StoreResult<T> = std::result::Result<T, PersonaChatError>;
