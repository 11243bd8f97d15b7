//! Common error types for the jukebox workspace

use thiserror::Error;

/// Common result type for jukebox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across jukebox crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON on the wire or in a resolver response
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Out-of-range position, malformed identifier, or constraint conflict.
    /// The store is unchanged when this is returned.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown entry id or slug
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not legal for the entry's current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Player socket could not be reached, or the connection dropped
    #[error("Transport error: {0}")]
    Transport(String),

    /// Player answered a command with a non-success status
    #[error("Player rejected '{command}': {message}")]
    RemoteCommand { command: String, message: String },

    /// Metadata lookup for a submitted URL failed
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when a database error is a UNIQUE constraint violation
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(e) => e
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_command_display() {
        let err = Error::RemoteCommand {
            command: "loadfile".to_string(),
            message: "error running command".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Player rejected 'loadfile': error running command"
        );
    }

    #[test]
    fn test_non_database_error_is_not_unique_violation() {
        assert!(!Error::Validation("x".to_string()).is_unique_violation());
        assert!(!Error::Transport("x".to_string()).is_unique_violation());
    }
}
