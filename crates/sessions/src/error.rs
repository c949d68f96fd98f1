//! Session-level errors surfaced to API callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("session '{0}' already exists")]
    Duplicate(String),

    #[error("session '{0}' is not connected")]
    NotConnected(String),

    #[error("session '{0}' is banned; delete it before reusing the id")]
    Banned(String),

    #[error("invalid session config: {0}")]
    Validation(String),

    #[error("connection error: {0}")]
    Connection(String),
}
