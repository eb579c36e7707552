//! Runtime error types.

use collab_core::{ErrorKind, SessionError};
use thiserror::Error;

/// Errors that end a runtime session.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A session command failed synchronously.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The session reported an error that will not be retried.
    #[error("session ended ({kind:?}): {message}")]
    Fatal {
        /// Error classification.
        kind: ErrorKind,
        /// Human-readable description.
        message: String,
    },
}

/// A line of user input that is not a known command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command: /{name}")]
pub struct UnknownCommand {
    /// Command name without the leading slash.
    pub name: String,
}
