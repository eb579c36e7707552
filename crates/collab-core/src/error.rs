//! Session error types.

use collab_proto::ProtocolError;
use thiserror::Error;

use crate::transport::TransportError;

/// Coarse classification of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credential missing, expired or rejected.
    Auth,
    /// Socket-level failure.
    Transport,
    /// Unparseable frame.
    Protocol,
    /// Reconnection gave up.
    ReconnectExhausted,
    /// Superseded by `connect` or `disconnect`.
    Cancelled,
    /// Room command issued without a room.
    NotInRoom,
}

/// Errors surfaced by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No usable credential, or the server rejected it.
    #[error("authentication failed: {reason}")]
    Auth {
        /// What was wrong with the credential.
        reason: String,
    },

    /// Channel failure not attributable to the credential.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Inbound frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Every reconnection attempt failed.
    #[error("reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// The attempt was superseded before it completed.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// A room command was issued with no room selected.
    #[error("not in a room")]
    NotInRoom,
}

impl SessionError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::ReconnectExhausted { .. } => ErrorKind::ReconnectExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotInRoom => ErrorKind::NotInRoom,
        }
    }

    /// Returns true if this error ends the session.
    ///
    /// Fatal errors stop reconnection until the caller connects again.
    /// Everything else is retried or dropped.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Auth { .. } | Self::ReconnectExhausted { .. } => true,

            Self::Transport(_) | Self::Protocol(_) | Self::Cancelled | Self::NotInRoom => false,
        }
    }
}

/// Failure reported by a frame handler.
///
/// Handler failures are logged by the dispatcher and never reach other
/// handlers or the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler failed: {reason}")]
pub struct HandlerError {
    /// What went wrong.
    pub reason: String,
}

impl HandlerError {
    /// Create a handler error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}
