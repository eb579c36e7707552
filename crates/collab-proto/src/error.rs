//! Protocol error types.

use thiserror::Error;

/// Errors produced while decoding or encoding frames.
///
/// None of these are fatal to a session: a frame that fails to decode is
/// logged and dropped, and the channel stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload is not valid JSON.
    #[error("malformed frame: {reason}")]
    Malformed {
        /// Parser diagnostic.
        reason: String,
    },

    /// Payload is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// Object lacks a string `event_type` field.
    #[error("frame has no event_type discriminant")]
    MissingDiscriminant,

    /// Known `event_type` but the variant fields are missing or mistyped.
    #[error("invalid {event_type} frame: {reason}")]
    InvalidFields {
        /// Discriminant of the rejected frame.
        event_type: String,
        /// Field-level diagnostic.
        reason: String,
    },

    /// Payload exceeds [`crate::MAX_FRAME_LEN`].
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Binary payload on a text-only protocol.
    #[error("unexpected binary payload ({len} bytes)")]
    UnexpectedBinary {
        /// Payload length.
        len: usize,
    },

    /// Frame could not be serialized.
    #[error("failed to encode frame: {reason}")]
    Encode {
        /// Serializer diagnostic.
        reason: String,
    },
}
