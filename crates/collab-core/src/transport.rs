//! Transport seam.
//!
//! A [`Connector`] opens channels; the channel's lifecycle comes back to the
//! [`ConnectionManager`](crate::ConnectionManager) as [`ChannelEvent`]s
//! stamped with the [`Generation`] the channel was opened under. Events
//! whose generation is not the current one belong to a channel that has
//! already been replaced and are dropped.

use std::fmt;

use collab_proto::CloseCode;
use thiserror::Error;

/// Monotonic channel counter. Each opened channel gets a fresh generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation after this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully-built address of a room channel.
///
/// The URL embeds the credential, so `Debug` elides the query string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    url: String,
    room: String,
}

impl ConnectTarget {
    /// Create a target. `url` must already be percent-encoded.
    pub fn new(url: String, room: impl Into<String>) -> Self {
        Self { url, room: room.into() }
    }

    /// Complete URL including the credential.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Room identifier, unencoded.
    pub fn room(&self) -> &str {
        &self.room
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.url.split_once('?').map_or(self.url.as_str(), |(base, _)| base);
        f.debug_struct("ConnectTarget").field("url", &base).field("room", &self.room).finish()
    }
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Channel could not be established.
    #[error("connect failed: {reason}")]
    Connect {
        /// Transport diagnostic.
        reason: String,
    },

    /// The server refused the credential during the handshake.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Transport diagnostic.
        reason: String,
    },

    /// Writing to an open channel failed.
    #[error("send failed: {reason}")]
    Send {
        /// Transport diagnostic.
        reason: String,
    },

    /// Channel went away with a close code that warrants reconnecting.
    #[error("channel closed with code {code}: {reason}")]
    Closed {
        /// Close code reported by the channel.
        code: CloseCode,
        /// Close reason, possibly empty.
        reason: String,
    },
}

impl TransportError {
    /// Returns true if the failure is an authentication rejection, which
    /// suppresses reconnection.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Something that happened on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    /// Generation of the channel that produced the event.
    pub generation: Generation,
    /// What happened.
    pub kind: ChannelEventKind,
}

impl ChannelEvent {
    /// Construct an event for `generation`.
    pub fn new(generation: Generation, kind: ChannelEventKind) -> Self {
        Self { generation, kind }
    }
}

/// Channel lifecycle and data notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEventKind {
    /// Handshake completed; the channel accepts sends.
    Opened,
    /// Text payload received.
    Text(String),
    /// Binary payload received. The room protocol is text-only.
    Binary(Vec<u8>),
    /// Channel closed, by either side.
    Closed {
        /// Close code.
        code: CloseCode,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// Channel failed without a close handshake.
    Error(TransportError),
}

/// Factory for channels.
pub trait Connector {
    /// Channel handle produced by this connector.
    type Channel: Channel;

    /// Begin opening a channel to `target`.
    ///
    /// Returning `Ok` means the attempt is under way. Its outcome arrives
    /// later as an `Opened`, `Closed` or `Error` event tagged `generation`.
    /// Returning `Err` means the attempt failed before it started.
    fn open(
        &mut self,
        target: &ConnectTarget,
        generation: Generation,
    ) -> Result<Self::Channel, TransportError>;
}

/// Handle to one channel.
pub trait Channel {
    /// Transmit a text payload.
    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Start the close handshake.
    fn close(&mut self, code: CloseCode, reason: &str);
}
