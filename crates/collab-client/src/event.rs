//! Session notifications for the UI.

use std::time::Duration;

use collab_core::ErrorKind;
use collab_proto::CloseCode;

use crate::room::{ChatEntry, Membership};

/// Something the UI may want to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Channel opened.
    Opened {
        /// True when recovering from a dropped channel.
        reconnected: bool,
    },

    /// Channel closed.
    Closed {
        /// Close code.
        code: CloseCode,
        /// Close reason, possibly empty.
        reason: String,
    },

    /// Reconnection scheduled.
    Reconnecting {
        /// Attempt number, from 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },

    /// Room membership moved.
    MembershipChanged(Membership),

    /// The shared code buffer was replaced.
    CodeChanged(String),

    /// A transcript entry was added or confirmed.
    ChatMessage(ChatEntry),

    /// The presence roster changed. Carries the full roster.
    RosterChanged(Vec<String>),

    /// The session ended with an error that will not be retried.
    Fatal {
        /// Error classification.
        kind: ErrorKind,
        /// Human-readable description.
        message: String,
    },
}
