//! Channel close codes.
//!
//! The client only ever closes with [`CloseCode::NORMAL`], and only when the
//! user asked to disconnect. Every other code seen on a close is treated as a
//! failure of the channel, except the codes the room server uses to reject a
//! credential or a room, which must not be retried.

use std::fmt;

/// WebSocket-style close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure, sent by a deliberate disconnect.
    pub const NORMAL: Self = Self(1000);
    /// Endpoint is going away (server shutdown, page unload).
    pub const GOING_AWAY: Self = Self(1001);
    /// Close frame carried no status code.
    pub const NO_STATUS: Self = Self(1005);
    /// Closed without a close frame.
    pub const ABNORMAL: Self = Self(1006);
    /// Policy violation. The room server sends this for a rejected token or a
    /// non-member.
    pub const POLICY_VIOLATION: Self = Self(1008);
    /// Server hit an unexpected condition.
    pub const INTERNAL_ERROR: Self = Self(1011);
    /// Another connection for the same user and room replaced this one.
    pub const SUPERSEDED: Self = Self(4000);
    /// Room does not exist or is not accessible.
    pub const ROOM_UNAVAILABLE: Self = Self(4003);

    /// Raw numeric value.
    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// Classify this code for the reconnection policy.
    pub fn classify(self) -> CloseClass {
        match self {
            Self::NORMAL => CloseClass::Deliberate,
            Self::POLICY_VIOLATION | Self::ROOM_UNAVAILABLE => CloseClass::Rejected,
            _ => CloseClass::Abnormal,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a close affects the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Client-requested closure. Never reconnect.
    Deliberate,
    /// Server refused the credential or room. Never reconnect.
    Rejected,
    /// Anything else. Reconnect with backoff.
    Abnormal,
}
