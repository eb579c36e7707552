//! Connection configuration and target construction.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::{backoff::ReconnectPolicy, credential::Credential, transport::ConnectTarget};

/// Characters escaped in a URL component. Matches `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Path prefix of room channels on the server.
const ROOM_PATH: &str = "/ws/chat/group/";

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// `scheme://host[:port]` of the room server, e.g. `ws://localhost:8000`.
    pub endpoint: String,
    /// Reconnection backoff.
    pub policy: ReconnectPolicy,
}

impl ConnectionConfig {
    /// Configuration with the default policy.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), policy: ReconnectPolicy::default() }
    }

    /// Address of `room`, authenticated with `credential`.
    pub fn target(&self, room: &str, credential: &Credential) -> ConnectTarget {
        let endpoint = self.endpoint.trim_end_matches('/');
        let url = format!(
            "{endpoint}{ROOM_PATH}{room}?token={token}",
            room = utf8_percent_encode(room, COMPONENT),
            token = utf8_percent_encode(credential.expose(), COMPONENT),
        );
        ConnectTarget::new(url, room)
    }
}
