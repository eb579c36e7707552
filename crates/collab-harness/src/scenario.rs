//! Scripted session driver.
//!
//! A `Scenario` wires a [`RoomSession`] to the simulated environment,
//! connector and token source, and offers one-line helpers for the channel
//! events a server would produce.

use std::time::Duration;

use collab_client::{RoomSession, SessionEvent};
use collab_core::{
    ChannelEvent, ChannelEventKind, ConnectionConfig, ConnectionManager, Environment, Generation,
    ReconnectPolicy,
};
use collab_proto::{CloseCode, Frame};
use tokio::sync::mpsc;

use crate::{SimConnector, SimEnv, SimTokens};

/// Room session over the simulated seams.
pub type SimSession = RoomSession<SimEnv, SimConnector, SimTokens>;

/// Endpoint used by scenarios.
pub const ENDPOINT: &str = "ws://host";

/// A session plus handles to everything around it.
#[derive(Debug)]
pub struct Scenario {
    /// Session under test.
    pub session: SimSession,
    /// Shared clock.
    pub env: SimEnv,
    /// Shared transport log.
    pub connector: SimConnector,
    /// Shared credential source.
    pub tokens: SimTokens,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Scenario {
    /// Scenario with the default reconnect policy and token `abc123`.
    pub fn new() -> Self {
        Self::with_policy(ReconnectPolicy::default())
    }

    /// Scenario with a custom reconnect policy.
    pub fn with_policy(policy: ReconnectPolicy) -> Self {
        let env = SimEnv::new();
        let connector = SimConnector::new();
        let tokens = SimTokens::new("abc123");
        let config = ConnectionConfig { endpoint: ENDPOINT.to_string(), policy };

        let manager =
            ConnectionManager::new(env.clone(), connector.clone(), tokens.clone(), config);
        let (session, events) = RoomSession::new(manager);

        Self { session, env, connector, tokens, events }
    }

    /// Generation of the newest channel.
    pub fn generation(&self) -> Generation {
        self.session.manager().generation()
    }

    /// Deliver an event of `kind` on the current channel.
    pub fn channel(&mut self, kind: ChannelEventKind) {
        let generation = self.generation();
        self.session.handle_channel_event(ChannelEvent::new(generation, kind));
    }

    /// The current channel finishes opening.
    pub fn open(&mut self) {
        self.channel(ChannelEventKind::Opened);
    }

    /// The server sends `frame`.
    pub fn deliver(&mut self, frame: &Frame) {
        let text = frame.encode().unwrap_or_default();
        self.channel(ChannelEventKind::Text(text));
    }

    /// The current channel closes with `code`.
    pub fn close(&mut self, code: u16) {
        self.channel(ChannelEventKind::Closed { code: CloseCode(code), reason: String::new() });
    }

    /// Advance the clock by `by` and tick the session.
    pub fn advance(&mut self, by: Duration) {
        self.env.advance(by);
        self.session.tick(self.env.now());
    }

    /// Advance the clock to the session's next deadline, if any, and tick.
    /// Returns the time advanced.
    pub fn advance_to_deadline(&mut self) -> Option<Duration> {
        let deadline = self.session.next_deadline()?;
        let wait = deadline - self.env.now();
        self.advance(wait);
        Some(wait)
    }

    /// Session events published since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}
