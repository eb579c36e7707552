//! Room session.
//!
//! `RoomSession` owns the [`ConnectionManager`] and the room state. Inbound
//! frames reach the state through keyed handlers on the manager's
//! dispatcher; local commands go through the manager's send path and so are
//! queued transparently while the channel is down.

use std::{cell::RefCell, rc::Rc};

use collab_core::{
    ChannelEvent, ConnectionEvent, ConnectionManager, ConnectionState, Connector, Environment,
    HandlerError, PendingOpen, SendOutcome, SessionError, Subscription, TokenProvider,
};
use collab_proto::{CloseClass, EventType, Frame};
use tokio::sync::mpsc;

use crate::{
    event::SessionEvent,
    room::{ChatEntry, Membership, RoomState},
};

/// Frames that update room state.
const ROOM_EVENTS: [EventType; 6] = [
    EventType::RoomJoined,
    EventType::UserList,
    EventType::UserJoined,
    EventType::UserLeft,
    EventType::CodeUpdate,
    EventType::ChatMessage,
];

/// Client session for one room.
pub struct RoomSession<E: Environment, C: Connector, T: TokenProvider> {
    manager: ConnectionManager<E, C, T>,
    state: Rc<RefCell<RoomState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    subscriptions: Vec<Subscription>,
    rejoin_armed: bool,
}

impl<E: Environment, C: Connector, T: TokenProvider> RoomSession<E, C, T> {
    /// Wrap `manager`. The receiver yields every [`SessionEvent`].
    pub fn new(
        manager: ConnectionManager<E, C, T>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            manager,
            state: Rc::new(RefCell::new(RoomState::new())),
            events: tx,
            subscriptions: Vec::new(),
            rejoin_armed: false,
        };
        (session, rx)
    }

    /// Open the channel to `room` and install the room handlers.
    ///
    /// If an earlier connection ended for good while `room` was joined, the
    /// join is repeated on the new channel.
    pub fn connect(&mut self, room: &str) -> Result<PendingOpen, SessionError> {
        self.install_handlers();
        self.rejoin_armed = false;

        let result = self.manager.connect(room);
        match &result {
            Ok(_) => self.resume(room),
            Err(e) => {
                let events = self.state.borrow_mut().abandon();
                self.publish(events);
                self.publish_fatal(e);
            },
        }
        self.forward();
        result
    }

    /// Join `room` as `username`.
    ///
    /// The room and username are recorded immediately and membership moves
    /// to `Joining`; only the server's `room_joined` completes the join.
    pub fn join(&mut self, room: &str, username: &str) -> Result<SendOutcome, SessionError> {
        let events = self.state.borrow_mut().begin_join(room, username);
        self.publish(events);

        let outcome = self
            .manager
            .send(Frame::JoinRoom { room: room.to_string(), username: username.to_string() });
        self.forward();
        outcome
    }

    /// Leave `room`. Local state is cleared whatever happens to the frame.
    pub fn leave(&mut self, room: &str, username: &str) -> Result<SendOutcome, SessionError> {
        let outcome = self
            .manager
            .send(Frame::LeaveRoom { room: room.to_string(), username: username.to_string() });

        let events = self.state.borrow_mut().leave();
        self.publish(events);
        self.forward();
        outcome
    }

    /// Send a chat line, showing it locally as provisional right away.
    pub fn send_chat(&mut self, content: &str) -> Result<SendOutcome, SessionError> {
        let (room, username) = self.desired()?;
        let timestamp = chrono::Utc::now();

        let events = self.state.borrow_mut().record_provisional(content, timestamp);
        self.publish(events);

        let outcome = self.manager.send(Frame::ChatMessage {
            content: content.to_string(),
            room,
            username,
            timestamp,
        });
        self.forward();
        outcome
    }

    /// Replace the shared code buffer and broadcast it.
    pub fn update_code(&mut self, code: &str) -> Result<SendOutcome, SessionError> {
        let (room, username) = self.desired()?;

        let events = self.state.borrow_mut().set_local_code(code);
        self.publish(events);

        let outcome =
            self.manager.send(Frame::CodeUpdate { room, code: code.to_string(), username });
        self.forward();
        outcome
    }

    /// End the session. Clears all room state and handler registrations.
    pub fn disconnect(&mut self) {
        self.manager.disconnect();
        self.subscriptions.clear();
        self.rejoin_armed = false;

        let events = self.state.borrow_mut().reset();
        self.publish(events);
        self.forward();
    }

    /// Feed a channel event through the connection.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        let events = self.manager.handle_channel_event(event);
        self.react(events);
    }

    /// Advance the connection's clock.
    pub fn tick(&mut self, now: E::Instant) {
        let events = self.manager.tick(now);
        self.react(events);
    }

    /// When `tick` must next be called.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        self.manager.next_deadline()
    }

    /// Current membership.
    pub fn membership(&self) -> Membership {
        self.state.borrow().membership()
    }

    /// Presence roster, in roster order.
    pub fn roster(&self) -> Vec<String> {
        self.state.borrow().roster().users().to_vec()
    }

    /// Shared code buffer.
    pub fn code(&self) -> String {
        self.state.borrow().code().to_string()
    }

    /// Chat transcript, oldest first.
    pub fn transcript(&self) -> Vec<ChatEntry> {
        self.state.borrow().transcript().to_vec()
    }

    /// Room from the last `join`.
    pub fn room(&self) -> Option<String> {
        self.state.borrow().room().map(str::to_string)
    }

    /// Connection lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Underlying connection.
    pub fn manager(&self) -> &ConnectionManager<E, C, T> {
        &self.manager
    }

    /// Underlying connection, mutably.
    pub fn manager_mut(&mut self) -> &mut ConnectionManager<E, C, T> {
        &mut self.manager
    }

    fn desired(&self) -> Result<(String, String), SessionError> {
        let state = self.state.borrow();
        match (state.room(), state.username()) {
            (Some(room), Some(username)) => Ok((room.to_string(), username.to_string())),
            _ => Err(SessionError::NotInRoom),
        }
    }

    fn install_handlers(&mut self) {
        if self.subscriptions.iter().any(Subscription::is_active) {
            return;
        }
        self.subscriptions.clear();

        let dispatcher = self.manager.dispatcher().clone();
        for event_type in ROOM_EVENTS {
            let state = Rc::clone(&self.state);
            let events = self.events.clone();
            let subscription = dispatcher.subscribe_to(event_type, move |frame| {
                let mut state = state
                    .try_borrow_mut()
                    .map_err(|_| HandlerError::new("room state already borrowed"))?;
                for event in state.apply(frame) {
                    let _ = events.send(event);
                }
                Ok(())
            });
            self.subscriptions.push(subscription);
        }
    }

    /// Drain notifications left by a command.
    fn forward(&mut self) {
        let events = self.manager.take_events();
        self.react(events);
    }

    fn react(&mut self, events: Vec<ConnectionEvent>) {
        for event in events {
            match event {
                ConnectionEvent::Opened { reconnected, .. } => {
                    self.rejoin_armed = true;
                    self.publish([SessionEvent::Opened { reconnected }]);
                },
                ConnectionEvent::Closed { code, reason } => {
                    let ended = code.classify() == CloseClass::Deliberate
                        && self.manager.state() == ConnectionState::Disconnected;
                    self.publish([SessionEvent::Closed { code, reason }]);
                    if ended {
                        self.rejoin_armed = false;
                        let events = self.state.borrow_mut().abandon();
                        self.publish(events);
                    }
                },
                ConnectionEvent::Reconnecting { attempt, delay } => {
                    if std::mem::take(&mut self.rejoin_armed) {
                        self.queue_rejoin();
                    }
                    self.publish([SessionEvent::Reconnecting { attempt, delay }]);
                },
                ConnectionEvent::Error(e) if e.is_fatal() => {
                    self.rejoin_armed = false;
                    let events = self.state.borrow_mut().abandon();
                    self.publish(events);
                    self.publish_fatal(&e);
                },
                ConnectionEvent::Error(e) => {
                    tracing::debug!(kind = ?e.kind(), "{e}");
                },
            }
        }
    }

    /// Replace joins left queued by an abandoned session with a fresh one
    /// for `room`, or forget the old room if `room` is another one.
    fn resume(&mut self, room: &str) {
        if !self.state.borrow().is_abandoned() {
            return;
        }

        let stale = self.manager.discard_pending(|frame| matches!(frame, Frame::JoinRoom { .. }));
        if stale > 0 {
            tracing::debug!(stale, "dropped stale join frames");
        }

        if self.state.borrow().room() == Some(room) {
            self.queue_rejoin();
        } else {
            let events = self.state.borrow_mut().leave();
            self.publish(events);
        }
    }

    fn queue_rejoin(&mut self) {
        let Some((frame, events)) = self.state.borrow_mut().begin_rejoin() else {
            return;
        };
        self.publish(events);

        tracing::info!(room = frame.room(), "queueing rejoin");
        if let Err(e) = self.manager.send_first(frame) {
            tracing::warn!("rejoin not queued: {e}");
        }
    }

    fn publish_fatal(&self, error: &SessionError) {
        self.publish([SessionEvent::Fatal { kind: error.kind(), message: error.to_string() }]);
    }

    fn publish(&self, events: impl IntoIterator<Item = SessionEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }
}

impl<E, C, T> std::fmt::Debug for RoomSession<E, C, T>
where
    E: Environment,
    C: Connector,
    T: TokenProvider,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("manager", &self.manager)
            .field("membership", &self.membership())
            .finish_non_exhaustive()
    }
}
