//! Connection state machine.
//!
//! `ConnectionManager` owns the one channel of a session. It is driven by
//! method calls, by [`ChannelEvent`]s and by clock ticks, and never performs
//! I/O on its own: channels come from the [`Connector`], and waiting for the
//! reconnection deadline is the driver's job ([`ConnectionManager::next_deadline`]).
//!
//! # State machine
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──Opened──▶ Connected
//!      ▲                        │  ▲                  │
//!      │                        │  └──────tick──────┐ │
//!      │                 failure│                   │ │failure
//!      │                        ▼                   │ ▼
//!      ├──────exhausted/auth── Reconnecting ◀───────┴─┘
//!      │
//!      └──Closed── Closing ◀──disconnect── (any state with a channel)
//! ```
//!
//! # Invariants
//!
//! - At most one channel exists at a time; `connect` tears down the previous
//!   one before opening another.
//! - Events stamped with anything but the current generation are ignored.
//! - The attempt counter is zero after every successful open and after
//!   `disconnect`.
//! - `ReconnectExhausted` is reported at most once per `connect`.

use std::{
    future::Future,
    mem,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use collab_proto::{CloseClass, CloseCode, Frame, ProtocolError};
use tokio::sync::oneshot;

use crate::{
    config::ConnectionConfig,
    credential::{Credential, TokenProvider},
    dispatcher::MessageDispatcher,
    env::Environment,
    error::SessionError,
    queue::PendingQueue,
    transport::{Channel, ChannelEvent, ChannelEventKind, Connector, Generation, TransportError},
};

/// Reason sent with the normal close on `disconnect`.
const DISCONNECT_REASON: &str = "client disconnect";

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No channel and nothing scheduled.
    Disconnected,
    /// Channel requested, waiting for it to open.
    Connecting,
    /// Channel open; sends go straight to the wire.
    Connected,
    /// Channel lost; waiting for the backoff deadline.
    Reconnecting,
    /// `disconnect` sent a normal close; waiting for the channel to confirm.
    Closing,
}

/// Lifecycle notifications for the owner of a [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A channel opened and the pending queue was flushed.
    Opened {
        /// Generation of the new channel.
        generation: Generation,
        /// True if the session had opened before (this is a recovery).
        reconnected: bool,
        /// Queued frames transmitted by the flush.
        flushed: usize,
    },

    /// The channel closed.
    Closed {
        /// Close code.
        code: CloseCode,
        /// Close reason, possibly empty.
        reason: String,
    },

    /// A reconnection attempt is scheduled.
    Reconnecting {
        /// Attempt number, from 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },

    /// Something went wrong. Fatal errors end the session.
    Error(SessionError),
}

/// What [`ConnectionManager::send`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Transmitted on the open channel.
    Sent,
    /// Held in the pending queue until the next open.
    Queued,
}

/// Deferred result of [`ConnectionManager::connect`].
///
/// Resolves `Ok` when the channel opens, or `Err` if the first attempt fails
/// before opening or is superseded. Reconnection may continue after an
/// `Err`; watch [`ConnectionEvent`]s for the outcome.
#[derive(Debug)]
pub struct PendingOpen {
    rx: oneshot::Receiver<Result<(), SessionError>>,
}

impl PendingOpen {
    fn channel() -> (oneshot::Sender<Result<(), SessionError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Result if already settled, without waiting.
    pub fn try_result(&mut self) -> Option<Result<(), SessionError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SessionError::Cancelled)),
        }
    }
}

impl Future for PendingOpen {
    type Output = Result<(), SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SessionError::Cancelled)))
    }
}

/// Per-`connect` bookkeeping.
#[derive(Debug)]
struct Session {
    room: String,
    has_opened: bool,
    exhausted_reported: bool,
}

/// Sans-IO connection manager.
///
/// # Type Parameters
///
/// - `E`: Environment providing the clock
/// - `C`: Connector producing channels
/// - `T`: Source of credentials
pub struct ConnectionManager<E: Environment, C: Connector, T: TokenProvider> {
    env: E,
    connector: C,
    tokens: T,
    config: ConnectionConfig,

    state: ConnectionState,
    session: Option<Session>,
    attempt: u32,
    generation: Generation,
    channel: Option<C::Channel>,
    reconnect_at: Option<E::Instant>,
    pending_open: Option<oneshot::Sender<Result<(), SessionError>>>,

    queue: PendingQueue<E::Instant>,
    dispatcher: MessageDispatcher,
    events: Vec<ConnectionEvent>,
}

impl<E: Environment, C: Connector, T: TokenProvider> ConnectionManager<E, C, T> {
    /// Create a disconnected manager.
    pub fn new(env: E, connector: C, tokens: T, config: ConnectionConfig) -> Self {
        Self {
            env,
            connector,
            tokens,
            config,
            state: ConnectionState::Disconnected,
            session: None,
            attempt: 0,
            generation: Generation::default(),
            channel: None,
            reconnect_at: None,
            pending_open: None,
            queue: PendingQueue::new(),
            dispatcher: MessageDispatcher::new(),
            events: Vec::new(),
        }
    }

    /// Open a channel to `room`.
    ///
    /// Any existing channel is torn down first and its pending open is
    /// cancelled. Fails with [`SessionError::Auth`] without opening anything
    /// if no valid credential is available.
    pub fn connect(&mut self, room: &str) -> Result<PendingOpen, SessionError> {
        self.teardown();

        self.attempt = 0;
        self.session =
            Some(Session { room: room.to_string(), has_opened: false, exhausted_reported: false });

        let (tx, pending) = PendingOpen::channel();
        self.pending_open = Some(tx);

        let credential = match self.fresh_credential() {
            Ok(credential) => credential,
            Err(e) => {
                tracing::error!(room, "{e}");
                self.settle_open(Err(e.clone()));
                self.session = None;
                self.state = ConnectionState::Disconnected;
                return Err(e);
            },
        };

        tracing::info!(room, "connecting");
        self.open_channel(&credential);

        Ok(pending)
    }

    /// Transmit `frame`, or queue it if no channel is open.
    ///
    /// A transmit failure queues the frame and treats the channel as
    /// dropped.
    pub fn send(&mut self, frame: Frame) -> Result<SendOutcome, SessionError> {
        if self.state != ConnectionState::Connected {
            tracing::debug!(event_type = frame.event_type(), state = ?self.state, "queueing frame");
            self.queue.enqueue(frame, self.env.now());
            return Ok(SendOutcome::Queued);
        }

        let text = frame.encode()?;
        let result = match self.channel.as_mut() {
            Some(channel) => channel.send_text(&text),
            None => Err(TransportError::Send { reason: "no channel".to_string() }),
        };

        match result {
            Ok(()) => Ok(SendOutcome::Sent),
            Err(e) => {
                tracing::warn!(generation = %self.generation, "send failed: {e}");
                self.queue.enqueue(frame, self.env.now());
                self.channel_lost(e);
                Ok(SendOutcome::Queued)
            },
        }
    }

    /// Queue `frame` ahead of every pending frame, to go out first on the
    /// next open. Sends immediately if a channel is open.
    pub fn send_first(&mut self, frame: Frame) -> Result<SendOutcome, SessionError> {
        if self.state == ConnectionState::Connected {
            return self.send(frame);
        }
        self.queue.enqueue_front(frame, self.env.now());
        Ok(SendOutcome::Queued)
    }

    /// End the session deliberately.
    ///
    /// Closes the channel with code 1000, drops queued frames and handler
    /// registrations, cancels any scheduled reconnection and resets the
    /// attempt counter. Safe in any state.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Closing {
            return;
        }

        self.settle_open(Err(SessionError::Cancelled));
        self.reconnect_at = None;
        self.attempt = 0;
        self.session = None;
        self.queue.clear();
        self.dispatcher.clear();

        if let Some(channel) = self.channel.as_mut() {
            tracing::info!(generation = %self.generation, "closing channel");
            channel.close(CloseCode::NORMAL, DISCONNECT_REASON);
            self.state = ConnectionState::Closing;
        } else {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Process one channel event.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> Vec<ConnectionEvent> {
        if event.generation != self.generation || self.channel.is_none() {
            tracing::debug!(
                generation = %event.generation,
                current = %self.generation,
                "ignoring event from stale channel"
            );
            return self.take_events();
        }

        match event.kind {
            ChannelEventKind::Opened => self.on_opened(),
            ChannelEventKind::Text(text) => self.on_text(&text),
            ChannelEventKind::Binary(bytes) => {
                self.on_protocol_error(ProtocolError::UnexpectedBinary { len: bytes.len() });
            },
            ChannelEventKind::Closed { code, reason } => self.on_closed(code, reason),
            ChannelEventKind::Error(e) => {
                if self.state == ConnectionState::Closing {
                    self.channel = None;
                    self.state = ConnectionState::Disconnected;
                } else {
                    self.channel_lost(e);
                }
            },
        }

        self.take_events()
    }

    /// Advance the clock to `now`, running a due reconnection attempt.
    pub fn tick(&mut self, now: E::Instant) -> Vec<ConnectionEvent> {
        let due = self.state == ConnectionState::Reconnecting
            && self.reconnect_at.is_some_and(|at| at <= now);

        if due {
            self.reconnect_at = None;
            match self.fresh_credential() {
                Ok(credential) => {
                    tracing::info!(room = self.room_id(), attempt = self.attempt, "reconnecting");
                    self.open_channel(&credential);
                },
                Err(e) => self.fail_fatally(e),
            }
        }

        self.take_events()
    }

    /// Drain notifications produced by `connect`, `send` or `disconnect`.
    pub fn take_events(&mut self) -> Vec<ConnectionEvent> {
        mem::take(&mut self.events)
    }

    /// When `tick` must next be called, if anything is scheduled.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        self.reconnect_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Room of the current session.
    pub fn room_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.room.as_str())
    }

    /// Reconnection attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Generation of the current (or most recent) channel.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Frames waiting for a channel.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued frames, oldest first.
    pub fn pending(&self) -> &PendingQueue<E::Instant> {
        &self.queue
    }

    /// Drop queued frames for which `discard` is true. Returns how many were
    /// dropped.
    pub fn discard_pending(&mut self, mut discard: impl FnMut(&Frame) -> bool) -> usize {
        self.queue.retain(|frame| !discard(frame))
    }

    /// Shared handle to the dispatcher fed by this connection.
    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    /// Active configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Environment this manager reads time from.
    pub fn env(&self) -> &E {
        &self.env
    }

    fn teardown(&mut self) {
        self.settle_open(Err(SessionError::Cancelled));
        self.reconnect_at = None;

        if let Some(mut channel) = self.channel.take() {
            tracing::debug!(generation = %self.generation, "tearing down previous channel");
            if self.state != ConnectionState::Closing {
                channel.close(CloseCode::NORMAL, DISCONNECT_REASON);
            }
        }

        self.state = ConnectionState::Disconnected;
    }

    fn fresh_credential(&self) -> Result<Credential, SessionError> {
        let Some(credential) = self.tokens.token() else {
            return Err(SessionError::Auth { reason: "no credential available".to_string() });
        };
        if self.tokens.is_expired(&credential) {
            return Err(SessionError::Auth { reason: "credential expired".to_string() });
        }
        Ok(credential)
    }

    fn open_channel(&mut self, credential: &Credential) {
        let Some(room) = self.room_id() else {
            return;
        };
        let target = self.config.target(room, credential);

        self.generation = self.generation.next();
        self.state = ConnectionState::Connecting;

        match self.connector.open(&target, self.generation) {
            Ok(channel) => {
                tracing::debug!(generation = %self.generation, ?target, "channel requested");
                self.channel = Some(channel);
            },
            Err(e) => {
                tracing::warn!(generation = %self.generation, "open failed: {e}");
                self.channel_lost(e);
            },
        }
    }

    fn on_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            tracing::debug!(state = ?self.state, "ignoring duplicate open");
            return;
        }

        let reconnected = self.session.as_ref().is_some_and(|s| s.has_opened);
        if let Some(session) = self.session.as_mut() {
            session.has_opened = true;
        }

        self.state = ConnectionState::Connected;
        self.attempt = 0;
        self.reconnect_at = None;
        tracing::info!(
            room = self.room_id(),
            generation = %self.generation,
            reconnected,
            "channel open"
        );

        self.settle_open(Ok(()));

        let flush = match self.channel.as_mut() {
            Some(channel) => self.queue.flush(channel),
            None => Ok(0),
        };

        match flush {
            Ok(flushed) => {
                self.events.push(ConnectionEvent::Opened {
                    generation: self.generation,
                    reconnected,
                    flushed,
                });
            },
            Err(e) => {
                self.events.push(ConnectionEvent::Opened {
                    generation: self.generation,
                    reconnected,
                    flushed: 0,
                });
                self.channel_lost(e);
            },
        }
    }

    fn on_text(&mut self, text: &str) {
        if self.state != ConnectionState::Connected {
            tracing::debug!(state = ?self.state, "dropping frame received outside Connected");
            return;
        }

        match Frame::decode(text) {
            Ok(frame) => {
                self.dispatcher.dispatch(&frame);
            },
            Err(e) => self.on_protocol_error(e),
        }
    }

    fn on_protocol_error(&mut self, error: ProtocolError) {
        tracing::warn!(generation = %self.generation, "dropping frame: {error}");
        self.events.push(ConnectionEvent::Error(SessionError::Protocol(error)));
    }

    fn on_closed(&mut self, code: CloseCode, reason: String) {
        self.channel = None;
        self.events.push(ConnectionEvent::Closed { code, reason: reason.clone() });

        if self.state == ConnectionState::Closing {
            tracing::info!(%code, "channel closed");
            self.state = ConnectionState::Disconnected;
            return;
        }

        match code.classify() {
            CloseClass::Deliberate => {
                tracing::info!(%code, "channel closed normally");
                self.settle_open(Err(SessionError::Transport(TransportError::Closed {
                    code,
                    reason,
                })));
                self.reconnect_at = None;
                self.state = ConnectionState::Disconnected;
            },
            CloseClass::Rejected => {
                let reason = if reason.is_empty() {
                    format!("rejected by server (close code {code})")
                } else {
                    format!("rejected by server (close code {code}): {reason}")
                };
                self.fail_fatally(SessionError::Auth { reason });
            },
            CloseClass::Abnormal => {
                tracing::warn!(%code, %reason, "channel closed abnormally");
                self.channel_lost(TransportError::Closed { code, reason });
            },
        }
    }

    /// Channel failed without a deliberate close.
    fn channel_lost(&mut self, error: TransportError) {
        self.channel = None;

        if error.is_auth() {
            self.fail_fatally(SessionError::Auth { reason: error.to_string() });
            return;
        }

        let error = SessionError::Transport(error);
        self.settle_open(Err(error.clone()));
        self.events.push(ConnectionEvent::Error(error));
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.session.is_none() {
            self.state = ConnectionState::Disconnected;
            return;
        }

        self.attempt = self.attempt.saturating_add(1);
        let policy = self.config.policy;

        if !policy.allows(self.attempt) {
            self.reconnect_at = None;
            self.state = ConnectionState::Disconnected;

            let first_report = self
                .session
                .as_mut()
                .is_some_and(|s| !mem::replace(&mut s.exhausted_reported, true));
            if first_report {
                tracing::error!(room = self.room_id(), attempts = policy.max_attempts, "giving up");
                self.events.push(ConnectionEvent::Error(SessionError::ReconnectExhausted {
                    attempts: policy.max_attempts,
                }));
            }
            return;
        }

        let delay = policy.delay(self.attempt);
        self.reconnect_at = Some(self.env.now() + delay);
        self.state = ConnectionState::Reconnecting;

        tracing::info!(
            room = self.room_id(),
            attempt = self.attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        self.events.push(ConnectionEvent::Reconnecting { attempt: self.attempt, delay });
    }

    fn fail_fatally(&mut self, error: SessionError) {
        tracing::error!(room = self.room_id(), "{error}");
        self.settle_open(Err(error.clone()));
        self.reconnect_at = None;
        self.channel = None;
        self.state = ConnectionState::Disconnected;
        self.events.push(ConnectionEvent::Error(error));
    }

    fn settle_open(&mut self, result: Result<(), SessionError>) {
        if let Some(tx) = self.pending_open.take() {
            let _ = tx.send(result);
        }
    }
}

impl<E, C, T> std::fmt::Debug for ConnectionManager<E, C, T>
where
    E: Environment,
    C: Connector,
    T: TokenProvider,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("room", &self.room_id())
            .field("attempt", &self.attempt)
            .field("generation", &self.generation)
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}
