//! Event loop around a [`RoomSession`].
//!
//! The session is a single-threaded state machine, so the loop runs on the
//! current task and multiplexes three sources:
//!
//! - channel events from the socket tasks
//! - user commands
//! - the session's reconnection deadline (and, after `quit`, the close
//!   timeout)
//!
//! Session notifications are drained after every step and handed to the
//! caller's observer in order.

use std::time::{Duration, Instant};

use collab_client::{RoomSession, SessionEvent};
use collab_core::{
    ChannelEvent, ConnectionManager, ConnectionState, Environment, SendOutcome, TokenProvider,
};
use tokio::sync::mpsc;

use crate::{
    command::UserCommand, config::RuntimeConfig, error::RuntimeError, system_env::SystemEnv,
    ws_connector::WsConnector,
};

/// Room session over WebSockets and the system clock.
pub type WsSession<T> = RoomSession<SystemEnv, WsConnector, T>;

/// Drives one session until it ends.
#[derive(Debug)]
pub struct Driver<T: TokenProvider> {
    env: SystemEnv,
    session: WsSession<T>,
    channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    close_timeout: Duration,
}

impl<T: TokenProvider> Driver<T> {
    /// Build a disconnected session from `config`, authenticating with
    /// `tokens`.
    pub fn new(config: RuntimeConfig, tokens: T) -> Self {
        let env = SystemEnv::new();
        let (events_tx, channel_events) = mpsc::unbounded_channel();
        let connector = WsConnector::new(events_tx, config.connect_timeout);

        let manager = ConnectionManager::new(env, connector, tokens, config.connection);
        let (session, session_events) = RoomSession::new(manager);

        Self { env, session, channel_events, session_events, close_timeout: config.close_timeout }
    }

    /// Session being driven.
    pub fn session(&self) -> &WsSession<T> {
        &self.session
    }

    /// Connect to `room`, join it as `username`, and execute `commands`
    /// until one of:
    ///
    /// - `Quit` (or the command stream ending) and the close completing
    /// - the server closing the channel normally
    /// - a fatal session error, returned as [`RuntimeError::Fatal`]
    pub async fn run(
        mut self,
        room: &str,
        username: &str,
        mut commands: mpsc::UnboundedReceiver<UserCommand>,
        mut observer: impl FnMut(&SessionEvent),
    ) -> Result<(), RuntimeError> {
        // Progress is reported through session events.
        let _pending = self.session.connect(room)?;
        self.session.join(room, username)?;

        let env = self.env;
        let mut quit_deadline: Option<Instant> = None;

        loop {
            self.drain(&mut observer)?;

            if self.session.connection_state() == ConnectionState::Disconnected
                && self.session.next_deadline().is_none()
            {
                if quit_deadline.is_none() {
                    tracing::info!(room, "channel closed by server");
                }
                break;
            }

            let deadline = earliest(self.session.next_deadline(), quit_deadline);
            let wait = async move {
                match deadline {
                    Some(at) => env.sleep(at.saturating_duration_since(env.now())).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                Some(event) = self.channel_events.recv() => {
                    self.session.handle_channel_event(event);
                },
                command = commands.recv(), if quit_deadline.is_none() => match command {
                    Some(UserCommand::Quit) | None => {
                        tracing::info!(room, "disconnecting");
                        self.session.disconnect();
                        quit_deadline = Some(env.now() + self.close_timeout);
                    },
                    Some(command) => self.execute(command, room, username),
                },
                () = wait => {
                    let now = env.now();
                    if quit_deadline.is_some_and(|at| at <= now) {
                        tracing::warn!(room, "close not confirmed, giving up");
                        break;
                    }
                    self.session.tick(now);
                },
            }
        }

        self.drain(&mut observer)
    }

    fn execute(&mut self, command: UserCommand, room: &str, username: &str) {
        let result = match command {
            UserCommand::Chat(text) => self.session.send_chat(&text),
            UserCommand::Code(code) => self.session.update_code(&code),
            UserCommand::Join => self.session.join(room, username),
            UserCommand::Leave => self.session.leave(room, username),
            UserCommand::Quit => return,
        };

        match result {
            Ok(SendOutcome::Sent) => {},
            Ok(SendOutcome::Queued) => {
                let pending = self.session.manager().pending_len();
                tracing::info!(pending, "offline, will send on reconnect");
            },
            Err(e) => tracing::warn!("{e}"),
        }
    }

    /// Hand queued notifications to `observer`. A fatal one ends the run.
    fn drain(&mut self, observer: &mut impl FnMut(&SessionEvent)) -> Result<(), RuntimeError> {
        let mut fatal = None;
        while let Ok(event) = self.session_events.try_recv() {
            observer(&event);
            if let SessionEvent::Fatal { kind, message } = event {
                fatal.get_or_insert(RuntimeError::Fatal { kind, message });
            }
        }
        fatal.map_or(Ok(()), Err)
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_picks_the_sooner_deadline() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);

        assert_eq!(earliest(Some(now), Some(later)), Some(now));
        assert_eq!(earliest(None, Some(later)), Some(later));
        assert_eq!(earliest(Some(now), None), Some(now));
        assert_eq!(earliest(None, None), None);
    }
}
