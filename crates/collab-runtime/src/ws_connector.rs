//! WebSocket transport over tokio-tungstenite.
//!
//! Each [`WsConnector::open`] spawns one task that owns the socket for the
//! channel's whole life. Everything the socket does comes back to the driver
//! as a [`ChannelEvent`] stamped with the channel's generation, over a single
//! queue shared by all channels. The returned [`WsChannel`] only forwards
//! commands to the task.
//!
//! ```text
//! ConnectionManager ──send_text/close──▶ WsChannel ──mpsc──▶ socket task
//!        ▲                                                       │
//!        └────────── driver ◀──────── ChannelEvent ◀──────────────┘
//! ```

use std::time::Duration;

use collab_core::{
    Channel, ChannelEvent, ChannelEventKind, ConnectTarget, Connector, Generation, TransportError,
};
use collab_proto::CloseCode;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    self, Message,
    http::StatusCode,
    protocol::{CloseFrame, frame::coding::CloseCode as WsCloseCode},
};

/// Work for a socket task.
#[derive(Debug)]
enum Command {
    Text(String),
    Close { code: CloseCode, reason: String },
}

/// Opens WebSocket channels on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct WsConnector {
    events: mpsc::UnboundedSender<ChannelEvent>,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Connector reporting every channel's events to `events`.
    pub fn new(events: mpsc::UnboundedSender<ChannelEvent>, connect_timeout: Duration) -> Self {
        Self { events, connect_timeout }
    }
}

impl Connector for WsConnector {
    type Channel = WsChannel;

    fn open(
        &mut self,
        target: &ConnectTarget,
        generation: Generation,
    ) -> Result<WsChannel, TransportError> {
        if self.events.is_closed() {
            return Err(TransportError::Connect { reason: "event queue closed".to_string() });
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let task = SocketTask {
            url: target.url().to_string(),
            generation,
            events: self.events.clone(),
            commands: rx,
            connect_timeout: self.connect_timeout,
        };
        tokio::spawn(task.run());

        Ok(WsChannel { generation, commands })
    }
}

/// Handle to one socket task.
///
/// Dropping the handle closes the socket with a normal close.
#[derive(Debug)]
pub struct WsChannel {
    generation: Generation,
    commands: mpsc::UnboundedSender<Command>,
}

impl Channel for WsChannel {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.commands.send(Command::Text(text.to_string())).map_err(|_| TransportError::Send {
            reason: format!("channel {} has ended", self.generation),
        })
    }

    fn close(&mut self, code: CloseCode, reason: &str) {
        let _ = self.commands.send(Command::Close { code, reason: reason.to_string() });
    }
}

struct SocketTask {
    url: String,
    generation: Generation,
    events: mpsc::UnboundedSender<ChannelEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    connect_timeout: Duration,
}

impl SocketTask {
    async fn run(mut self) {
        let handshake = tokio_tungstenite::connect_async(self.url.as_str());
        let stream = match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                tracing::warn!(generation = %self.generation, "handshake failed: {e}");
                self.emit(ChannelEventKind::Error(classify_handshake_error(&e)));
                return;
            },
            Err(_) => {
                tracing::warn!(
                    generation = %self.generation,
                    timeout = ?self.connect_timeout,
                    "handshake timed out"
                );
                self.emit(ChannelEventKind::Error(TransportError::Connect {
                    reason: format!("handshake timed out after {:?}", self.connect_timeout),
                }));
                return;
            },
        };

        tracing::debug!(generation = %self.generation, "socket open");
        self.emit(ChannelEventKind::Opened);

        let (mut write, mut read) = stream.split();
        let mut closing = false;

        loop {
            tokio::select! {
                command = self.commands.recv(), if !closing => {
                    let message = match command {
                        Some(Command::Text(text)) => Message::Text(text.into()),
                        Some(Command::Close { code, reason }) => {
                            closing = true;
                            close_message(code, reason)
                        },
                        None => {
                            closing = true;
                            close_message(CloseCode::NORMAL, String::new())
                        },
                    };
                    if let Err(e) = write.send(message).await {
                        tracing::debug!(generation = %self.generation, "write failed: {e}");
                        let error = TransportError::Send { reason: e.to_string() };
                        self.emit(ChannelEventKind::Error(error));
                        return;
                    }
                },
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.emit(ChannelEventKind::Text(text.as_str().to_string()));
                    },
                    Some(Ok(Message::Binary(bytes))) => {
                        self.emit(ChannelEventKind::Binary(bytes.to_vec()));
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or(
                            (CloseCode::NO_STATUS, String::new()),
                            |f| (CloseCode(u16::from(f.code)), f.reason.as_str().to_string()),
                        );
                        tracing::debug!(generation = %self.generation, %code, "close received");
                        self.emit(ChannelEventKind::Closed { code, reason });
                        return;
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {},
                    Some(Err(e)) => {
                        tracing::debug!(generation = %self.generation, "read failed: {e}");
                        self.emit(ChannelEventKind::Closed {
                            code: CloseCode::ABNORMAL,
                            reason: e.to_string(),
                        });
                        return;
                    },
                    None => {
                        self.emit(ChannelEventKind::Closed {
                            code: CloseCode::ABNORMAL,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    },
                },
            }
        }
    }

    fn emit(&self, kind: ChannelEventKind) {
        let _ = self.events.send(ChannelEvent::new(self.generation, kind));
    }
}

fn close_message(code: CloseCode, reason: String) -> Message {
    let frame = CloseFrame { code: WsCloseCode::from(code.as_u16()), reason: reason.into() };
    Message::Close(Some(frame))
}

/// Map a failed handshake to a transport error. An HTTP 401 or 403 means
/// the server refused the credential.
fn classify_handshake_error(error: &tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Http(response)
            if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
        {
            let reason = format!("handshake rejected with {}", response.status());
            TransportError::Unauthorized { reason }
        },
        other => TransportError::Connect { reason: other.to_string() },
    }
}
