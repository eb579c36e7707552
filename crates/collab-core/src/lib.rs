//! Collab session core.
//!
//! Sans-IO building blocks for a room session over a persistent channel. No
//! type in this crate performs I/O or reads the clock on its own: time comes
//! from an [`Environment`], channels from a [`Connector`], credentials from a
//! [`TokenProvider`]. Callers feed channel events and clock ticks in and act
//! on the returned [`ConnectionEvent`]s.
//!
//! # Components
//!
//! - [`ConnectionManager`]: Channel lifecycle and reconnection policy
//! - [`PendingQueue`]: Outbound frames held while no channel is open
//! - [`MessageDispatcher`]: Routes decoded frames to registered handlers
//! - [`ReconnectPolicy`]: Capped exponential backoff
//!
//! All types are single-threaded (`!Send`); run them on one task.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod config;
pub mod connection;
pub mod credential;
pub mod dispatcher;
pub mod env;
pub mod error;
pub mod queue;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use config::ConnectionConfig;
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, PendingOpen, SendOutcome,
};
pub use credential::{Credential, StaticTokenProvider, TokenProvider};
pub use dispatcher::{DispatchReport, MessageDispatcher, Subscription};
pub use env::Environment;
pub use error::{ErrorKind, HandlerError, SessionError};
pub use queue::{PendingMessage, PendingQueue};
pub use transport::{
    Channel, ChannelEvent, ChannelEventKind, ConnectTarget, Connector, Generation, TransportError,
};
