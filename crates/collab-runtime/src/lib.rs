//! Collab runtime.
//!
//! Runs a [`RoomSession`](collab_client::RoomSession) against a real room
//! server:
//! - tokio-tungstenite for the WebSocket channel
//! - Tokio for timers and tasks
//! - the system clock
//!
//! ## Architecture
//!
//! ```text
//! collab-runtime
//!   ├─ SystemEnv      (production Environment impl)
//!   ├─ WsConnector    (one socket task per channel)
//!   ├─ Driver         (select loop: channel events, commands, deadlines)
//!   └─ UserCommand    (line-oriented input)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod config;
mod driver;
mod error;
mod system_env;
mod ws_connector;

pub use command::UserCommand;
pub use config::RuntimeConfig;
pub use driver::{Driver, WsSession};
pub use error::{RuntimeError, UnknownCommand};
pub use system_env::SystemEnv;
pub use ws_connector::{WsChannel, WsConnector};
