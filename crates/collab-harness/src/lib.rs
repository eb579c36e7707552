//! Deterministic simulation harness for collab sessions.
//!
//! In-memory implementations of the `Environment`, `Connector` and
//! `TokenProvider` seams. Time only moves when a test advances it, channels
//! open and close only when a test says so, and everything sent is recorded.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference room for model-based testing.
//! Operations are applied to both the model and a real `RoomSession`
//! (`RealRoom`), and their observable states are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod real_room;
pub mod scenario;
pub mod sim_connector;
pub mod sim_env;
pub mod sim_tokens;

pub use model::{
    CommandResult, LOCAL_USER, ModelRoom, ObservableRoom, Operation, ROOM, text, user_name,
};
pub use real_room::RealRoom;
pub use scenario::{Scenario, SimSession};
pub use sim_connector::{SimChannel, SimConnector};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_tokens::SimTokens;
