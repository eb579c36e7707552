//! Collab room session.
//!
//! [`RoomSession`] sits on top of a
//! [`ConnectionManager`](collab_core::ConnectionManager) and keeps the
//! client's view of one room: membership, presence roster, the shared code
//! buffer and the chat transcript. State changes are published as
//! [`SessionEvent`]s on an unbounded channel for the UI to render.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod event;
mod room;
mod session;

pub use event::SessionEvent;
pub use room::{ChatEntry, EntryStatus, Membership, RoomState, Roster};
pub use session::RoomSession;
