//! Collab wire protocol.
//!
//! Frames exchanged between a client and a collaboration room over a
//! persistent text channel. Every frame is a UTF-8 JSON object whose
//! `event_type` field selects the variant.
//!
//! # Components
//!
//! - [`Frame`]: Open discriminated union of room events
//! - [`EventType`]: Known discriminants, used as dispatch keys
//! - [`CloseCode`]: Channel close codes and their classification
//! - [`ProtocolError`]: Decode/encode failures

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod close_code;
mod error;
mod frame;

pub use close_code::{CloseClass, CloseCode};
pub use error::ProtocolError;
pub use frame::{EVENT_TYPE_FIELD, EventType, Frame, MAX_FRAME_LEN, UnknownFrame};
