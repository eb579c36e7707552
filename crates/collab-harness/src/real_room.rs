//! Real session driven by model operations.
//!
//! `RealRoom` mirrors [`ModelRoom`](crate::ModelRoom)'s interface on top of a
//! [`Scenario`]: local operations become session commands, server operations
//! become frames delivered on the open channel.

use chrono::{DateTime, Utc};
use collab_core::SessionError;
use collab_proto::Frame;

use crate::{
    Scenario,
    model::{CommandResult, LOCAL_USER, ObservableRoom, Operation, ROOM, text, user_name},
};

/// Server timestamp stamped on every scripted chat line.
const SERVER_TIME: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// A connected session that accepts [`Operation`]s.
#[derive(Debug)]
pub struct RealRoom {
    scenario: Scenario,
}

impl RealRoom {
    /// Session connected to [`ROOM`] with the channel open, not yet joined.
    pub fn new() -> Result<Self, SessionError> {
        let mut scenario = Scenario::new();
        scenario.session.connect(ROOM)?;
        scenario.open();
        Ok(Self { scenario })
    }

    /// Apply `op`. Errors other than `NotInRoom` are returned as-is.
    pub fn apply(&mut self, op: &Operation) -> Result<CommandResult, SessionError> {
        let sc = &mut self.scenario;
        let result = match op {
            Operation::Join => sc.session.join(ROOM, LOCAL_USER).map(drop),
            Operation::Leave => sc.session.leave(ROOM, LOCAL_USER).map(drop),
            Operation::LocalChat { content } => sc.session.send_chat(&text(*content)).map(drop),
            Operation::LocalCode { content } => sc.session.update_code(&text(*content)).map(drop),
            Operation::DropAndRecover => {
                sc.close(1006);
                if sc.advance_to_deadline().is_some() {
                    sc.open();
                }
                Ok(())
            },
            server => {
                if let Some(frame) = server_frame(server) {
                    sc.deliver(&frame);
                }
                Ok(())
            },
        };

        match result {
            Ok(()) => Ok(CommandResult::Ok),
            Err(SessionError::NotInRoom) => Ok(CommandResult::NotInRoom),
            Err(e) => Err(e),
        }
    }

    /// Observable state, comparable with the model's.
    pub fn observable(&self) -> ObservableRoom {
        let session = &self.scenario.session;
        ObservableRoom {
            membership: session.membership(),
            roster: session.roster(),
            code: session.code(),
            transcript: session
                .transcript()
                .into_iter()
                .map(|entry| (entry.username, entry.content, entry.status))
                .collect(),
        }
    }

    /// Underlying scenario.
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }
}

/// Frame the server sends for a server-side operation.
fn server_frame(op: &Operation) -> Option<Frame> {
    let frame = match op {
        Operation::ServerRoomJoined => Frame::RoomJoined {},
        Operation::ServerUserList { users } => {
            Frame::UserList { users: users.iter().map(|u| user_name(*u)).collect() }
        },
        Operation::ServerUserJoined { user } => Frame::UserJoined { username: user_name(*user) },
        Operation::ServerUserLeft { user } => Frame::UserLeft { username: user_name(*user) },
        Operation::ServerCode { content } => Frame::CodeUpdate {
            room: ROOM.to_string(),
            code: text(*content),
            username: user_name(0),
        },
        Operation::ServerChat { from_self, content } => Frame::ChatMessage {
            content: text(*content),
            room: ROOM.to_string(),
            username: if *from_self { LOCAL_USER.to_string() } else { user_name(0) },
            timestamp: SERVER_TIME,
        },
        _ => return None,
    };
    Some(frame)
}
