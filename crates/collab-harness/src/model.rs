//! Reference model of one room as seen by one client.
//!
//! No transport and no timing: every operation takes effect at once. The
//! model is the reference the real [`RoomSession`](collab_client::RoomSession)
//! is compared against.

use arbitrary::Arbitrary;
use collab_client::{EntryStatus, Membership};

/// Local username used by the model and the real world alike.
pub const LOCAL_USER: &str = "me";

/// Room used by the model and the real world alike.
pub const ROOM: &str = "demo";

/// Operations that can be applied to the system.
///
/// Payloads are small integers mapped onto a handful of strings, so
/// generated sequences hit collisions (duplicate users, repeated chat
/// lines) often.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// User joins the room.
    Join,
    /// User leaves the room.
    Leave,
    /// User sends a chat line.
    LocalChat {
        /// Content selector.
        content: u8,
    },
    /// User edits the code buffer.
    LocalCode {
        /// Content selector.
        content: u8,
    },
    /// Server confirms the join.
    ServerRoomJoined,
    /// Server sends the full roster.
    ServerUserList {
        /// User selectors, duplicates allowed.
        users: Vec<u8>,
    },
    /// Server announces an arrival.
    ServerUserJoined {
        /// User selector.
        user: u8,
    },
    /// Server announces a departure.
    ServerUserLeft {
        /// User selector.
        user: u8,
    },
    /// Server broadcasts a code buffer.
    ServerCode {
        /// Content selector.
        content: u8,
    },
    /// Server broadcasts a chat line.
    ServerChat {
        /// Whether the line is authored by the local user.
        from_self: bool,
        /// Content selector.
        content: u8,
    },
    /// Channel drops abnormally and comes back after the backoff delay.
    DropAndRecover,
}

/// Username for selector `n`.
pub fn user_name(n: u8) -> String {
    format!("user{}", n % 4)
}

/// Text for selector `n`.
pub fn text(n: u8) -> String {
    format!("text{}", n % 4)
}

/// Outcome of a local command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    /// Accepted.
    Ok,
    /// Rejected because no room is selected.
    NotInRoom,
}

/// State visible to a UI, compared between model and real session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableRoom {
    /// Membership.
    pub membership: Membership,
    /// Roster in order.
    pub roster: Vec<String>,
    /// Code buffer.
    pub code: String,
    /// Transcript as `(author, content, status)`.
    pub transcript: Vec<(String, String, EntryStatus)>,
}

/// Reference room.
#[derive(Debug, Clone)]
pub struct ModelRoom {
    in_room: bool,
    membership: Membership,
    roster: Vec<String>,
    code: String,
    transcript: Vec<(String, String, EntryStatus)>,
}

impl Default for ModelRoom {
    fn default() -> Self {
        Self {
            in_room: false,
            membership: Membership::Idle,
            roster: Vec::new(),
            code: String::new(),
            transcript: Vec::new(),
        }
    }
}

impl ModelRoom {
    /// Fresh model: not in a room.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `op`. Local commands report whether they were accepted.
    pub fn apply(&mut self, op: &Operation) -> CommandResult {
        match op {
            Operation::Join => {
                self.in_room = true;
                self.membership = Membership::Joining;
            },
            Operation::Leave => {
                self.in_room = false;
                self.membership = Membership::Idle;
                self.roster.clear();
                self.code.clear();
            },
            Operation::LocalChat { content } => {
                if !self.in_room {
                    return CommandResult::NotInRoom;
                }
                let entry = (LOCAL_USER.to_string(), text(*content), EntryStatus::Provisional);
                self.transcript.push(entry);
            },
            Operation::LocalCode { content } => {
                if !self.in_room {
                    return CommandResult::NotInRoom;
                }
                self.code = text(*content);
            },
            Operation::DropAndRecover => {
                if self.in_room {
                    self.membership = Membership::Joining;
                }
            },
            server if self.in_room => self.apply_server(server),
            _ => {},
        }
        CommandResult::Ok
    }

    fn apply_server(&mut self, op: &Operation) {
        match op {
            Operation::ServerRoomJoined => {
                if self.membership == Membership::Joining {
                    self.membership = Membership::Joined;
                }
            },
            Operation::ServerUserList { users } => {
                self.roster.clear();
                for user in users.iter().map(|u| user_name(*u)) {
                    if !self.roster.contains(&user) {
                        self.roster.push(user);
                    }
                }
            },
            Operation::ServerUserJoined { user } => {
                let user = user_name(*user);
                if !self.roster.contains(&user) {
                    self.roster.push(user);
                }
            },
            Operation::ServerUserLeft { user } => {
                let user = user_name(*user);
                self.roster.retain(|u| *u != user);
            },
            Operation::ServerCode { content } => self.code = text(*content),
            Operation::ServerChat { from_self, content } => {
                let author = if *from_self { LOCAL_USER.to_string() } else { user_name(0) };
                let content = text(*content);
                let provisional = self.transcript.iter().position(|(a, c, s)| {
                    *from_self && *s == EntryStatus::Provisional && *a == author && *c == content
                });
                let entry = (author, content, EntryStatus::Confirmed);
                match provisional {
                    Some(index) => self.transcript[index] = entry,
                    None => self.transcript.push(entry),
                }
            },
            _ => {},
        }
    }

    /// Observable state.
    pub fn observable(&self) -> ObservableRoom {
        ObservableRoom {
            membership: self.membership,
            roster: self.roster.clone(),
            code: self.code.clone(),
            transcript: self.transcript.clone(),
        }
    }
}
