//! Client-side view of a room.
//!
//! `RoomState` is a plain state machine over inbound frames and local
//! commands. Every mutation returns the [`SessionEvent`]s it produced; the
//! session decides where they go.

use chrono::{DateTime, Utc};
use collab_proto::Frame;

use crate::event::SessionEvent;

/// Membership in the desired room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Membership {
    /// No room requested.
    Idle,
    /// `join_room` sent, waiting for `room_joined`.
    Joining,
    /// Server confirmed the join.
    Joined,
}

/// Ordered set of usernames present in the room.
///
/// Mutated only by server frames. Insertion order is kept; a full
/// `user_list` replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    users: Vec<String>,
}

impl Roster {
    /// Replace the roster. Returns true if it changed.
    pub fn replace(&mut self, users: &[String]) -> bool {
        let mut next: Vec<String> = Vec::with_capacity(users.len());
        for user in users {
            if !next.contains(user) {
                next.push(user.clone());
            }
        }
        if next == self.users {
            return false;
        }
        self.users = next;
        true
    }

    /// Add `user`. Returns false if already present.
    pub fn insert(&mut self, user: &str) -> bool {
        if self.contains(user) {
            return false;
        }
        self.users.push(user.to_string());
        true
    }

    /// Remove `user`. Returns false if absent.
    pub fn remove(&mut self, user: &str) -> bool {
        let before = self.users.len();
        self.users.retain(|u| u != user);
        before != self.users.len()
    }

    /// Whether `user` is present.
    pub fn contains(&self, user: &str) -> bool {
        self.users.iter().any(|u| u == user)
    }

    /// Drop everyone. Returns true if anyone was present.
    pub fn clear(&mut self) -> bool {
        let changed = !self.users.is_empty();
        self.users.clear();
        changed
    }

    /// Usernames in roster order.
    pub fn users(&self) -> &[String] {
        &self.users
    }

    /// Number of users present.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Whether a transcript entry has been seen from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    /// Shown locally, not yet echoed by the server.
    Provisional,
    /// Delivered by the server.
    Confirmed,
}

/// One line of chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Author.
    pub username: String,
    /// Message body.
    pub content: String,
    /// Send time. Local clock for provisional entries, server-stamped once
    /// confirmed.
    pub timestamp: DateTime<Utc>,
    /// Provisional or confirmed.
    pub status: EntryStatus,
}

/// Room the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Desired {
    room: String,
    username: String,
}

/// Everything the client knows about its room.
#[derive(Debug, Clone)]
pub struct RoomState {
    desired: Option<Desired>,
    membership: Membership,
    roster: Roster,
    code: String,
    transcript: Vec<ChatEntry>,
}

impl Default for RoomState {
    fn default() -> Self {
        Self {
            desired: None,
            membership: Membership::Idle,
            roster: Roster::default(),
            code: String::new(),
            transcript: Vec::new(),
        }
    }
}

impl RoomState {
    /// Empty, idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Room requested by the last `join`.
    pub fn room(&self) -> Option<&str> {
        self.desired.as_ref().map(|d| d.room.as_str())
    }

    /// Local username from the last `join`.
    pub fn username(&self) -> Option<&str> {
        self.desired.as_ref().map(|d| d.username.as_str())
    }

    /// Current membership.
    pub fn membership(&self) -> Membership {
        self.membership
    }

    /// Presence roster.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Shared code buffer.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Chat transcript, oldest first.
    pub fn transcript(&self) -> &[ChatEntry] {
        &self.transcript
    }

    /// Record the desired room and start joining.
    pub fn begin_join(&mut self, room: &str, username: &str) -> Vec<SessionEvent> {
        self.desired = Some(Desired { room: room.to_string(), username: username.to_string() });
        self.set_membership(Membership::Joining).into_iter().collect()
    }

    /// Forget the room: roster and code are cleared and membership goes idle.
    pub fn leave(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.desired = None;
        events.extend(self.set_membership(Membership::Idle));
        if self.roster.clear() {
            events.push(SessionEvent::RosterChanged(Vec::new()));
        }
        if !self.code.is_empty() {
            self.code.clear();
            events.push(SessionEvent::CodeChanged(String::new()));
        }
        events
    }

    /// Drop everything, including the transcript.
    pub fn reset(&mut self) -> Vec<SessionEvent> {
        let events = self.leave();
        self.transcript.clear();
        events
    }

    /// Channel dropped while a room is desired: the join must be repeated.
    /// Returns `None` if there is nothing to rejoin.
    pub fn begin_rejoin(&mut self) -> Option<(Frame, Vec<SessionEvent>)> {
        let desired = self.desired.clone()?;
        let events = self.set_membership(Membership::Joining).into_iter().collect();
        let frame = Frame::JoinRoom { room: desired.room, username: desired.username };
        Some((frame, events))
    }

    /// The connection ended for good: membership goes idle and the roster is
    /// dropped. The desired room is kept so the next `connect` can resume it.
    pub fn abandon(&mut self) -> Vec<SessionEvent> {
        let mut events: Vec<_> = self.set_membership(Membership::Idle).into_iter().collect();
        if self.roster.clear() {
            events.push(SessionEvent::RosterChanged(Vec::new()));
        }
        events
    }

    /// Whether a room is still desired after the session was abandoned.
    pub fn is_abandoned(&self) -> bool {
        self.membership == Membership::Idle && self.desired.is_some()
    }

    /// Show an outgoing chat line before the server echoes it.
    pub fn record_provisional(
        &mut self,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Vec<SessionEvent> {
        let Some(username) = self.username() else {
            return Vec::new();
        };
        let entry = ChatEntry {
            username: username.to_string(),
            content: content.to_string(),
            timestamp,
            status: EntryStatus::Provisional,
        };
        self.transcript.push(entry.clone());
        vec![SessionEvent::ChatMessage(entry)]
    }

    /// Replace the code buffer with a local edit.
    pub fn set_local_code(&mut self, code: &str) -> Vec<SessionEvent> {
        if self.code == code {
            return Vec::new();
        }
        self.code = code.to_string();
        vec![SessionEvent::CodeChanged(self.code.clone())]
    }

    /// Apply an inbound frame.
    ///
    /// Room-scoped frames are ignored while no room is desired, and frames
    /// naming a different room are ignored always.
    pub fn apply(&mut self, frame: &Frame) -> Vec<SessionEvent> {
        let Some(desired) = self.desired.as_ref() else {
            tracing::debug!(event_type = frame.event_type(), "no room desired, ignoring frame");
            return Vec::new();
        };
        if frame.room().is_some_and(|room| room != desired.room) {
            tracing::debug!(event_type = frame.event_type(), "frame for another room");
            return Vec::new();
        }

        match frame {
            Frame::RoomJoined {} => match self.membership {
                Membership::Joining => {
                    self.set_membership(Membership::Joined).into_iter().collect()
                },
                Membership::Joined => Vec::new(),
                Membership::Idle => {
                    tracing::debug!("room_joined while idle");
                    Vec::new()
                },
            },
            Frame::UserList { users } => {
                if self.roster.replace(users) {
                    vec![self.roster_changed()]
                } else {
                    Vec::new()
                }
            },
            Frame::UserJoined { username } => {
                if self.roster.insert(username) {
                    vec![self.roster_changed()]
                } else {
                    Vec::new()
                }
            },
            Frame::UserLeft { username } => {
                if self.roster.remove(username) {
                    vec![self.roster_changed()]
                } else {
                    Vec::new()
                }
            },
            Frame::CodeUpdate { code, .. } => {
                self.code.clone_from(code);
                vec![SessionEvent::CodeChanged(code.clone())]
            },
            Frame::ChatMessage { content, username, timestamp, .. } => {
                vec![SessionEvent::ChatMessage(self.confirm_chat(username, content, *timestamp))]
            },
            Frame::JoinRoom { .. } | Frame::LeaveRoom { .. } | Frame::Unknown(_) => Vec::new(),
        }
    }

    fn confirm_chat(
        &mut self,
        username: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> ChatEntry {
        let confirmed = ChatEntry {
            username: username.to_string(),
            content: content.to_string(),
            timestamp,
            status: EntryStatus::Confirmed,
        };

        let provisional = (self.username() == Some(username))
            .then(|| {
                self.transcript.iter().position(|entry| {
                    entry.status == EntryStatus::Provisional && entry.content == content
                })
            })
            .flatten();

        match provisional {
            Some(index) => self.transcript[index] = confirmed.clone(),
            None => self.transcript.push(confirmed.clone()),
        }
        confirmed
    }

    fn roster_changed(&self) -> SessionEvent {
        SessionEvent::RosterChanged(self.roster.users().to_vec())
    }

    fn set_membership(&mut self, next: Membership) -> Option<SessionEvent> {
        if self.membership == next {
            return None;
        }
        tracing::debug!(from = ?self.membership, to = ?next, "membership");
        self.membership = next;
        Some(SessionEvent::MembershipChanged(next))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    fn joined_state() -> RoomState {
        let mut state = RoomState::new();
        state.begin_join("demo", "ada");
        state.apply(&Frame::RoomJoined {});
        state
    }

    #[test]
    fn room_joined_flips_joining_once() {
        let mut state = RoomState::new();
        assert_eq!(
            state.begin_join("demo", "ada"),
            vec![SessionEvent::MembershipChanged(Membership::Joining)]
        );
        assert_eq!(
            state.apply(&Frame::RoomJoined {}),
            vec![SessionEvent::MembershipChanged(Membership::Joined)]
        );
        assert!(state.apply(&Frame::RoomJoined {}).is_empty());
        assert_eq!(state.membership(), Membership::Joined);
    }

    #[test]
    fn room_joined_while_idle_is_ignored() {
        let mut state = RoomState::new();
        assert!(state.apply(&Frame::RoomJoined {}).is_empty());
        assert_eq!(state.membership(), Membership::Idle);
    }

    #[test]
    fn roster_follows_server_frames() {
        let mut state = joined_state();
        state.apply(&Frame::UserList { users: vec!["ada".to_string(), "bob".to_string()] });
        state.apply(&Frame::UserJoined { username: "eve".to_string() });
        state.apply(&Frame::UserLeft { username: "bob".to_string() });
        assert_eq!(state.roster().users(), ["ada", "eve"]);

        assert!(state.apply(&Frame::UserJoined { username: "eve".to_string() }).is_empty());
        assert!(state.apply(&Frame::UserLeft { username: "zed".to_string() }).is_empty());
    }

    #[test]
    fn code_update_replaces_buffer() {
        let mut state = joined_state();
        state.set_local_code("A");
        let events = state.apply(&Frame::CodeUpdate {
            room: "demo".to_string(),
            code: "B".to_string(),
            username: "bob".to_string(),
        });
        assert_eq!(state.code(), "B");
        assert_eq!(events, vec![SessionEvent::CodeChanged("B".to_string())]);
    }

    #[test]
    fn frames_for_other_rooms_are_ignored() {
        let mut state = joined_state();
        let events = state.apply(&Frame::CodeUpdate {
            room: "elsewhere".to_string(),
            code: "X".to_string(),
            username: "bob".to_string(),
        });
        assert!(events.is_empty());
        assert_eq!(state.code(), "");
    }

    #[test]
    fn echo_confirms_oldest_matching_provisional() {
        let mut state = joined_state();
        state.record_provisional("hi", at(1));
        state.record_provisional("hi", at(2));

        state.apply(&Frame::ChatMessage {
            content: "hi".to_string(),
            room: "demo".to_string(),
            username: "ada".to_string(),
            timestamp: at(10),
        });

        let transcript = state.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].status, EntryStatus::Confirmed);
        assert_eq!(transcript[0].timestamp, at(10));
        assert_eq!(transcript[1].status, EntryStatus::Provisional);
    }

    #[test]
    fn other_authors_append() {
        let mut state = joined_state();
        state.record_provisional("hi", at(1));
        state.apply(&Frame::ChatMessage {
            content: "hi".to_string(),
            room: "demo".to_string(),
            username: "bob".to_string(),
            timestamp: at(3),
        });

        let transcript = state.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].status, EntryStatus::Provisional);
        assert_eq!(transcript[1].username, "bob");
    }

    #[test]
    fn leave_clears_roster_and_code() {
        let mut state = joined_state();
        state.apply(&Frame::UserJoined { username: "bob".to_string() });
        state.set_local_code("fn main() {}");

        let events = state.leave();
        assert_eq!(state.membership(), Membership::Idle);
        assert!(state.roster().is_empty());
        assert_eq!(state.code(), "");
        assert_eq!(
            events,
            vec![
                SessionEvent::MembershipChanged(Membership::Idle),
                SessionEvent::RosterChanged(Vec::new()),
                SessionEvent::CodeChanged(String::new()),
            ]
        );
    }

    #[test]
    fn rejoin_requires_desired_room() {
        let mut state = RoomState::new();
        assert!(state.begin_rejoin().is_none());

        let mut state = joined_state();
        let (frame, events) = state.begin_rejoin().unwrap_or((Frame::RoomJoined {}, Vec::new()));
        assert_eq!(
            frame,
            Frame::JoinRoom { room: "demo".to_string(), username: "ada".to_string() }
        );
        assert_eq!(events, vec![SessionEvent::MembershipChanged(Membership::Joining)]);
    }

    #[test]
    fn abandon_keeps_room_for_resume() {
        let mut state = joined_state();
        state.apply(&Frame::UserJoined { username: "bob".to_string() });

        let events = state.abandon();
        assert_eq!(
            events,
            vec![
                SessionEvent::MembershipChanged(Membership::Idle),
                SessionEvent::RosterChanged(Vec::new()),
            ]
        );
        assert!(state.is_abandoned());
        assert_eq!(state.room(), Some("demo"));

        state.leave();
        assert!(!state.is_abandoned());
    }

    #[derive(Debug, Clone)]
    enum RosterOp {
        Replace(Vec<u8>),
        Insert(u8),
        Remove(u8),
    }

    fn name(n: u8) -> String {
        format!("user{n}")
    }

    fn roster_op() -> impl Strategy<Value = RosterOp> {
        prop_oneof![
            prop::collection::vec(0..6u8, 0..8).prop_map(RosterOp::Replace),
            (0..6u8).prop_map(RosterOp::Insert),
            (0..6u8).prop_map(RosterOp::Remove),
        ]
    }

    proptest! {
        #[test]
        fn roster_never_holds_duplicates(ops in prop::collection::vec(roster_op(), 0..40)) {
            let mut roster = Roster::default();
            for op in ops {
                match op {
                    RosterOp::Replace(users) => {
                        let names: Vec<String> = users.into_iter().map(name).collect();
                        roster.replace(&names);
                    },
                    RosterOp::Insert(user) => {
                        roster.insert(&name(user));
                    },
                    RosterOp::Remove(user) => {
                        roster.remove(&name(user));
                        prop_assert!(!roster.contains(&name(user)));
                    },
                }

                let users = roster.users();
                for (i, user) in users.iter().enumerate() {
                    prop_assert!(!users[i + 1..].contains(user), "duplicate {}", user);
                }
            }
        }

        #[test]
        fn replace_keeps_first_occurrence_order(users in prop::collection::vec(0..6u8, 0..12)) {
            let names: Vec<String> = users.into_iter().map(name).collect();
            let mut expected: Vec<String> = Vec::new();
            for user in &names {
                if !expected.contains(user) {
                    expected.push(user.clone());
                }
            }

            let mut roster = Roster::default();
            roster.replace(&names);
            prop_assert_eq!(roster.users(), expected.as_slice());
        }
    }
}
