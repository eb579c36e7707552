//! Room frames and their JSON codec.
//!
//! A frame is a JSON object tagged by `event_type`. The set of tags is open:
//! anything the client does not recognize decodes to [`Frame::Unknown`] with
//! its raw fields preserved, so new server events never require a transport
//! change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;

/// Name of the discriminant field.
pub const EVENT_TYPE_FIELD: &str = "event_type";

/// Largest text payload accepted by [`Frame::decode`].
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// A single room event.
///
/// # Invariants
///
/// - `UserList::users` never contains duplicates; decoding keeps the first
///   occurrence of each name.
/// - `Unknown` is produced only for tags not covered by [`EventType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Frame {
    /// Ask the server to add `username` to `room`.
    JoinRoom {
        /// Room identifier.
        room: String,
        /// Joining user.
        username: String,
    },

    /// Ask the server to remove `username` from `room`.
    LeaveRoom {
        /// Room identifier.
        room: String,
        /// Leaving user.
        username: String,
    },

    /// Chat line.
    ChatMessage {
        /// Message body.
        content: String,
        /// Room identifier.
        room: String,
        /// Author.
        username: String,
        /// When the author sent it.
        #[serde(with = "timestamp")]
        timestamp: DateTime<Utc>,
    },

    /// Full replacement of the shared code buffer.
    CodeUpdate {
        /// Room identifier.
        room: String,
        /// Entire buffer contents.
        code: String,
        /// Author of this revision.
        username: String,
    },

    /// Server acknowledgement that the join completed.
    RoomJoined {},

    /// Authoritative roster.
    UserList {
        /// Present usernames, in server order.
        #[serde(deserialize_with = "dedup_users")]
        users: Vec<String>,
    },

    /// Someone entered the room.
    UserJoined {
        /// Username that joined.
        username: String,
    },

    /// Someone left the room.
    UserLeft {
        /// Username that left.
        username: String,
    },

    /// Frame with an unrecognized tag.
    #[serde(skip)]
    Unknown(UnknownFrame),
}

/// Frame whose tag this client does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFrame {
    /// The unrecognized `event_type` value.
    pub event_type: String,
    /// Remaining fields, without the discriminant.
    pub fields: Map<String, Value>,
}

/// Known frame discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// `join_room`
    JoinRoom,
    /// `leave_room`
    LeaveRoom,
    /// `chat_message`
    ChatMessage,
    /// `code_update`
    CodeUpdate,
    /// `room_joined`
    RoomJoined,
    /// `user_list`
    UserList,
    /// `user_joined`
    UserJoined,
    /// `user_left`
    UserLeft,
}

impl EventType {
    /// All known discriminants.
    pub const ALL: [Self; 8] = [
        Self::JoinRoom,
        Self::LeaveRoom,
        Self::ChatMessage,
        Self::CodeUpdate,
        Self::RoomJoined,
        Self::UserList,
        Self::UserJoined,
        Self::UserLeft,
    ];

    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinRoom => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::ChatMessage => "chat_message",
            Self::CodeUpdate => "code_update",
            Self::RoomJoined => "room_joined",
            Self::UserList => "user_list",
            Self::UserJoined => "user_joined",
            Self::UserLeft => "user_left",
        }
    }

    /// Parse a wire tag. `None` for tags outside the known set.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Frame {
    /// Known discriminant, or `None` for [`Frame::Unknown`].
    pub fn kind(&self) -> Option<EventType> {
        Some(match self {
            Self::JoinRoom { .. } => EventType::JoinRoom,
            Self::LeaveRoom { .. } => EventType::LeaveRoom,
            Self::ChatMessage { .. } => EventType::ChatMessage,
            Self::CodeUpdate { .. } => EventType::CodeUpdate,
            Self::RoomJoined {} => EventType::RoomJoined,
            Self::UserList { .. } => EventType::UserList,
            Self::UserJoined { .. } => EventType::UserJoined,
            Self::UserLeft { .. } => EventType::UserLeft,
            Self::Unknown(_) => return None,
        })
    }

    /// Wire tag of this frame, known or not.
    pub fn event_type(&self) -> &str {
        match self {
            Self::Unknown(unknown) => &unknown.event_type,
            other => other.kind().map_or("", EventType::as_str),
        }
    }

    /// Room named by the frame, if the variant carries one.
    pub fn room(&self) -> Option<&str> {
        match self {
            Self::JoinRoom { room, .. }
            | Self::LeaveRoom { room, .. }
            | Self::ChatMessage { room, .. }
            | Self::CodeUpdate { room, .. } => Some(room),
            _ => None,
        }
    }

    /// Decode a text payload.
    ///
    /// # Errors
    ///
    /// - `TooLarge` if the payload exceeds [`MAX_FRAME_LEN`]
    /// - `Malformed` / `NotAnObject` if it is not a JSON object
    /// - `MissingDiscriminant` if `event_type` is absent or not a string
    /// - `InvalidFields` if a known variant's fields do not match
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::TooLarge { size: text.len(), max: MAX_FRAME_LEN });
        }

        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::Malformed { reason: e.to_string() })?;

        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let tag = match fields.get(EVENT_TYPE_FIELD) {
            Some(Value::String(tag)) => tag.clone(),
            _ => return Err(ProtocolError::MissingDiscriminant),
        };

        if EventType::from_tag(&tag).is_none() {
            fields.remove(EVENT_TYPE_FIELD);
            return Ok(Self::Unknown(UnknownFrame { event_type: tag, fields }));
        }

        serde_json::from_value(Value::Object(fields))
            .map_err(|e| ProtocolError::InvalidFields { event_type: tag, reason: e.to_string() })
    }

    /// Encode to a JSON text payload.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let result = match self {
            Self::Unknown(unknown) => {
                let mut fields = Map::with_capacity(unknown.fields.len() + 1);
                let tag = Value::String(unknown.event_type.clone());
                fields.insert(EVENT_TYPE_FIELD.to_string(), tag);
                for (key, value) in &unknown.fields {
                    if key != EVENT_TYPE_FIELD {
                        fields.insert(key.clone(), value.clone());
                    }
                }
                serde_json::to_string(&Value::Object(fields))
            },
            known => serde_json::to_string(known),
        };

        result.map_err(|e| ProtocolError::Encode { reason: e.to_string() })
    }
}

fn dedup_users<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let users = Vec::<String>::deserialize(deserializer)?;
    let mut seen = std::collections::HashSet::with_capacity(users.len());
    Ok(users.into_iter().filter(|u| seen.insert(u.clone())).collect())
}

/// RFC 3339 on the way out; on the way in, RFC 3339 or a naive ISO 8601
/// timestamp, which the room server emits in UTC without an offset.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;

        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }

        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| D::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
    }
}
