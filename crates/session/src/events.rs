//! Wire types for client frames, room broadcasts, and backplane deltas.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection identifier, assigned at admission. Scoped to one
/// transport session and never persisted.
pub type ConnectionId = Uuid;

/// The member identity attached to presence events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub id: String,
    pub name: String,
}

/// A message after validation and attachment normalization: the shape
/// relayed to other connections AND produced to the durable log (the
/// log contract is this event plus the room identifier, which it
/// carries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedMessage {
    pub public_id: String,
    pub room_id: String,
    pub sender: String,
    pub sender_name: String,
    pub body: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    pub has_attachment: bool,
}

/// Inbound client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Message {
        #[serde(default)]
        body: String,
        #[serde(default)]
        attachment_url: Option<String>,
    },
    Typing {
        is_typing: bool,
    },
    JoinAnnounce {
        member: MemberProfile,
    },
}

/// Outbound events to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Message(RelayedMessage),
    UserJoined {
        online_member_ids: Vec<String>,
        new_member: MemberProfile,
    },
    UserLeft {
        online_member_ids: Vec<String>,
        member_id: String,
    },
    Typing {
        member_id: String,
        is_typing: bool,
        typing_member_ids: Vec<String>,
    },
    Error {
        description: String,
    },
}

impl ServerEvent {
    /// Event type name for logging.
    pub fn event_type_name(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => "message",
            ServerEvent::UserJoined { .. } => "userJoined",
            ServerEvent::UserLeft { .. } => "userLeft",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// One frame on a room's local broadcast channel. `exclude` lets the
/// relay skip the sending connection without a second channel.
#[derive(Debug, Clone)]
pub struct RoomFrame {
    pub exclude: Option<ConnectionId>,
    pub event: ServerEvent,
}

impl RoomFrame {
    pub fn to_all(event: ServerEvent) -> Self {
        Self {
            exclude: None,
            event,
        }
    }

    pub fn excluding(connection: ConnectionId, event: ServerEvent) -> Self {
        Self {
            exclude: Some(connection),
            event,
        }
    }
}

/// Room state deltas exchanged between server processes. Receivers
/// apply each delta to their own room cells and re-derive the
/// client-facing snapshots locally, so every process converges on the
/// same presence and typing view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum RoomEvent {
    Joined { member: MemberProfile },
    Left { member_id: String },
    Announce { member: MemberProfile },
    Typing { member_id: String, is_typing: bool },
    Message { message: RelayedMessage },
}

/// Backplane envelope. Events from one origin for one room are applied
/// in publish order; a process skips envelopes carrying its own origin
/// because it already applied them before publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: Uuid,
    pub room_id: String,
    pub events: Vec<RoomEvent>,
}
