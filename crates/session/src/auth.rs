//! Connection admission.
//!
//! Every connection attempt is validated here, once, before any room
//! state is touched. Nothing sent after the handshake can re-bind the
//! room or member attached to the connection.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::timeout;
use tracing::debug;

use parley_database::{MemberRepository, RoomRepository};

use crate::error::{SessionError, SessionResult};
use crate::events::MemberProfile;

/// Handshake parameters supplied as query parameters on the WebSocket
/// upgrade request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub pass_code: Option<String>,
    #[serde(default)]
    pub member_id: Option<String>,
}

/// The validated context bound to a connection for its lifetime.
#[derive(Debug, Clone)]
pub struct AdmittedConnection {
    pub room_id: String,
    pub room_title: String,
    pub member: MemberProfile,
    pub admitted_at: String,
}

#[derive(Clone)]
pub struct Admission {
    rooms: RoomRepository,
    members: MemberRepository,
    lookup_timeout: Duration,
}

impl Admission {
    pub fn new(rooms: RoomRepository, members: MemberRepository, lookup_timeout: Duration) -> Self {
        Self {
            rooms,
            members,
            lookup_timeout,
        }
    }

    /// Validate a connection attempt. Directory lookups are bounded by
    /// the admission timeout; a slow store refuses the connection
    /// instead of hanging it.
    pub async fn admit(&self, params: &HandshakeParams) -> SessionResult<AdmittedConnection> {
        let (room_id, pass_code, member_id) = match (
            params.room.as_deref().filter(|v| !v.is_empty()),
            params.pass_code.as_deref().filter(|v| !v.is_empty()),
            params.member_id.as_deref().filter(|v| !v.is_empty()),
        ) {
            (Some(room), Some(pass_code), Some(member)) => (room, pass_code, member),
            _ => {
                return Err(SessionError::validation(
                    "room, passCode, and memberId are required",
                ))
            }
        };

        let room = timeout(self.lookup_timeout, self.rooms.find_by_id(room_id))
            .await
            .map_err(|_| SessionError::transient("room directory lookup timed out"))??
            .ok_or_else(|| SessionError::auth("invalid room or passCode"))?;

        // Passcodes are shared secrets compared verbatim.
        if room.passcode != pass_code {
            return Err(SessionError::auth("invalid room or passCode"));
        }

        let member = timeout(self.lookup_timeout, self.members.find_by_id(member_id))
            .await
            .map_err(|_| SessionError::transient("member lookup timed out"))??
            .ok_or_else(|| SessionError::auth("invalid member"))?;

        if member.room_id != room.id {
            return Err(SessionError::auth("invalid member"));
        }

        debug!(room_id = %room.id, member_id = %member.id, "connection admitted");

        Ok(AdmittedConnection {
            room_id: room.id,
            room_title: room.title,
            member: MemberProfile {
                id: member.id,
                name: member.name,
            },
            admitted_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}
