//! Session hub: the coordination point between local room state, the
//! fan-out backplane, and the durable log.
//!
//! Every local mutation follows the same shape: apply the delta to the
//! room registry (which broadcasts the derived client event), then
//! publish the same delta on the backplane for other processes. Remote
//! envelopes run the identical apply path, minus the publish, so all
//! processes converge on the same room view.

use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AdmittedConnection;
use crate::backplane::Backplane;
use crate::durable_log::LogProducer;
use crate::error::SessionResult;
use crate::events::{
    ConnectionId, Envelope, MemberProfile, RelayedMessage, RoomEvent, RoomFrame,
};
use crate::relay;
use crate::rooms::RoomRegistry;

/// Handle for one admitted connection. Distinct connections of the
/// same member carry distinct ids, which is what the relay uses to
/// skip only the sending socket.
#[derive(Debug, Clone)]
pub struct SessionConnection {
    pub id: ConnectionId,
    pub room_id: String,
    pub member: MemberProfile,
}

pub struct SessionHub {
    registry: RoomRegistry,
    backplane: Backplane,
    log: LogProducer,
    origin: Uuid,
}

impl SessionHub {
    pub fn new(registry: RoomRegistry, backplane: Backplane, log: LogProducer) -> Self {
        Self {
            registry,
            backplane,
            log,
            origin: Uuid::new_v4(),
        }
    }

    /// Register an admitted connection with its room. Subscribes
    /// before joining so the connection observes its own `userJoined`
    /// event and everything after it.
    pub async fn connect(
        &self,
        admitted: &AdmittedConnection,
    ) -> (SessionConnection, broadcast::Receiver<RoomFrame>) {
        let connection = SessionConnection {
            id: Uuid::new_v4(),
            room_id: admitted.room_id.clone(),
            member: admitted.member.clone(),
        };

        let frames = self.registry.subscribe(&connection.room_id).await;
        let online = self
            .registry
            .apply_join(&connection.room_id, &connection.member)
            .await;

        info!(
            room_id = %connection.room_id,
            member_id = %connection.member.id,
            online = online.len(),
            "connection joined room"
        );

        self.publish(
            &connection.room_id,
            vec![RoomEvent::Joined {
                member: connection.member.clone(),
            }],
        )
        .await;

        (connection, frames)
    }

    /// Tear down one connection: presence refcount, typing entry, and
    /// the derived `userLeft` / typing events all settle before this
    /// returns.
    pub async fn disconnect(&self, connection: &SessionConnection) {
        let snapshot = self
            .registry
            .apply_leave(&connection.room_id, &connection.member.id)
            .await;

        info!(
            room_id = %connection.room_id,
            member_id = %connection.member.id,
            went_offline = snapshot.went_offline,
            "connection left room"
        );

        // Every join delta was published, so every leave must be too:
        // remote refcounts stay symmetric, and only the final decrement
        // produces client events on either side.
        self.publish(
            &connection.room_id,
            vec![RoomEvent::Left {
                member_id: connection.member.id.clone(),
            }],
        )
        .await;
    }

    /// Re-broadcast a client-asserted join announcement. Presence is
    /// not touched; admission already established who is online.
    pub async fn announce_join(&self, connection: &SessionConnection, member: MemberProfile) {
        self.registry
            .apply_announce(&connection.room_id, &member)
            .await;
        self.publish(&connection.room_id, vec![RoomEvent::Announce { member }])
            .await;
    }

    pub async fn set_typing(&self, connection: &SessionConnection, is_typing: bool) {
        self.registry
            .apply_typing(&connection.room_id, &connection.member.id, is_typing)
            .await;
        self.publish(
            &connection.room_id,
            vec![RoomEvent::Typing {
                member_id: connection.member.id.clone(),
                is_typing,
            }],
        )
        .await;
    }

    /// Validate, relay, and enqueue one message. Relay happens first
    /// and never waits on the log; a failed enqueue is logged and the
    /// message still reaches connected peers.
    pub async fn send_message(
        &self,
        connection: &SessionConnection,
        body: String,
        attachment_url: Option<String>,
    ) -> SessionResult<RelayedMessage> {
        let message = relay::build_message(
            &connection.room_id,
            &connection.member,
            body,
            attachment_url,
        )?;

        self.registry
            .broadcast_message(&connection.room_id, message.clone(), Some(connection.id))
            .await;

        self.publish(
            &connection.room_id,
            vec![RoomEvent::Message {
                message: message.clone(),
            }],
        )
        .await;

        if let Err(error) = self.log.enqueue(&message).await {
            warn!(
                %error,
                public_id = %message.public_id,
                room_id = %message.room_id,
                "failed to enqueue message for persistence"
            );
        }

        Ok(message)
    }

    /// Apply an envelope received from the backplane. Envelopes
    /// carrying this hub's own origin were already applied locally
    /// before publishing and are skipped.
    pub async fn handle_remote(&self, envelope: Envelope) {
        if envelope.origin == self.origin {
            return;
        }

        for event in envelope.events {
            match event {
                RoomEvent::Joined { member } => {
                    self.registry.apply_join(&envelope.room_id, &member).await;
                }
                RoomEvent::Left { member_id } => {
                    self.registry.apply_leave(&envelope.room_id, &member_id).await;
                }
                RoomEvent::Announce { member } => {
                    self.registry
                        .apply_announce(&envelope.room_id, &member)
                        .await;
                }
                RoomEvent::Typing {
                    member_id,
                    is_typing,
                } => {
                    self.registry
                        .apply_typing(&envelope.room_id, &member_id, is_typing)
                        .await;
                }
                RoomEvent::Message { message } => {
                    // Remote messages fan out to every local
                    // subscriber; the sending connection lives on the
                    // origin process.
                    self.registry
                        .broadcast_message(&envelope.room_id, message, None)
                        .await;
                }
            }
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    async fn publish(&self, room_id: &str, events: Vec<RoomEvent>) {
        let envelope = Envelope {
            origin: self.origin,
            room_id: room_id.to_string(),
            events,
        };

        // Backplane loss degrades to single-process operation; local
        // connections keep working.
        if let Err(error) = self.backplane.publish(&envelope).await {
            warn!(%error, room_id, "backplane publish failed, delta not propagated");
        }
    }
}
