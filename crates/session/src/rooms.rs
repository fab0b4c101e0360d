//! Per-room presence and typing state.
//!
//! The registry holds one state cell per active room. The outer map is
//! only locked to look a cell up or drop an empty one; all presence and
//! typing mutation happens inside the cell's own lock, so rooms never
//! serialize against each other. Every mutation broadcasts the derived
//! client event on the room's channel while the cell lock is held,
//! which is what keeps presence and typing views consistent for every
//! local observer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::events::{ConnectionId, MemberProfile, RelayedMessage, RoomFrame, ServerEvent};

const DEFAULT_ROOM_CHANNEL_CAPACITY: usize = 256;

struct RoomState {
    /// Member id -> live connection count. A member is online while
    /// the count is positive; reconnect races therefore cannot toggle
    /// them offline early.
    online: HashMap<String, u32>,
    typing: HashSet<String>,
    broadcaster: broadcast::Sender<RoomFrame>,
}

impl RoomState {
    fn new(capacity: usize) -> Self {
        Self {
            online: HashMap::new(),
            typing: HashSet::new(),
            broadcaster: broadcast::channel(capacity).0,
        }
    }

    fn online_snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.online.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn typing_snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.typing.iter().cloned().collect();
        ids.sort();
        ids
    }

    fn is_empty(&self) -> bool {
        self.online.is_empty() && self.typing.is_empty()
    }

    fn send(&self, frame: RoomFrame) {
        // No receivers is fine: the room may only have subscribers on
        // other processes.
        let _ = self.broadcaster.send(frame);
    }
}

/// The result of a leave: both sets after the combined cleanup.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveSnapshot {
    pub online_member_ids: Vec<String>,
    pub typing_member_ids: Vec<String>,
    pub went_offline: bool,
}

pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Mutex<RoomState>>>>,
    channel_capacity: usize,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM_CHANNEL_CAPACITY)
    }
}

impl RoomRegistry {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            channel_capacity,
        }
    }

    async fn cell(&self, room_id: &str) -> Arc<Mutex<RoomState>> {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RoomState::new(self.channel_capacity))))
            .clone()
    }

    /// Drop the room entry if it emptied out. Locks are taken in
    /// map-then-cell order, same as everywhere else.
    async fn drop_if_empty(&self, room_id: &str) {
        let mut rooms = self.rooms.lock().await;
        if let Some(cell) = rooms.get(room_id) {
            if cell.lock().await.is_empty() {
                rooms.remove(room_id);
                debug!(room_id, "room emptied, dropping state cell");
            }
        }
    }

    /// Subscribe to a room's broadcast channel.
    pub async fn subscribe(&self, room_id: &str) -> broadcast::Receiver<RoomFrame> {
        let cell = self.cell(room_id).await;
        let state = cell.lock().await;
        state.broadcaster.subscribe()
    }

    /// Record one more live connection for `member` and broadcast the
    /// updated online set. Idempotent from the member's point of view:
    /// a second connection does not duplicate the presence entry.
    pub async fn apply_join(&self, room_id: &str, member: &MemberProfile) -> Vec<String> {
        let cell = self.cell(room_id).await;
        let mut state = cell.lock().await;

        let count = state.online.entry(member.id.clone()).or_insert(0);
        *count += 1;

        let online = state.online_snapshot();
        state.send(RoomFrame::to_all(ServerEvent::UserJoined {
            online_member_ids: online.clone(),
            new_member: member.clone(),
        }));
        online
    }

    /// Broadcast the current online set with the announced profile,
    /// without touching presence. Join announcements are
    /// client-asserted; the registry stays authoritative on membership.
    pub async fn apply_announce(&self, room_id: &str, member: &MemberProfile) -> Vec<String> {
        let cell = self.cell(room_id).await;
        let state = cell.lock().await;

        let online = state.online_snapshot();
        state.send(RoomFrame::to_all(ServerEvent::UserJoined {
            online_member_ids: online.clone(),
            new_member: member.clone(),
        }));
        online
    }

    /// Combined disconnect cleanup: drop one connection reference and
    /// the member's typing entry in a single critical section, then
    /// broadcast `userLeft` followed by the typing update back to back
    /// under the same lock. Observers can never see the member offline
    /// but still typing.
    pub async fn apply_leave(&self, room_id: &str, member_id: &str) -> LeaveSnapshot {
        let cell = self.cell(room_id).await;
        let snapshot = {
            let mut state = cell.lock().await;

            let went_offline = match state.online.get_mut(member_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    state.online.remove(member_id);
                    true
                }
                None => {
                    // Leave without a matching join: out-of-order
                    // disconnect or a stray backplane delta. No-op.
                    let error = SessionError::consistency(format!(
                        "leave for member {member_id} not marked present in room {room_id}"
                    ));
                    warn!(%error, "ignoring unmatched leave");
                    false
                }
            };

            if went_offline {
                state.typing.remove(member_id);
            }

            let online = state.online_snapshot();
            let typing = state.typing_snapshot();

            if went_offline {
                state.send(RoomFrame::to_all(ServerEvent::UserLeft {
                    online_member_ids: online.clone(),
                    member_id: member_id.to_string(),
                }));
                state.send(RoomFrame::to_all(ServerEvent::Typing {
                    member_id: member_id.to_string(),
                    is_typing: false,
                    typing_member_ids: typing.clone(),
                }));
            }

            LeaveSnapshot {
                online_member_ids: online,
                typing_member_ids: typing,
                went_offline,
            }
        };

        self.drop_if_empty(room_id).await;
        snapshot
    }

    /// Update the typing set and always broadcast the result, even when
    /// nothing changed: repeated typing signals reset client debounce
    /// timers.
    pub async fn apply_typing(
        &self,
        room_id: &str,
        member_id: &str,
        is_typing: bool,
    ) -> Vec<String> {
        let cell = self.cell(room_id).await;
        let typing = {
            let mut state = cell.lock().await;

            if is_typing {
                state.typing.insert(member_id.to_string());
            } else {
                state.typing.remove(member_id);
            }

            let typing = state.typing_snapshot();
            state.send(RoomFrame::to_all(ServerEvent::Typing {
                member_id: member_id.to_string(),
                is_typing,
                typing_member_ids: typing.clone(),
            }));
            typing
        };

        if !is_typing {
            self.drop_if_empty(room_id).await;
        }
        typing
    }

    /// Relay a message to the room's local subscribers. Sending under
    /// the cell lock keeps messages ordered with presence and typing
    /// events.
    pub async fn broadcast_message(
        &self,
        room_id: &str,
        message: RelayedMessage,
        exclude: Option<ConnectionId>,
    ) {
        let cell = self.cell(room_id).await;
        let state = cell.lock().await;
        let frame = match exclude {
            Some(connection) => RoomFrame::excluding(connection, ServerEvent::Message(message)),
            None => RoomFrame::to_all(ServerEvent::Message(message)),
        };
        state.send(frame);
    }

    /// Current `(online, typing)` snapshots. An absent room yields two
    /// empty sets.
    pub async fn snapshot(&self, room_id: &str) -> (Vec<String>, Vec<String>) {
        let cell = {
            let rooms = self.rooms.lock().await;
            rooms.get(room_id).cloned()
        };
        match cell {
            Some(cell) => {
                let state = cell.lock().await;
                (state.online_snapshot(), state.typing_snapshot())
            }
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Number of rooms with live state. Emptied rooms are dropped, not
    /// kept as placeholders.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }
}
