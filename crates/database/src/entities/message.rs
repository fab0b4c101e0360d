//! Message entity definitions.

use serde::{Deserialize, Serialize};

/// A durably stored chat message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub public_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub attachment_url: Option<String>,
    pub has_attachment: bool,
    pub created_at: String,
}

/// Insert payload for the durable log consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStoredMessage {
    pub public_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub attachment_url: Option<String>,
    pub has_attachment: bool,
    pub created_at: String,
}
