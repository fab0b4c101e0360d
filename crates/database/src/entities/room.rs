//! Room entity definitions.

use serde::{Deserialize, Serialize};

/// A passcode-gated chat room. Rooms are created and managed by the
/// external CRUD layer; the session engine only reads them to validate
/// connection attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub title: String,
    pub passcode: String,
    pub created_at: String,
}
