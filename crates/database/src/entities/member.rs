//! Member entity definitions.

use serde::{Deserialize, Serialize};

/// A participant registered into a room by the external CRUD layer.
/// Read-only reference data as far as the session engine is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub room_id: String,
    pub name: String,
    pub created_at: String,
}
