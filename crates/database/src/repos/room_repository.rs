//! Repository for room directory lookups.

use crate::entities::Room;
use crate::error::StoreResult;
use sqlx::{Row, SqlitePool};
use tracing::info;

/// Read side of the room directory. Creation exists for seeding and
/// tests; the CRUD layer owns room lifecycle in production.
#[derive(Clone)]
pub struct RoomRepository {
    pool: SqlitePool,
}

impl RoomRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find a room by its identifier.
    pub async fn find_by_id(&self, id: &str) -> StoreResult<Option<Room>> {
        let row = sqlx::query(
            "SELECT id, title, passcode, created_at FROM rooms WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Room {
            id: row.get("id"),
            title: row.get("title"),
            passcode: row.get("passcode"),
            created_at: row.get("created_at"),
        }))
    }

    /// Create a room with a minted identifier.
    pub async fn create(&self, title: &str, passcode: &str) -> StoreResult<Room> {
        let id = cuid2::create_id();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO rooms (id, title, passcode, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(title)
            .bind(passcode)
            .bind(&now)
            .execute(&self.pool)
            .await?;

        info!(room_id = %id, "created room");

        Ok(Room {
            id,
            title: title.to_string(),
            passcode: passcode.to_string(),
            created_at: now,
        })
    }
}
