//! Repository for the durable message store.

use crate::entities::{NewStoredMessage, StoredMessage};
use crate::error::StoreResult;
use sqlx::{Row, SqlitePool};
use tracing::info;

#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one consumed log record. The unique `public_id` column
    /// makes redelivered records idempotent: a duplicate insert is a
    /// no-op and `inserted` comes back false.
    pub async fn insert(&self, message: &NewStoredMessage) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO messages \
             (public_id, room_id, sender_id, sender_name, body, attachment_url, has_attachment, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.public_id)
        .bind(&message.room_id)
        .bind(&message.sender_id)
        .bind(&message.sender_name)
        .bind(&message.body)
        .bind(&message.attachment_url)
        .bind(message.has_attachment)
        .bind(&message.created_at)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            info!(
                public_id = %message.public_id,
                room_id = %message.room_id,
                sender_id = %message.sender_id,
                "stored message"
            );
        }
        Ok(inserted)
    }

    /// Room history in arrival order, newest last.
    pub async fn list_by_room(&self, room_id: &str, limit: i64) -> StoreResult<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, public_id, room_id, sender_id, sender_name, body, attachment_url, has_attachment, created_at \
             FROM messages WHERE room_id = ? ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredMessage {
                id: row.get("id"),
                public_id: row.get("public_id"),
                room_id: row.get("room_id"),
                sender_id: row.get("sender_id"),
                sender_name: row.get("sender_name"),
                body: row.get("body"),
                attachment_url: row.get("attachment_url"),
                has_attachment: row.get("has_attachment"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
