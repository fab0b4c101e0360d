//! Repository for member lookups.

use crate::entities::Member;
use crate::error::StoreResult;
use sqlx::{Row, SqlitePool};
use tracing::info;

#[derive(Clone)]
pub struct MemberRepository {
    pool: SqlitePool,
}

impl MemberRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find a member by their identifier.
    pub async fn find_by_id(&self, id: &str) -> StoreResult<Option<Member>> {
        let row = sqlx::query(
            "SELECT id, room_id, name, created_at FROM members WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Member {
            id: row.get("id"),
            room_id: row.get("room_id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        }))
    }

    /// Register a member into a room with a minted identifier.
    pub async fn create(&self, room_id: &str, name: &str) -> StoreResult<Member> {
        let id = cuid2::create_id();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO members (id, room_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(room_id)
            .bind(name)
            .bind(&now)
            .execute(&self.pool)
            .await?;

        info!(member_id = %id, room_id = %room_id, "registered member");

        Ok(Member {
            id,
            room_id: room_id.to_string(),
            name: name.to_string(),
            created_at: now,
        })
    }
}
