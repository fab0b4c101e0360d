//! Parley database crate.
//!
//! Connection management, migrations, and the repositories backing the
//! room directory, member lookup, and the durable message store.

use parley_config::DatabaseConfig;
use sqlx::SqlitePool;

pub mod connection;
pub mod entities;
pub mod error;
pub mod migrations;
pub mod repos;

pub use connection::prepare_database;
pub use error::{StoreError, StoreResult};
pub use migrations::run_migrations;

pub use entities::{Member, NewStoredMessage, Room, StoredMessage};
pub use repos::{MemberRepository, MessageRepository, RoomRepository};

/// Prepare the database connection pool and apply migrations.
pub async fn initialize_database(config: &DatabaseConfig) -> StoreResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    run_migrations(&pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

    Ok(pool)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub async fn memory_pool() -> SqlitePool {
        let config = DatabaseConfig {
            url: "sqlite://:memory:".to_string(),
            max_connections: 1,
        };
        initialize_database(&config)
            .await
            .expect("in-memory database should initialize")
    }
}
