//! Durable log bridge.
//!
//! Relayed messages are appended to a queue on the hot path and
//! persisted by a background consumer, so a slow or unavailable store
//! never blocks delivery. The Redis variant uses a reliable-queue
//! pattern: records move from the topic list into a processing list
//! with `BLMOVE` and are removed only after the store accepts them,
//! which gives at-least-once persistence across restarts. Duplicate
//! redeliveries are absorbed by the store's unique public id.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use parley_config::DurableLogConfig;
use parley_database::entities::NewStoredMessage;
use parley_database::repos::MessageRepository;

use crate::error::SessionResult;
use crate::events::RelayedMessage;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const POP_TIMEOUT_SECONDS: f64 = 5.0;

/// Producer half of the durable log. Cloned into the hub; `enqueue`
/// must stay cheap because it sits on the message hot path.
#[derive(Clone)]
pub enum LogProducer {
    Redis {
        conn: ConnectionManager,
        topic: String,
    },
    Memory {
        queue: mpsc::UnboundedSender<String>,
    },
}

impl LogProducer {
    pub fn redis(conn: ConnectionManager, topic: String) -> Self {
        Self::Redis { conn, topic }
    }

    /// In-process queue for deployments without Redis. The returned
    /// receiver feeds [`run_memory_consumer`].
    pub fn memory() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (queue, receiver) = mpsc::unbounded_channel();
        (Self::Memory { queue }, receiver)
    }

    pub async fn enqueue(&self, message: &RelayedMessage) -> SessionResult<()> {
        let payload = serde_json::to_string(message)?;
        match self {
            LogProducer::Redis { conn, topic } => {
                let mut conn = conn.clone();
                let _: i64 = conn.rpush(topic, payload).await?;
            }
            LogProducer::Memory { queue } => {
                // Receiver dropped means the consumer task is gone;
                // nothing useful to do with the record.
                let _ = queue.send(payload);
            }
        }
        Ok(())
    }
}

/// Consume records from the Redis topic and persist them. Drains the
/// processing list first so records claimed by a crashed run are not
/// lost. Runs until the process shuts down.
pub async fn run_redis_consumer(
    client: redis::Client,
    store: MessageRepository,
    settings: DurableLogConfig,
) {
    let processing = format!("{}:processing", settings.topic);

    loop {
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(error) => {
                warn!(%error, "durable log consumer failed to connect, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        // Records left in the processing list belong to a previous run
        // that died mid-flight; replay them before taking new work.
        let pending: Vec<String> = match conn.lrange(&processing, 0, -1).await {
            Ok(pending) => pending,
            Err(error) => {
                warn!(%error, "failed to read processing list, reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        if !pending.is_empty() {
            info!(count = pending.len(), "replaying unacknowledged log records");
        }

        let mut replay_failed = false;
        for payload in pending {
            if store_record(&payload, &store, &settings).await {
                let _: Result<i64, _> = conn.lrem(&processing, 1, &payload).await;
            } else {
                replay_failed = true;
            }
        }
        if replay_failed {
            // Leave the failed records in place and back off; they are
            // retried on the next connection cycle.
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }

        loop {
            let popped: Result<Option<String>, _> = redis::cmd("BLMOVE")
                .arg(&settings.topic)
                .arg(&processing)
                .arg("LEFT")
                .arg("RIGHT")
                .arg(POP_TIMEOUT_SECONDS)
                .query_async(&mut conn)
                .await;

            match popped {
                Ok(Some(payload)) => {
                    if store_record(&payload, &store, &settings).await {
                        let _: Result<i64, _> = conn.lrem(&processing, 1, &payload).await;
                    }
                }
                Ok(None) => continue,
                Err(error) => {
                    warn!(%error, "durable log pop failed, reconnecting");
                    break;
                }
            }
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Consume records from the in-process queue. Ends when the producer
/// side is dropped.
pub async fn run_memory_consumer(
    mut receiver: mpsc::UnboundedReceiver<String>,
    store: MessageRepository,
    settings: DurableLogConfig,
) {
    while let Some(payload) = receiver.recv().await {
        store_record(&payload, &store, &settings).await;
    }
    debug!("in-memory durable log drained, consumer stopping");
}

/// Persist one queue record. Returns true when the record is settled
/// (stored, deduplicated, or unparseable) and may be acknowledged.
async fn store_record(
    payload: &str,
    store: &MessageRepository,
    settings: &DurableLogConfig,
) -> bool {
    let message: RelayedMessage = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(error) => {
            // A record that never parses would wedge the queue if we
            // kept retrying it.
            error!(%error, "dropping malformed durable log record");
            return true;
        }
    };

    let record = NewStoredMessage {
        public_id: message.public_id.clone(),
        room_id: message.room_id.clone(),
        sender_id: message.sender.clone(),
        sender_name: message.sender_name.clone(),
        body: message.body.clone(),
        attachment_url: message.attachment_url.clone(),
        has_attachment: message.has_attachment,
        created_at: message.created_at.clone(),
    };

    let backoff = Duration::from_millis(settings.store_retry_backoff_ms);
    for attempt in 1..=settings.store_retry_attempts {
        match store.insert(&record).await {
            Ok(inserted) => {
                if !inserted {
                    debug!(public_id = %record.public_id, "duplicate log record ignored");
                }
                return true;
            }
            Err(error) => {
                warn!(
                    %error,
                    attempt,
                    public_id = %record.public_id,
                    "failed to persist message, retrying"
                );
                tokio::time::sleep(backoff * attempt).await;
            }
        }
    }

    error!(
        public_id = %record.public_id,
        "giving up on message after repeated store failures"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_config::DatabaseConfig;
    use parley_database::initialize_database;

    async fn memory_store() -> MessageRepository {
        let pool = initialize_database(&DatabaseConfig {
            url: "sqlite://:memory:".to_string(),
            max_connections: 1,
        })
        .await
        .unwrap();
        MessageRepository::new(pool)
    }

    fn settings() -> DurableLogConfig {
        DurableLogConfig {
            topic: "test:messages".to_string(),
            run_consumer: true,
            store_retry_attempts: 2,
            store_retry_backoff_ms: 1,
        }
    }

    fn sample_message(public_id: &str) -> RelayedMessage {
        RelayedMessage {
            public_id: public_id.to_string(),
            room_id: "room-1".to_string(),
            sender: "member-1".to_string(),
            sender_name: "Ada".to_string(),
            body: "hello".to_string(),
            created_at: "2026-08-30T12:00:00+00:00".to_string(),
            attachment_url: None,
            has_attachment: false,
        }
    }

    #[tokio::test]
    async fn memory_queue_round_trips_into_the_store() {
        let store = memory_store().await;

        let (producer, receiver) = LogProducer::memory();
        producer.enqueue(&sample_message("msg-1")).await.unwrap();
        producer.enqueue(&sample_message("msg-2")).await.unwrap();
        drop(producer);

        run_memory_consumer(receiver, store.clone(), settings()).await;

        let stored = store.list_by_room("room-1", 50).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].public_id, "msg-1");
    }

    #[tokio::test]
    async fn malformed_record_is_dropped_without_stopping_the_consumer() {
        let store = memory_store().await;

        let (producer, receiver) = LogProducer::memory();
        match &producer {
            LogProducer::Memory { queue } => {
                queue.send("not json".to_string()).unwrap();
            }
            _ => unreachable!(),
        }
        producer.enqueue(&sample_message("msg-3")).await.unwrap();
        drop(producer);

        run_memory_consumer(receiver, store.clone(), settings()).await;

        let stored = store.list_by_room("room-1", 50).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].public_id, "msg-3");
    }

    #[tokio::test]
    async fn redelivered_record_is_deduplicated() {
        let store = memory_store().await;

        let payload = serde_json::to_string(&sample_message("msg-4")).unwrap();
        assert!(store_record(&payload, &store, &settings()).await);
        assert!(store_record(&payload, &store, &settings()).await);

        let stored = store.list_by_room("room-1", 50).await.unwrap();
        assert_eq!(stored.len(), 1);
    }
}
