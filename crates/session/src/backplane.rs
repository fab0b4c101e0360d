//! Fan-out backplane.
//!
//! Propagates room events between server processes so every process
//! hosting connections for a room converges on the same presence,
//! typing, and message view. Redis pub/sub preserves publish order per
//! publisher, which gives the per-room per-publisher ordering the
//! session engine relies on. Single-process deployments and tests use
//! the in-process loopback instead.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::SessionResult;
use crate::events::Envelope;
use crate::hub::SessionHub;

const LOCAL_BACKPLANE_CAPACITY: usize = 1024;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub enum Backplane {
    Redis(RedisBackplane),
    Local(LocalBackplane),
}

impl Backplane {
    pub fn redis(client: redis::Client, publisher: ConnectionManager, channel: String) -> Self {
        Self::Redis(RedisBackplane {
            client,
            publisher,
            channel,
        })
    }

    pub fn local() -> Self {
        Self::Local(LocalBackplane::new())
    }

    /// Publish one envelope. Failures surface to the caller, which
    /// treats them as transient and keeps serving local connections.
    pub async fn publish(&self, envelope: &Envelope) -> SessionResult<()> {
        match self {
            Backplane::Redis(redis) => redis.publish(envelope).await,
            Backplane::Local(local) => {
                local.publish(envelope.clone());
                Ok(())
            }
        }
    }
}

#[derive(Clone)]
pub struct RedisBackplane {
    client: redis::Client,
    publisher: ConnectionManager,
    channel: String,
}

impl RedisBackplane {
    async fn publish(&self, envelope: &Envelope) -> SessionResult<()> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.publisher.clone();
        let _: i64 = conn.publish(&self.channel, payload).await?;
        Ok(())
    }
}

/// In-process loopback used when no Redis is configured. Multiple hubs
/// may share one instance in tests to simulate multiple processes.
#[derive(Clone)]
pub struct LocalBackplane {
    sender: broadcast::Sender<Envelope>,
}

impl LocalBackplane {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(LOCAL_BACKPLANE_CAPACITY).0,
        }
    }

    fn publish(&self, envelope: Envelope) {
        // No subscribers is fine: single-process, nothing to converge.
        let _ = self.sender.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

impl Default for LocalBackplane {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the subscription side of the backplane, feeding remote
/// envelopes into the hub. Runs until the process shuts down; the
/// Redis variant reconnects with a bounded delay after stream errors.
///
/// Redis pub/sub is fire-and-forget: envelopes published while a
/// subscriber is reconnecting are gone, so presence refcounts on this
/// process can lag until the affected members disconnect and rejoin.
/// Message and typing events are transient and self-correct on the
/// next delivery.
pub async fn run_subscriber(backplane: Backplane, hub: Arc<SessionHub>) {
    match backplane {
        Backplane::Local(local) => {
            let mut receiver = local.subscribe();
            loop {
                match receiver.recv().await {
                    Ok(envelope) => hub.handle_remote(envelope).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "local backplane lagged, dropping envelopes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        Backplane::Redis(redis) => loop {
            let mut pubsub = match redis.client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(error) => {
                    warn!(%error, "backplane subscriber failed to connect, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            if let Err(error) = pubsub.subscribe(&redis.channel).await {
                warn!(%error, channel = %redis.channel, "backplane subscribe failed, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }

            debug!(channel = %redis.channel, "backplane subscriber connected");

            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        warn!(%error, "unreadable backplane payload, skipping");
                        continue;
                    }
                };

                match serde_json::from_str::<Envelope>(&payload) {
                    Ok(envelope) => hub.handle_remote(envelope).await,
                    Err(error) => {
                        warn!(%error, "malformed backplane envelope, skipping");
                    }
                }
            }

            warn!("backplane subscription ended, reconnecting");
            tokio::time::sleep(RECONNECT_DELAY).await;
        },
    }
}
