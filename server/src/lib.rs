//! Application assembly for the Parley session server: services, hub,
//! background loops, and the axum router.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use parley_config::AppConfig;
use parley_runtime::BackendServices;
use parley_session::backplane::{run_subscriber, Backplane};
use parley_session::durable_log::{run_memory_consumer, run_redis_consumer, LogProducer};
use parley_session::{websocket_handler, Admission, RoomRegistry, SessionHub, SessionState};

/// Build the router plus its backing services. Spawns the backplane
/// subscriber and the durable log consumer as detached tasks when the
/// configuration calls for them.
pub async fn build_application(config: &AppConfig) -> Result<(Router, BackendServices)> {
    let services = BackendServices::initialise(config).await?;

    let registry = RoomRegistry::new(config.session.room_channel_capacity);

    let backplane = match &services.redis {
        Some(handles) => Backplane::redis(
            handles.client.clone(),
            handles.manager.clone(),
            config.backplane.channel.clone(),
        ),
        None => Backplane::local(),
    };

    let (producer, memory_queue) = match &services.redis {
        Some(handles) => (
            LogProducer::redis(handles.manager.clone(), config.durable_log.topic.clone()),
            None,
        ),
        None => {
            let (producer, receiver) = LogProducer::memory();
            (producer, Some(receiver))
        }
    };

    let hub = Arc::new(SessionHub::new(registry, backplane.clone(), producer));

    // Without Redis there is only this process; local deltas are
    // already applied before publishing, so no subscriber is needed.
    if services.redis.is_some() {
        tokio::spawn(run_subscriber(backplane, hub.clone()));
        info!(channel = %config.backplane.channel, "backplane subscriber started");
    }

    if config.durable_log.run_consumer {
        match (&services.redis, memory_queue) {
            (Some(handles), _) => {
                tokio::spawn(run_redis_consumer(
                    handles.client.clone(),
                    services.messages.clone(),
                    config.durable_log.clone(),
                ));
                info!(topic = %config.durable_log.topic, "durable log consumer started");
            }
            (None, Some(receiver)) => {
                tokio::spawn(run_memory_consumer(
                    receiver,
                    services.messages.clone(),
                    config.durable_log.clone(),
                ));
                info!("in-memory durable log consumer started");
            }
            (None, None) => {}
        }
    }

    let admission = Admission::new(
        services.rooms.clone(),
        services.members.clone(),
        Duration::from_secs(config.session.admission_timeout_seconds),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_handler))
        .with_state(SessionState { hub, admission })
        .layer(cors);

    Ok((router, services))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
