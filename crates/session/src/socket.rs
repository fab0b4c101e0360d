//! WebSocket endpoint: admission, frame pumps, and disconnect cleanup.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, trace, warn};

use crate::auth::{AdmittedConnection, Admission, HandshakeParams};
use crate::error::{SessionError, SessionResult};
use crate::events::{ClientEvent, ServerEvent};
use crate::hub::{SessionConnection, SessionHub};

const OUTBOUND_QUEUE_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct SessionState {
    pub hub: Arc<SessionHub>,
    pub admission: Admission,
}

/// Upgrade handler for `/ws`. Credentials are checked before the
/// upgrade completes, so a rejected handshake never reaches the room.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(state): State<SessionState>,
) -> Result<Response, SessionError> {
    let admitted = state.admission.admit(&params).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state.hub, admitted)))
}

async fn handle_socket(socket: WebSocket, hub: Arc<SessionHub>, admitted: AdmittedConnection) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (connection, mut frames) = hub.connect(&admitted).await;

    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE_CAPACITY);

    let sender_task = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(error) => {
                    error!(%error, "failed to encode server event");
                    continue;
                }
            };
            trace!(event = event.event_type_name(), "sending server event");
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let forward_tx = out_tx.clone();
    let connection_id = connection.id;
    let forward_task = tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(frame) => {
                    if frame.exclude == Some(connection_id) {
                        continue;
                    }
                    if forward_tx.send(frame.event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "room broadcast lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(error) = handle_client_event(event, &hub, &connection).await {
                        debug!(
                            %error,
                            member_id = %connection.member.id,
                            "client event rejected"
                        );
                        let _ = out_tx
                            .send(ServerEvent::Error {
                                description: error.to_string(),
                            })
                            .await;
                    }
                }
                Err(error) => {
                    debug!(%error, "unparseable client frame");
                    let _ = out_tx
                        .send(ServerEvent::Error {
                            description: "invalid event format".to_string(),
                        })
                        .await;
                }
            },
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // Cleanup completes before the connection counts as gone: the
    // leave and typing reset are out on the room channel when this
    // returns.
    hub.disconnect(&connection).await;

    forward_task.abort();
    drop(out_tx);
    let _ = sender_task.await;
}

async fn handle_client_event(
    event: ClientEvent,
    hub: &SessionHub,
    connection: &SessionConnection,
) -> SessionResult<()> {
    match event {
        ClientEvent::Message {
            body,
            attachment_url,
        } => {
            hub.send_message(connection, body, attachment_url).await?;
        }
        ClientEvent::Typing { is_typing } => {
            hub.set_typing(connection, is_typing).await;
        }
        ClientEvent::JoinAnnounce { member } => {
            hub.announce_join(connection, member).await;
        }
    }
    Ok(())
}
