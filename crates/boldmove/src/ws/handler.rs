//! WebSocket handler for live session connections.

use axum::{
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use boldmove_protocol::{LiveCommand, LiveEvent};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::{ApiError, AppState};
use crate::game::GameCoordinator;

use super::hub::LiveConnection;

/// Pending replies to one client's own commands.
const REPLY_BUFFER_SIZE: usize = 8;

/// Query parameters of the live endpoint.
#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    /// Player ID or host ID of the connecting participant.
    pub identity: String,
}

/// WebSocket upgrade handler.
///
/// GET /events/{session_id}?identity=...
///
/// The connection is registered before the upgrade, so unknown sessions and
/// non-participants are rejected with a plain HTTP error.
pub async fn live_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<LiveQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let games = state.games.clone();
    let connection = games.connect(&session_id, &query.identity)?;
    info!(
        "Live connection {} upgrading for {} in session {}",
        connection.id, connection.identity, session_id
    );

    let conn_id = connection.id;
    let on_failure = games.clone();
    let ping_interval = state.ping_interval;

    Ok(ws
        .on_failed_upgrade(move |err| {
            warn!("WebSocket upgrade failed for session {}: {}", session_id, err);
            on_failure.disconnect(&session_id, conn_id);
        })
        .on_upgrade(move |socket| handle_live_connection(socket, games, connection, ping_interval)))
}

/// Drive one live connection until either side goes away.
async fn handle_live_connection(
    socket: WebSocket,
    games: Arc<GameCoordinator>,
    connection: LiveConnection,
    ping_interval: Duration,
) {
    let LiveConnection {
        id,
        session_id,
        identity,
        mut receiver,
        cancel,
    } = connection;
    let (mut sender, mut inbound) = socket.split();

    let connected = LiveEvent::Connected {
        session_id: session_id.clone(),
    };
    if let Err(e) = send_event(&mut sender, &connected).await {
        warn!("Failed to send connected event to {}: {}", identity, e);
        games.disconnect(&session_id, id);
        return;
    }

    // Replies from the reader to this client only.
    let (reply_tx, mut replies) = mpsc::channel::<LiveEvent>(REPLY_BUFFER_SIZE);

    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                // Dropped by the hub: flush what is already queued, then close.
                _ = cancel.cancelled() => {
                    while let Ok(payload) = receiver.try_recv() {
                        if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }

                payload = receiver.recv() => {
                    let Some(payload) = payload else { break };
                    if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                        break;
                    }
                }

                Some(event) = replies.recv() => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }

                _ = ping.tick() => {
                    if send_event(&mut sender, &LiveEvent::Ping).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader_identity = identity.clone();
    let reader_session = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = inbound.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<LiveCommand>(text.as_str()) {
                    Ok(LiveCommand::Pong) => {
                        debug!("Pong from {}", reader_identity);
                    }
                    Ok(LiveCommand::Unknown) => {
                        debug!("Ignoring unknown command from {}", reader_identity);
                    }
                    Err(e) => {
                        warn!(
                            "Failed to parse command from {}: {} - {}",
                            reader_identity,
                            e,
                            text.as_str()
                        );
                        let reply = LiveEvent::Error {
                            message: format!("invalid command: {}", e),
                            session_id: Some(reader_session.clone()),
                        };
                        if reply_tx.try_send(reply).is_err() {
                            debug!("Dropped error reply to {}", reader_identity);
                        }
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("{} closed live connection", reader_identity);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error for {}: {}", reader_identity, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    games.disconnect(&session_id, id);
    info!(
        "Live connection {} closed for {} in session {}",
        id, identity, session_id
    );
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &LiveEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}
