//! WebSocket upgrade handler and session loops

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::RoomHandle;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::protocol::{self, ClientFrame};

/// An admitted connection's link to its room
struct Session {
    room: RoomHandle,
    player_id: u16,
    /// Stats row for the display name; None when the lookup failed
    user_id: Option<Uuid>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    debug!("new websocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // All outbound frames (welcome, snapshots, ping echoes) funnel
    // through one channel so the writer owns the sink exclusively
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_sink.send(Message::Binary(frame)).await.is_err() {
                break;
            }
        }
    });

    let rate_limiter = PlayerRateLimiter::new();
    let mut session: Option<Session> = None;

    while let Some(result) = ws_stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "websocket error");
                break;
            }
        };

        match message {
            Message::Binary(buf) => {
                if !rate_limiter.check_input() {
                    warn!("rate limited inbound frame");
                    continue;
                }

                match protocol::decode_client(&buf) {
                    Ok(ClientFrame::Ping) => {
                        // Echo the full frame verbatim; the client computes
                        // its clock offset from the round trip
                        let _ = out_tx.send(buf);
                    }
                    Ok(ClientFrame::Join { name }) => {
                        if session.is_some() {
                            debug!("duplicate join ignored");
                            continue;
                        }
                        match state.rooms.place(&name, out_tx.clone()).await {
                            Ok((room, player_id)) => {
                                let user_id = lookup_user(&state, &name).await;
                                info!(room_id = room.id, player_id, "connection admitted");
                                session = Some(Session {
                                    room,
                                    player_id,
                                    user_id,
                                });
                            }
                            Err(e) => {
                                // No welcome is sent; closing the socket is
                                // the rejection signal
                                info!(error = %e, "join rejected");
                                break;
                            }
                        }
                    }
                    Ok(ClientFrame::Input(input)) => match &session {
                        Some(session) => session.room.queue_input(session.player_id, input).await,
                        None => debug!("input before join ignored"),
                    },
                    Err(e) => {
                        // Tolerate garbage: drop the frame, keep the socket
                        warn!(error = %e, "malformed frame dropped");
                    }
                }
            }
            Message::Close(_) => {
                debug!("client initiated close");
                break;
            }
            Message::Text(_) => {
                warn!("text frame ignored; protocol is binary");
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    if let Some(session) = session {
        let tally = session.room.leave(session.player_id).await;
        if let (Some(tally), Some(user_id)) = (tally, session.user_id) {
            if let Err(e) = state
                .stats
                .update_stats(user_id, tally.kills as u64, tally.deaths as u64)
                .await
            {
                // Persistence problems never propagate to gameplay
                warn!(error = %e, "failed to persist session stats");
            }
        }
    }

    writer.abort();
    debug!("websocket connection closed");
}

async fn lookup_user(state: &AppState, name: &str) -> Option<Uuid> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    match state.stats.get_or_create(name).await {
        Ok(user) => Some(user.id),
        Err(e) => {
            warn!(error = %e, "stats lookup failed");
            None
        }
    }
}
