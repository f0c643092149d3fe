//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{ArenaError, ArenaHandle, PlayerInput};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, Envelope, ServerMsg};

/// Outbound messages buffered per connection before the writer falls behind
const OUTBOUND_BUFFER: usize = 256;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The arena a connection is currently playing in
struct ArenaSession {
    handle: ArenaHandle,
    forwarder: JoinHandle<()>,
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let player_id = Uuid::new_v4();
    info!(player_id = %player_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);
    let writer = spawn_writer(player_id, ws_sink, out_rx);

    let welcome = ServerMsg::Welcome {
        player_id,
        server_time: unix_millis(),
    };
    if out_tx.send(welcome).await.is_err() {
        error!(player_id = %player_id, "Failed to queue welcome");
        writer.abort();
        return;
    }

    run_session(player_id, &state, ws_stream, out_tx).await;

    writer.abort();
    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Reader loop: WebSocket -> arena
async fn run_session(
    player_id: Uuid,
    state: &AppState,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    out_tx: mpsc::Sender<ServerMsg>,
) {
    let mut rate_limiter = ConnectionRateLimiter::new();
    let mut session: Option<ArenaSession> = None;

    while let Some(result) = ws_stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
                continue;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        };

        if !rate_limiter.check_input() {
            warn!(
                player_id = %player_id,
                dropped = rate_limiter.dropped(),
                "Rate limited input message"
            );
            continue;
        }

        let client_msg = match serde_json::from_str::<ClientMsg>(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                continue;
            }
        };
        let received_at = unix_millis();

        match client_msg {
            ClientMsg::JoinArena { arena_id } => {
                if session.is_some() {
                    warn!(player_id = %player_id, "Join while already in an arena, ignoring");
                    continue;
                }
                match state.arenas.join_or_create(arena_id, &state.config.arena) {
                    Ok(handle) => {
                        // Subscribe before joining so the join reply is not missed
                        let forwarder = spawn_forwarder(player_id, handle.subscribe(), out_tx.clone());
                        let input = PlayerInput {
                            player_id,
                            msg: ClientMsg::JoinArena {
                                arena_id: Some(handle.id),
                            },
                            received_at,
                        };
                        if handle.input_tx.send(input).await.is_err() {
                            forwarder.abort();
                            let _ = out_tx.send(arena_error("arena_closed", "Arena is shutting down")).await;
                            continue;
                        }
                        session = Some(ArenaSession { handle, forwarder });
                    }
                    Err(e) => {
                        let code = match e {
                            ArenaError::NotFound(_) => "arena_not_found",
                            ArenaError::Full(_) => "arena_full",
                        };
                        let _ = out_tx.send(arena_error(code, &e.to_string())).await;
                    }
                }
            }
            ClientMsg::LeaveArena => {
                if let Some(current) = session.take() {
                    leave(player_id, current, received_at).await;
                }
            }
            msg => {
                let Some(current) = session.as_ref() else {
                    debug!(player_id = %player_id, "Message before joining an arena, ignoring");
                    continue;
                };
                let input = PlayerInput {
                    player_id,
                    msg,
                    received_at,
                };
                if current.handle.input_tx.send(input).await.is_err() {
                    debug!(player_id = %player_id, "Arena input channel closed");
                    if let Some(current) = session.take() {
                        current.forwarder.abort();
                    }
                }
            }
        }
    }

    // Signal disconnect to the arena loop
    if let Some(current) = session.take() {
        leave(player_id, current, unix_millis()).await;
    }
}

async fn leave(player_id: Uuid, session: ArenaSession, received_at: u64) {
    let _ = session
        .handle
        .input_tx
        .send(PlayerInput {
            player_id,
            msg: ClientMsg::LeaveArena,
            received_at,
        })
        .await;
    session.forwarder.abort();
}

fn arena_error(code: &str, message: &str) -> ServerMsg {
    ServerMsg::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}

/// Arena broadcast -> this connection's outbound queue, keeping only what
/// is addressed to the player
fn spawn_forwarder(
    player_id: Uuid,
    mut events: broadcast::Receiver<Envelope>,
    out_tx: mpsc::Sender<ServerMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => {
                    if !envelope.recipient.includes(player_id) {
                        continue;
                    }
                    if out_tx.send(envelope.msg).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        player_id = %player_id,
                        lagged_count = n,
                        "Client lagged, skipping {} arena messages", n
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(player_id = %player_id, "Arena channel closed");
                    break;
                }
            }
        }
    })
}

/// Outbound queue -> WebSocket
fn spawn_writer(
    player_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    })
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
