//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::LobbyHandle;
use crate::http::routes::AppError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ErrorMsg, MatchJoined, PlayerInput, ServerMsg, Welcome};

/// How often an idle connection checks whether its player was placed
const LOBBY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Pending error replies per connection; extras are dropped
const NOTICE_CAPACITY: usize = 16;

type WsSink = SplitSink<WebSocket, Message>;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    /// Session token, or the id handed out by the legacy join
    pub player_id: u64,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let player_id = query.player_id;
    let known = state.auth.session(player_id).is_some() || state.matchmaking.lobby_of(player_id).is_some();
    if !known {
        warn!(player_id, "WebSocket upgrade for unknown player");
        return AppError::BadRequest("Unknown player".to_string()).into_response();
    }

    info!(player_id, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, player_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: u64, state: AppState) {
    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome(Welcome {
        player_id,
        server_time: unix_millis(),
    });
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(player_id, error = %e, "Failed to send welcome");
        return;
    }

    let (notice_tx, notice_rx) = mpsc::channel(NOTICE_CAPACITY);

    let writer_state = state.clone();
    let writer_handle = tokio::spawn(async move {
        run_writer(player_id, writer_state, ws_sink, notice_rx).await;
    });

    run_reader(player_id, &state, ws_stream, &notice_tx).await;

    writer_handle.abort();

    // Cleanup on disconnect
    state.matchmaking.leave_queue(player_id).await;
    if let Some(lobby) = state.matchmaking.lobby_of(player_id) {
        lobby.leave(player_id);
    }
    info!(player_id, "WebSocket connection closed");
}

/// Forward lobby broadcasts to the socket, following the player into
/// each lobby they are placed in
async fn run_writer(
    player_id: u64,
    state: AppState,
    mut ws_sink: WsSink,
    mut notices: mpsc::Receiver<ServerMsg>,
) {
    let mut last_lobby = None;

    loop {
        let lobby = match state.matchmaking.lobby_of(player_id) {
            Some(lobby) if Some(lobby.id) != last_lobby => lobby,
            _ => {
                tokio::select! {
                    _ = tokio::time::sleep(LOBBY_POLL_INTERVAL) => {}
                    Some(notice) = notices.recv() => {
                        if let Err(e) = send_msg(&mut ws_sink, &notice).await {
                            debug!(player_id, error = %e, "WebSocket send failed");
                            return;
                        }
                    }
                }
                continue;
            }
        };
        last_lobby = Some(lobby.id);

        if let Err(e) = stream_lobby(player_id, &lobby, &mut ws_sink, &mut notices).await {
            debug!(player_id, error = %e, "WebSocket send failed");
            return;
        }
    }
}

/// Stream one lobby until it ends. Receivers that fall behind skip the
/// missed deltas and resync from a full snapshot.
async fn stream_lobby(
    player_id: u64,
    lobby: &LobbyHandle,
    ws_sink: &mut WsSink,
    notices: &mut mpsc::Receiver<ServerMsg>,
) -> Result<(), String> {
    // Subscribe before reading the mirror so no delta falls in between
    let mut snapshot_rx = lobby.subscribe();
    lobby.resume(player_id);

    let joined = ServerMsg::MatchJoined(MatchJoined {
        match_id: lobby.id,
        mode: lobby.mode,
        members: lobby.members().iter().map(|m| m.player_id).collect(),
    });
    send_msg(ws_sink, &joined).await?;
    send_msg(ws_sink, &ServerMsg::Snapshot(lobby.full_snapshot())).await?;

    loop {
        let received = tokio::select! {
            received = snapshot_rx.recv() => received,
            Some(notice) = notices.recv() => {
                send_msg(ws_sink, &notice).await?;
                continue;
            }
        };

        match received {
            Ok(msg) => {
                let ended = matches!(msg, ServerMsg::MatchEnded(_));
                send_msg(ws_sink, &msg).await?;
                if ended {
                    return Ok(());
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(player_id, lobby_id = lobby.id, lagged_count = n, "Client lagged, resyncing");
                send_msg(ws_sink, &ServerMsg::Snapshot(lobby.full_snapshot())).await?;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(player_id, lobby_id = lobby.id, "Snapshot channel closed");
                return Ok(());
            }
        }
    }
}

/// Reader loop: WebSocket -> lobby inbox
async fn run_reader(
    player_id: u64,
    state: &AppState,
    mut ws_stream: SplitStream<WebSocket>,
    notices: &mpsc::Sender<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let accepted = if rate_limiter.check_input() {
                    parse_input(player_id, &text)
                } else {
                    Err(ErrorMsg::new("rate_limited", "Too many messages"))
                };

                let input = match accepted {
                    Ok(input) => input,
                    Err(rejection) => {
                        warn!(player_id, code = %rejection.code, "Input rejected");
                        // Full queue: the client already has errors pending
                        let _ = notices.try_send(ServerMsg::Error(rejection));
                        continue;
                    }
                };

                match state.matchmaking.lobby_of(player_id) {
                    Some(lobby) => {
                        lobby.submit_input(player_id, input);
                    }
                    None => {
                        let _ = notices.try_send(ServerMsg::Error(ErrorMsg::new(
                            "not_in_match",
                            "Input ignored until a match is joined",
                        )));
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Decode one client message sent on `player_id`'s connection
fn parse_input(player_id: u64, text: &str) -> Result<PlayerInput, ErrorMsg> {
    let client_msg = serde_json::from_str::<ClientMsg>(text)
        .map_err(|e| ErrorMsg::new("bad_message", format!("Failed to parse message: {e}")))?;

    if client_msg.player_id != player_id {
        return Err(ErrorMsg::new("wrong_player", "Input for another player"));
    }
    Ok(client_msg.input)
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_accepts_own_messages() {
        let text = r#"{"playerId":7,"input":{"moveForward":true,"aimRotation":1.5}}"#;
        let input = parse_input(7, text).unwrap();
        assert!(input.move_forward);
        assert_eq!(input.aim_rotation, 1.5);
    }

    #[test]
    fn test_parse_input_rejections() {
        let foreign = r#"{"playerId":8,"input":{}}"#;
        assert_eq!(parse_input(7, foreign).unwrap_err().code, "wrong_player");
        assert_eq!(parse_input(7, "not json").unwrap_err().code, "bad_message");
    }

    #[test]
    fn test_rejection_wire_format() {
        let msg = ServerMsg::Error(ErrorMsg::new("rate_limited", "Too many messages"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "rate_limited");
    }
}
