//! HTTP route definitions

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::app::AppState;
use crate::http::auth::AuthError;
use crate::matchmaking::{MatchResultError, QueueError, QueuedPlayer};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::{EntitySnapshot, GameMode, PlayerInput};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/matchmaking", post(matchmaking_handler))
        .route("/leave_queue", post(leave_queue_handler))
        .route("/join_match", get(join_match_handler))
        .route("/match_status", get(match_status_handler))
        .route("/sync_entities", post(sync_entities_handler))
        .route("/match_result", post(match_result_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config.client_origin.as_deref()))
        .with_state(state)
}

/// Comma-separated origins, or any origin when unset
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let Some(origins) = client_origin else {
        return CorsLayer::permissive();
    };

    let allowed_origins: Vec<header::HeaderValue> = origins
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    request_status: bool,
    message: String,
}

impl StatusResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            request_status: true,
            message: message.into(),
        })
    }
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_lobbies: usize,
    active_players: usize,
    active_sessions: usize,
    duel_queue: usize,
    arena_queue: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (duel_queue, arena_queue) = state.matchmaking.queue_sizes().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_lobbies: state.lobby_registry.active_lobbies(),
        active_players: state.lobby_registry.total_players(),
        active_sessions: state.auth.active_sessions(),
        duel_queue,
        arena_queue,
    })
}

// ============================================================================
// Account endpoints
// ============================================================================

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    request_status: bool,
    auth_token: u64,
}

async fn register_handler(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    let Json(req) = payload?;
    state.auth.register(&req.username, &req.password).await?;
    Ok(StatusResponse::ok("Registered"))
}

async fn login_handler(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(req) = payload?;
    let auth_token = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(LoginResponse {
        request_status: true,
        auth_token,
    }))
}

// ============================================================================
// Matchmaking endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchmakingRequest {
    player_id: u64,
    game_mode: GameMode,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerRequest {
    player_id: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinMatchResponse {
    request_status: bool,
    player_id: u64,
    match_id: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchStatusResponse {
    match_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    match_id: Option<u64>,
}

async fn matchmaking_handler(
    State(state): State<AppState>,
    payload: Result<Json<MatchmakingRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    let Json(req) = payload?;

    let session = state
        .auth
        .session(req.player_id)
        .ok_or_else(|| AppError::BadRequest("Unknown player".to_string()))?;
    let record = state
        .store
        .get_player(session.account_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::BadRequest("Unknown player".to_string()))?;

    let player = QueuedPlayer::new(req.player_id, Some(record.id), record.rating(), req.game_mode);
    state.matchmaking.join_queue(player).await?;

    Ok(StatusResponse::ok(format!("Queued for {}", req.game_mode.as_str())))
}

async fn leave_queue_handler(
    State(state): State<AppState>,
    payload: Result<Json<PlayerRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    let Json(req) = payload?;
    state.matchmaking.leave_queue(req.player_id).await;
    Ok(StatusResponse::ok("Left queue"))
}

async fn join_match_handler(State(state): State<AppState>) -> Json<JoinMatchResponse> {
    let (player_id, lobby) = state.matchmaking.join_legacy().await;
    Json(JoinMatchResponse {
        request_status: true,
        player_id,
        match_id: lobby.id,
    })
}

async fn match_status_handler(
    State(state): State<AppState>,
    query: Result<Query<PlayerRequest>, QueryRejection>,
) -> Result<Json<MatchStatusResponse>, AppError> {
    let Query(req) = query?;

    if let Some(lobby) = state.matchmaking.lobby_of(req.player_id) {
        return Ok(Json(MatchStatusResponse {
            match_found: true,
            match_id: Some(lobby.id),
        }));
    }

    if state.matchmaking.is_queued(req.player_id).await {
        return Ok(Json(MatchStatusResponse {
            match_found: false,
            match_id: None,
        }));
    }

    Err(AppError::NotFound("Player is not queued or in a match".to_string()))
}

// ============================================================================
// Gameplay endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
    player_id: u64,
    #[serde(default)]
    input: Option<PlayerInput>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchResultRequest {
    match_id: u64,
    winner_id: u64,
}

/// Polling alternative to the socket: submit input, receive the
/// lobby's current state
async fn sync_entities_handler(
    State(state): State<AppState>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<EntitySnapshot>, AppError> {
    let Json(req) = payload?;

    let lobby = state
        .matchmaking
        .lobby_of(req.player_id)
        .ok_or_else(|| AppError::NotFound("Player is not in a match".to_string()))?;

    if let Some(input) = req.input {
        lobby.submit_input(req.player_id, input);
    }

    Ok(Json(lobby.full_snapshot()))
}

async fn match_result_handler(
    State(state): State<AppState>,
    payload: Result<Json<MatchResultRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    let Json(req) = payload?;
    state.matchmaking.record_result(req.match_id, req.winner_id).await?;
    info!(match_id = req.match_id, winner_id = req.winner_id, "Match closed via result");
    Ok(StatusResponse::ok("Match result recorded"))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Store(e) => AppError::Internal(e.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<MatchResultError> for AppError {
    fn from(e: MatchResultError) -> Self {
        match e {
            MatchResultError::MatchNotFound(_) => AppError::NotFound(e.to_string()),
            MatchResultError::InvalidWinner(_)
            | MatchResultError::InProgress
            | MatchResultError::ConflictingWinner(_) => AppError::BadRequest(e.to_string()),
            MatchResultError::Store(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };

        let body = serde_json::json!({
            "requestStatus": false,
            "message": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::{MemoryStore, PlayerStore};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt; // for oneshot

    fn app() -> (AppState, Router) {
        let state = AppState::with_store(Config::default(), PlayerStore::Memory(MemoryStore::new()));
        let router = build_router(state.clone());
        (state, router)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login(router: &Router, username: &str) -> u64 {
        let creds = json!({ "username": username, "password": "pw" });
        call(router, "POST", "/register", Some(creds.clone())).await;
        let (status, body) = call(router, "POST", "/login", Some(creds)).await;
        assert_eq!(status, StatusCode::OK);
        body["authToken"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_, router) = app();
        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeLobbies"], 0);
        assert_eq!(body["activeSessions"], 0);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (_, router) = app();
        let (status, body) = call(&router, "POST", "/register", Some(json!({ "username": "abc", "password": "pw" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["requestStatus"], false);

        let (status, body) = call(&router, "POST", "/register", Some(json!({ "username": "abc1", "password": "pw" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requestStatus"], true);

        let (status, _) = call(&router, "POST", "/register", Some(json!({ "username": "abc1" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_is_idempotent() {
        let (_, router) = app();
        let token = login(&router, "ace1").await;
        let (_, body) = call(&router, "POST", "/login", Some(json!({ "username": "ace1", "password": "pw" }))).await;
        assert_eq!(body["authToken"].as_u64(), Some(token));

        let (status, _) = call(&router, "POST", "/login", Some(json!({ "username": "ace1", "password": "bad" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_matchmaking_flow() {
        let (state, router) = app();
        let a = login(&router, "ace1").await;
        let b = login(&router, "ace2").await;

        let (status, _) = call(&router, "GET", &format!("/match_status?playerId={}", a), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        for token in [a, b] {
            let (status, _) = call(&router, "POST", "/matchmaking", Some(json!({ "playerId": token, "gameMode": "HEX_DUEL" }))).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = call(&router, "POST", "/matchmaking", Some(json!({ "playerId": a, "gameMode": "HEX_DUEL" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&router, "GET", &format!("/match_status?playerId={}", a), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["matchFound"], false);

        state.matchmaking.process_queue().await;

        let (_, body) = call(&router, "GET", &format!("/match_status?playerId={}", a), None).await;
        assert_eq!(body["matchFound"], true);
        let match_id = body["matchId"].as_u64().unwrap();

        let (status, snapshot) = call(&router, "POST", "/sync_entities", Some(json!({ "playerId": b, "input": { "moveForward": true } }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["full"], true);
        assert!(!snapshot["entities"].as_array().unwrap().is_empty());

        // The winner is named by the token the client got from /login
        let (status, _) = call(&router, "POST", "/match_result", Some(json!({ "matchId": match_id, "winnerId": a }))).await;
        assert_eq!(status, StatusCode::OK);

        let winner = state.store.find_by_username("ace1").await.unwrap().unwrap();
        let loser = state.store.find_by_username("ace2").await.unwrap().unwrap();
        assert_eq!((winner.wins, loser.losses), (1, 1));
        assert!(winner.glicko_rating > loser.glicko_rating);
        assert_eq!(winner.match_id, None);

        let (status, _) = call(&router, "POST", "/match_result", Some(json!({ "matchId": match_id, "winnerId": a }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&router, "POST", "/sync_entities", Some(json!({ "playerId": b }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_player_cannot_queue() {
        let (_, router) = app();
        let (status, body) = call(&router, "POST", "/matchmaking", Some(json!({ "playerId": 12345, "gameMode": "HEX_ARENA" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["requestStatus"], false);

        let (status, _) = call(&router, "POST", "/leave_queue", Some(json!({ "playerId": 12345 }))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_legacy_join() {
        let (_, router) = app();
        let (status, body) = call(&router, "GET", "/join_match", None).await;
        assert_eq!(status, StatusCode::OK);
        let player_id = body["playerId"].as_u64().unwrap();

        let (_, status_body) = call(&router, "GET", &format!("/match_status?playerId={}", player_id), None).await;
        assert_eq!(status_body["matchId"], body["matchId"]);

        let (status, _) = call(&router, "POST", "/match_result", Some(json!({ "matchId": body["matchId"], "winnerId": player_id }))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&router, "GET", &format!("/match_status?playerId={}", player_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
