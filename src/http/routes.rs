//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{ArenaConfig, ArenaHandle};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "*")
        .filter_map(|s| s.parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/arenas", get(list_arenas_handler).post(create_arena_handler))
        .route("/arenas/:id", get(arena_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_arenas: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_arenas: state.arenas.active_arenas(),
        active_players: state.arenas.total_players(),
    })
}

// ============================================================================
// Arena endpoints
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ArenaSummary {
    pub arena_id: Uuid,
    pub players: usize,
    pub max_players: usize,
}

impl From<&ArenaHandle> for ArenaSummary {
    fn from(handle: &ArenaHandle) -> Self {
        Self {
            arena_id: handle.id,
            players: handle.player_count(),
            max_players: handle.max_players,
        }
    }
}

async fn list_arenas_handler(State(state): State<AppState>) -> Json<Vec<ArenaSummary>> {
    let summaries = state
        .arenas
        .handles()
        .iter()
        .map(ArenaSummary::from)
        .collect();
    Json(summaries)
}

async fn arena_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ArenaSummary>, AppError> {
    let handle = state
        .arenas
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("arena {id}")))?;
    Ok(Json(ArenaSummary::from(&handle)))
}

#[derive(Debug, Default, Deserialize)]
struct CreateArenaRequest {
    max_players: Option<usize>,
}

async fn create_arena_handler(
    State(state): State<AppState>,
    body: Option<Json<CreateArenaRequest>>,
) -> Result<(StatusCode, Json<ArenaSummary>), AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let defaults = &state.config.arena;
    let max_players = req.max_players.unwrap_or(defaults.max_players);
    if max_players == 0 || max_players > defaults.max_players {
        return Err(AppError::BadRequest(format!(
            "max_players must be between 1 and {}",
            defaults.max_players
        )));
    }

    let handle = state.arenas.spawn_arena(ArenaConfig {
        max_players,
        ..defaults.clone()
    });
    info!(arena_id = %handle.id, max_players, "Arena created over HTTP");
    Ok((StatusCode::CREATED, Json(ArenaSummary::from(&handle))))
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
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
