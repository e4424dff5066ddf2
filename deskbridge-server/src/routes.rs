//! HTTP surface: one-shot desktop actions, cache administration and
//! health, plus the WebSocket routes from [`crate::ws`].

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use deskbridge_core::bridge::messages::DEFAULT_MOVE_DURATION;
use deskbridge_core::{ActionRequest, BridgeError, OutboundMessage};

use crate::app::AppState;
use crate::ws;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::structured_query))
        .route("/ws/{session_id}", get(ws::structured))
        .route("/vnc/{session_id}/websocket", get(ws::raw))
        .route("/sessions/{session_id}/screenshot", post(screenshot))
        .route("/sessions/{session_id}/click", post(click))
        .route("/sessions/{session_id}/type", post(type_text))
        .route("/sessions/{session_id}/key_combination", post(key_combination))
        .route("/sessions/{session_id}/key_press", post(key_press))
        .route("/sessions/{session_id}/move", post(move_pointer))
        .route("/cache/invalidate", post(invalidate_cache))
        .route("/cache/stats", get(cache_stats))
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────────────

/// A [`BridgeError`] rendered as `{error, kind}` with its status code.
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(kind = %self.0.kind(), "request failed: {}", self.0);
        }
        let body = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

// ── Actions ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<OutboundMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ClickBody {
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub button: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TypeBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyCombinationBody {
    pub keys: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyPressBody {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveBody {
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub duration: Option<f64>,
}

async fn run_action(
    state: &AppState,
    session_id: &str,
    action: ActionRequest,
    capture_after: bool,
) -> Result<Json<ActionResponse>, ApiError> {
    let cancel = state.cancel.child_token();
    let outcome = state
        .bridge
        .execute_once(session_id, action, capture_after, &cancel)
        .await?;
    Ok(Json(ActionResponse {
        success: true,
        action: outcome.action,
        screenshot: outcome.screenshot.as_ref().map(OutboundMessage::screenshot),
    }))
}

async fn screenshot(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    run_action(&state, &session_id, ActionRequest::Screenshot, false).await
}

async fn click(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<ClickBody>,
) -> Result<Json<ActionResponse>, ApiError> {
    let action = ActionRequest::click(body.x, body.y, body.button.as_deref().unwrap_or("left"))?;
    run_action(&state, &session_id, action, true).await
}

async fn type_text(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<TypeBody>,
) -> Result<Json<ActionResponse>, ApiError> {
    let action = ActionRequest::type_text(body.text)?;
    run_action(&state, &session_id, action, false).await
}

async fn key_combination(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<KeyCombinationBody>,
) -> Result<Json<ActionResponse>, ApiError> {
    let action = ActionRequest::key_combination(&body.keys)?;
    run_action(&state, &session_id, action, false).await
}

async fn key_press(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<KeyPressBody>,
) -> Result<Json<ActionResponse>, ApiError> {
    let action = ActionRequest::key_press(&body.key)?;
    run_action(&state, &session_id, action, false).await
}

async fn move_pointer(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<MoveBody>,
) -> Result<Json<ActionResponse>, ApiError> {
    let duration = body.duration.unwrap_or(DEFAULT_MOVE_DURATION);
    let action = ActionRequest::move_to(body.x, body.y, duration)?;
    run_action(&state, &session_id, action, false).await
}

// ── Cache / health ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InvalidateBody {
    pub pattern: String,
}

async fn invalidate_cache(
    State(state): State<AppState>,
    Json(body): Json<InvalidateBody>,
) -> Json<serde_json::Value> {
    let invalidated = state.bridge.registry().invalidate(&body.pattern).await;
    Json(json!({ "invalidated": invalidated, "pattern": body.pattern }))
}

async fn cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.bridge.registry().stats().await;
    Json(json!({ "cache": stats }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let bridge = &state.bridge;
    Json(json!({
        "status": "healthy",
        "service": "deskbridge",
        "version": env!("CARGO_PKG_VERSION"),
        "client": bridge.factory().variant(),
        "cache": bridge.registry().stats().await,
        "breakers": [
            bridge.registry().policy().breaker().stats(),
            bridge.connect_policy().breaker().stats(),
        ],
    }))
}
