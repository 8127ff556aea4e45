//! HTTP surface
//!
//! Four endpoints over the supervisor: `POST /api/move` runs a search on
//! the primary engine, `GET /api/move/status/{id}` exposes the live
//! per-request telemetry, `POST /api/hint` asks the secondary engine for
//! MultiPV lines, and `GET /api/health` answers unconditionally. Request
//! bodies are validated by hand so the documented machine codes come back
//! instead of generic deserialization failures.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::supervisor::{HintParams, MoveParams, Supervisor};

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
}

pub fn router(supervisor: Arc<Supervisor>) -> Router {
    let state = AppState { supervisor };
    Router::new()
        .route("/api/health", get(health))
        .route("/api/move", post(post_move))
        .route("/api/move/status/{id}", get(get_status))
        .route("/api/hint", post(post_hint))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Search presets; caller-supplied fields override when valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillPreset {
    pub movetime_ms: u64,
    pub depth: Option<u64>,
    pub hash_mb: u64,
}

pub fn skill_preset(name: Option<&str>) -> SkillPreset {
    match name {
        Some("blitz") => SkillPreset {
            movetime_ms: 150,
            depth: None,
            hash_mb: 16,
        },
        Some("strong") => SkillPreset {
            movetime_ms: 2_000,
            depth: None,
            hash_mb: 256,
        },
        // "rapid" is also the default when no skill is named
        _ => SkillPreset {
            movetime_ms: 600,
            depth: None,
            hash_mb: 64,
        },
    }
}

/// A positive integer, or nothing. Anything else is `None`.
fn positive_u64(value: Option<&Value>) -> Option<u64> {
    value.and_then(Value::as_u64).filter(|&v| v > 0)
}

fn extract_fen(body: &Value) -> Result<String, ApiError> {
    body.get("fen")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingFen)
}

fn extract_moves_uci(body: &Value) -> Result<Option<Vec<String>>, ApiError> {
    match body.get("moves_uci") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut moves = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => moves.push(s.to_string()),
                    None => return Err(ApiError::InvalidMovesUci),
                }
            }
            Ok(Some(moves))
        }
        Some(_) => Err(ApiError::InvalidMovesUci),
    }
}

fn resolve_move_params(
    body: &Value,
    request_id: String,
) -> Result<MoveParams, ApiError> {
    let fen = extract_fen(body)?;
    let moves_uci = extract_moves_uci(body)?;

    let preset = skill_preset(body.get("skill").and_then(Value::as_str));

    let movetime_ms = match body.get("movetime_ms") {
        None | Some(Value::Null) => preset.movetime_ms,
        Some(value) => positive_u64(Some(value)).ok_or(ApiError::InvalidMovetime)?,
    };
    let depth = positive_u64(body.get("depth")).or(preset.depth);
    let hash_mb = positive_u64(body.get("hash_mb")).unwrap_or(preset.hash_mb);

    Ok(MoveParams {
        request_id,
        fen,
        moves_uci,
        movetime_ms,
        depth,
        hash_mb,
    })
}

async fn post_move(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let params = resolve_move_params(&body, request_id.clone())?;
    info!(id = %request_id, movetime = params.movetime_ms, "move request");
    let outcome = state.supervisor.run_move(params).await?;
    info!(
        id = %request_id,
        uci = outcome.uci.as_deref().unwrap_or("-"),
        terminal = outcome.terminal,
        timeout = outcome.timeout,
        "move finished"
    );
    Ok(Json(outcome))
}

async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .supervisor
        .status_view(&id)
        .map(Json)
        .ok_or(ApiError::UnknownRequestId)
}

async fn post_hint(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let fen = extract_fen(&body)?;
    let moves_uci = extract_moves_uci(&body)?;
    let multipv = positive_u64(body.get("multipv")).unwrap_or(3).clamp(1, 8);
    let movetime_ms = positive_u64(body.get("movetime_ms"))
        .unwrap_or(120)
        .clamp(50, 2_000);

    if !state.supervisor.hint_available() {
        return Err(ApiError::StockfishUnavailable);
    }

    let outcome = state
        .supervisor
        .run_hint(HintParams {
            fen,
            moves_uci,
            multipv,
            movetime_ms,
        })
        .await?;
    Ok(Json(outcome))
}
