//! HTTP request handlers for the target API.

use super::AppState;
use crate::probe::{self, ProbeResult};
use crate::store::{Direction, StoreError, Target};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PinRequest {
    /// Explicit pin state; absent toggles the current one.
    #[serde(default)]
    pub pinned: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub direction: String,
}

#[derive(Debug, Serialize)]
struct TargetsResponse {
    targets: Vec<Target>,
}

#[derive(Debug, Serialize)]
struct TargetResponse {
    target: Target,
}

#[derive(Debug, Serialize)]
struct MoveResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    unchanged: Option<bool>,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// A target with its live probe result attached.
#[derive(Debug, Serialize)]
struct StatusEntry {
    #[serde(flatten)]
    target: Target,
    status: ProbeResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    targets: Vec<StatusEntry>,
    checked_at: DateTime<Utc>,
}

fn error_response(err: StoreError) -> Response {
    let status = match &err {
        StoreError::Validation { .. } => StatusCode::BAD_REQUEST,
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(TargetsResponse {
        targets: state.store.list(),
    })
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<TargetRequest>,
) -> Response {
    match state.store.create(&req.name, &req.host, req.port) {
        Ok(target) => (StatusCode::CREATED, Json(TargetResponse { target })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TargetRequest>,
) -> Response {
    match state.store.update(&id, &req.name, &req.host, req.port) {
        Ok(target) => Json(TargetResponse { target }).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_pin_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    // An empty body toggles; a present body must be valid JSON.
    let pinned = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<PinRequest>(&body) {
            Ok(req) => req.pinned,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: "request body must be valid JSON".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    };

    match state.store.set_pinned(&id, pinned) {
        Ok(target) => Json(TargetResponse { target }).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_move_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MoveRequest>,
) -> Response {
    let direction = match req.direction.as_str() {
        "up" => Direction::Up,
        "down" => Direction::Down,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "direction must be \"up\" or \"down\"".to_string(),
                }),
            )
                .into_response()
        }
    };

    match state.store.move_target(&id, direction) {
        Ok(swapped) => Json(MoveResponse {
            ok: true,
            unchanged: (!swapped).then_some(true),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API: Status
// ============================================================================

/// Probe every target concurrently and return the list with live results.
/// A down target is a successful probe that reports `isUp: false`; this
/// endpoint never fails because an endpoint is unreachable.
pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let targets = state.store.list();
    let results = probe::probe_all(targets).await;

    Json(StatusResponse {
        targets: results
            .into_iter()
            .map(|(target, status)| StatusEntry { target, status })
            .collect(),
        checked_at: Utc::now(),
    })
}

/// Best-effort reset of cached probe statistics. Nothing is cached here, so
/// this is a deliberate no-op kept for API compatibility.
pub async fn handle_reset_response_times() -> impl IntoResponse {
    Json(OkResponse { ok: true })
}
