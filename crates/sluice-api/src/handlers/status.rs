//! /status and /ping handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub buckets: usize,
    pub pruning: bool,
    pub default_class: String,
    pub classes: Vec<ClassInfo>,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct ClassInfo {
    pub name: String,
    pub amount: u64,
    pub capacity: u64,
    pub rate: f64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let classes = state
        .rules
        .classes()
        .into_iter()
        .map(|name| {
            let rule = state.rules.lookup(name);
            ClassInfo {
                name: name.to_string(),
                amount: rule.amount,
                capacity: rule.capacity,
                rate: rule.rate,
            }
        })
        .collect();

    Json(StatusResponse {
        buckets: state.collector.len(),
        pruning: state.collector.is_pruning(),
        default_class: state.rules.default_class().to_string(),
        classes,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

// ── /ping ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PingResponse {
    pub pong: bool,
}

/// Rate-limited probe. Reaching it means the request was admitted.
pub async fn handle_ping() -> Json<PingResponse> {
    Json(PingResponse { pong: true })
}
