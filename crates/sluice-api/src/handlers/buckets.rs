//! /buckets, /prune, /reset handlers: bucket inspection and management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::ApiState;

// ── /buckets/{key} (GET) ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct BucketResponse {
    pub key: String,
    pub count: u64,
    pub capacity: u64,
    pub remaining: u64,
    pub rate: f64,
    pub till_empty_ms: u64,
}

pub async fn handle_bucket_inspect(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Result<Json<BucketResponse>, (StatusCode, String)> {
    let snap = state
        .collector
        .snapshot(&key)
        .ok_or((StatusCode::NOT_FOUND, "bucket not found".to_string()))?;

    Ok(Json(BucketResponse {
        remaining: snap.capacity - snap.count,
        till_empty_ms: u64::try_from(snap.till_empty.as_millis()).unwrap_or(u64::MAX),
        key: snap.key,
        count: snap.count,
        capacity: snap.capacity,
        rate: snap.rate,
    }))
}

// ── /buckets/{key} (DELETE) ──────────────────────────────────────────────────

#[derive(Serialize)]
pub struct BucketRemoveResponse {
    pub key: String,
    pub removed: bool,
}

pub async fn handle_bucket_remove(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Json<BucketRemoveResponse> {
    let removed = state.collector.remove(&key);
    if removed {
        tracing::info!(key = %key, "bucket removed via API");
    }
    Json(BucketRemoveResponse { key, removed })
}

// ── /prune (POST) ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PruneResponse {
    pub pruned: usize,
}

pub async fn handle_prune(State(state): State<ApiState>) -> Json<PruneResponse> {
    let pruned = state.collector.prune();
    tracing::info!(pruned, "manual prune");
    Json(PruneResponse { pruned })
}

// ── /reset (POST) ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ResetResponse {
    pub cleared: usize,
}

pub async fn handle_reset(State(state): State<ApiState>) -> Json<ResetResponse> {
    let cleared = state.collector.reset();
    tracing::warn!(cleared, "all buckets reset via API");
    Json(ResetResponse { cleared })
}
